//! The standard capabilities: weather, web search, news, locations, movies
//! and GIFs. Each is an `HttpCapability` over its provider's GET endpoint.

use super::{
    CapabilityRegistry, CapabilitySpec, Field, HttpCapability, HttpProvider, ParameterSchema,
};
use crate::channel::Placeholder;
use crate::config::{EngineConfig, ProviderConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// One catalog entry and how it is configured
pub struct CatalogTool {
    pub spec: CapabilitySpec,
    /// Prefix of the `<PREFIX>_API_URL` / `<PREFIX>_API_KEY` variables
    pub env_prefix: &'static str,
    /// Query parameter carrying the API key
    pub api_key_param: &'static str,
    /// Query parameters sent with every request
    pub fixed_query: &'static [(&'static str, &'static str)],
    pub parameters: fn() -> ParameterSchema,
}

impl CatalogTool {
    pub fn build(&self, provider: &ProviderConfig, client: &reqwest::Client) -> HttpCapability {
        let mut http = HttpProvider::new(client.clone(), provider.base_url.clone());
        if let Some(key) = &provider.api_key {
            http = http.with_api_key(self.api_key_param, key.clone());
        }
        for (param, value) in self.fixed_query {
            http = http.with_query(*param, *value);
        }
        HttpCapability::new(self.spec, (self.parameters)(), http)
    }
}

const FIVE_SECONDS: Duration = Duration::from_secs(5);

pub static STANDARD_TOOLS: [CatalogTool; 6] = [
    CatalogTool {
        spec: CapabilitySpec {
            name: "get_weather",
            description: "Get the current weather for a location.",
            action: "get the weather",
            progress: "Getting the weather",
            result_noun: "Weather",
            subject_field: "location",
            placeholder: Placeholder::WeatherCard,
            deadline: FIVE_SECONDS,
            query_map: &[("location", "q"), ("units", "units")],
        },
        env_prefix: "WEATHER",
        api_key_param: "appid",
        fixed_query: &[],
        parameters: weather_parameters,
    },
    CatalogTool {
        spec: CapabilitySpec {
            name: "web_search",
            description: "Search the web and return the top results.",
            action: "search the web",
            progress: "Searching the web",
            result_noun: "Search results",
            subject_field: "query",
            placeholder: Placeholder::SearchResults,
            deadline: FIVE_SECONDS,
            query_map: &[("query", "q")],
        },
        env_prefix: "SEARCH",
        api_key_param: "api_key",
        fixed_query: &[],
        parameters: query_parameters,
    },
    CatalogTool {
        spec: CapabilitySpec {
            name: "news_search",
            description: "Find recent news articles about a topic.",
            action: "find news",
            progress: "Finding news",
            result_noun: "News",
            subject_field: "query",
            placeholder: Placeholder::NewsList,
            deadline: FIVE_SECONDS,
            query_map: &[("query", "q")],
        },
        env_prefix: "NEWS",
        api_key_param: "apiKey",
        fixed_query: &[("sortBy", "publishedAt")],
        parameters: query_parameters,
    },
    CatalogTool {
        spec: CapabilitySpec {
            name: "location_search",
            description: "Find places matching a name or description.",
            action: "find places",
            progress: "Finding places",
            result_noun: "Places",
            subject_field: "query",
            placeholder: Placeholder::LocationList,
            deadline: Duration::from_secs(10),
            query_map: &[("query", "q")],
        },
        env_prefix: "LOCATION",
        api_key_param: "key",
        fixed_query: &[],
        parameters: query_parameters,
    },
    CatalogTool {
        spec: CapabilitySpec {
            name: "movie_search",
            description: "Find movies similar to a description.",
            action: "find movies",
            progress: "Finding movies",
            result_noun: "Movies",
            subject_field: "query",
            placeholder: Placeholder::MovieCards,
            deadline: FIVE_SECONDS,
            query_map: &[("query", "query"), ("limit", "limit")],
        },
        env_prefix: "MOVIE",
        api_key_param: "api_key",
        fixed_query: &[],
        parameters: movie_parameters,
    },
    CatalogTool {
        spec: CapabilitySpec {
            name: "gif_search",
            description: "Find GIFs matching a phrase.",
            action: "find GIFs",
            progress: "Finding GIFs",
            result_noun: "GIFs",
            subject_field: "query",
            placeholder: Placeholder::GifGrid,
            deadline: FIVE_SECONDS,
            query_map: &[("query", "q"), ("limit", "limit")],
        },
        env_prefix: "GIF",
        api_key_param: "api_key",
        fixed_query: &[("rating", "g")],
        parameters: gif_parameters,
    },
];

fn weather_parameters() -> ParameterSchema {
    ParameterSchema::new()
        .field(Field::string("location", "City or place name, e.g. \"Paris\"").required())
        .field(
            Field::string("units", "Unit system for temperatures")
                .one_of(&["metric", "imperial"])
                .default_value(json!("metric")),
        )
}

fn query_parameters() -> ParameterSchema {
    ParameterSchema::new().field(Field::string("query", "What to search for").required())
}

fn movie_parameters() -> ParameterSchema {
    query_parameters().field(
        Field::integer("limit", "Maximum number of movies to return").default_value(json!(5)),
    )
}

fn gif_parameters() -> ParameterSchema {
    query_parameters().field(
        Field::integer("limit", "Maximum number of GIFs to return").default_value(json!(8)),
    )
}

/// Registry holding every standard capability that has a configured
/// provider, with the configured deadline overrides applied.
pub fn standard_registry(config: &EngineConfig, client: &reqwest::Client) -> CapabilityRegistry {
    let mut builder = CapabilityRegistry::builder();
    for tool in &STANDARD_TOOLS {
        match config.providers.get(tool.spec.name) {
            Some(provider) => builder = builder.register(Arc::new(tool.build(provider, client))),
            None => tracing::info!(
                capability = %tool.spec.name,
                "No provider configured, capability disabled"
            ),
        }
    }
    for (name, deadline) in &config.deadlines {
        builder = builder.with_deadline(name.clone(), *deadline);
    }
    builder.build()
}
