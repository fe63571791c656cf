//! HTTP-backed capability providers

use super::{Capability, CapabilityContext, ParameterSchema, ProviderError};
use crate::channel::Placeholder;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Rejection bodies are cut to this many characters
const ERROR_BODY_LIMIT: usize = 200;

/// Uniform GET-with-query call into a JSON API
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_key: Option<(String, String)>,
    fixed_query: Vec<(String, String)>,
}

impl HttpProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: None,
            fixed_query: Vec::new(),
        }
    }

    /// Send the key as query parameter `param`
    #[must_use]
    pub fn with_api_key(mut self, param: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_key = Some((param.into(), key.into()));
        self
    }

    /// Add a query parameter sent with every request
    #[must_use]
    pub fn with_query(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.fixed_query.push((param.into(), value.into()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue the request, giving up when the context is cancelled
    pub async fn get(
        &self,
        query: &[(String, String)],
        ctx: &CapabilityContext,
    ) -> Result<Value, ProviderError> {
        tokio::select! {
            biased;

            () = ctx.cancel.cancelled() => Err(ProviderError::Cancelled),
            result = self.fetch(query, ctx.deadline) => result,
        }
    }

    async fn fetch(
        &self,
        query: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let mut request = self
            .client
            .get(&self.base_url)
            .timeout(timeout)
            .query(&self.fixed_query)
            .query(query);
        if let Some((param, key)) = &self.api_key {
            request = request.query(&[(param, key)]);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;

        if status.is_server_error() {
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::MalformedPayload(e.to_string()))
    }
}

fn classify_transport(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Network(format!("request timed out: {error}"))
    } else if error.is_connect() {
        ProviderError::Network(format!("connection failed: {error}"))
    } else {
        ProviderError::Other(format!("request failed: {error}"))
    }
}

/// Static description of an HTTP-backed capability
#[derive(Debug, Clone, Copy)]
pub struct CapabilitySpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Verb phrase, e.g. "get the weather"
    pub action: &'static str,
    /// Progress phrase, e.g. "Getting the weather"
    pub progress: &'static str,
    /// Noun for summaries, e.g. "Weather"
    pub result_noun: &'static str,
    /// Argument naming what the call is about
    pub subject_field: &'static str,
    pub placeholder: Placeholder,
    pub deadline: Duration,
    /// Argument name to query parameter
    pub query_map: &'static [(&'static str, &'static str)],
}

/// A capability whose handler is one `HttpProvider::get`
pub struct HttpCapability {
    spec: CapabilitySpec,
    parameters: ParameterSchema,
    provider: HttpProvider,
}

impl HttpCapability {
    pub fn new(spec: CapabilitySpec, parameters: ParameterSchema, provider: HttpProvider) -> Self {
        Self {
            spec,
            parameters,
            provider,
        }
    }

    pub fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    fn query_for(&self, args: &Value) -> Vec<(String, String)> {
        self.spec
            .query_map
            .iter()
            .filter_map(|(arg, param)| {
                let value = match args.get(*arg)? {
                    Value::String(s) => s.clone(),
                    Value::Array(items) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(","),
                    Value::Null => return None,
                    other => other.to_string(),
                };
                Some(((*param).to_string(), value))
            })
            .collect()
    }
}

#[async_trait]
impl Capability for HttpCapability {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn description(&self) -> String {
        self.spec.description.to_string()
    }

    fn parameters(&self) -> &ParameterSchema {
        &self.parameters
    }

    fn default_deadline(&self) -> Duration {
        self.spec.deadline
    }

    fn placeholder(&self) -> Placeholder {
        self.spec.placeholder
    }

    fn action(&self) -> String {
        self.spec.action.to_string()
    }

    fn subject(&self, args: &Value) -> String {
        args.get(self.spec.subject_field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| "your request".to_string(), str::to_string)
    }

    fn working_status(&self, args: &Value) -> String {
        format!("{} for {}...", self.spec.progress, self.subject(args))
    }

    fn summarize(&self, args: &Value, payload: &Value) -> String {
        format!(
            "{} for {}: {}",
            self.spec.result_noun,
            self.subject(args),
            super::truncate_payload(payload)
        )
    }

    async fn invoke(&self, args: Value, ctx: CapabilityContext) -> Result<Value, ProviderError> {
        let query = self.query_for(&args);
        tracing::debug!(
            capability = %self.spec.name,
            url = %self.provider.base_url(),
            params = query.len(),
            "Calling provider"
        );
        self.provider.get(&query, &ctx).await
    }
}
