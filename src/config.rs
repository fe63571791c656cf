//! Environment-driven configuration

use crate::capability::catalog::STANDARD_TOOLS;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: String, value: String },
}

/// Settings for the model adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Gateway URL replacing the provider's base URL
    pub gateway: Option<String>,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            gateway: None,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Endpoint of one capability provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub model: ModelConfig,
    /// Keyed by capability name; unconfigured capabilities are not registered
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Per-capability deadline overrides
    pub deadlines: BTreeMap<String, Duration>,
    /// Replaces the built-in base system prompt
    pub system_prompt: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let model = ModelConfig {
            api_key: var("ANTHROPIC_API_KEY"),
            model: var("TURNWISE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gateway: var("LLM_GATEWAY"),
            max_tokens: match var("TURNWISE_MAX_TOKENS") {
                Some(raw) => parse_number("TURNWISE_MAX_TOKENS", &raw)?,
                None => DEFAULT_MAX_TOKENS,
            },
        };

        let mut providers = BTreeMap::new();
        let mut deadlines = BTreeMap::new();
        for tool in &STANDARD_TOOLS {
            let name = tool.spec.name;
            if let Some(base_url) = var(&format!("{}_API_URL", tool.env_prefix)) {
                providers.insert(
                    name.to_string(),
                    ProviderConfig {
                        base_url,
                        api_key: var(&format!("{}_API_KEY", tool.env_prefix)),
                    },
                );
            }

            let deadline_var = format!("TURNWISE_DEADLINE_{}_MS", name.to_ascii_uppercase());
            if let Some(raw) = var(&deadline_var) {
                let millis: u64 = parse_number(&deadline_var, &raw)?;
                if millis == 0 {
                    return Err(ConfigError::Invalid {
                        var: deadline_var,
                        value: raw,
                    });
                }
                deadlines.insert(name.to_string(), Duration::from_millis(millis));
            }
        }

        Ok(Self {
            model,
            providers,
            deadlines,
            system_prompt: var("TURNWISE_SYSTEM_PROMPT"),
        })
    }
}

fn parse_number<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var: var.to_string(),
        value: raw.to_string(),
    })
}
