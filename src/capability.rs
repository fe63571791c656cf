//! Capabilities (tools) the model may request
//!
//! A capability validates its arguments against a `ParameterSchema`, runs
//! under a per-tool deadline with a cancellation token, and supplies the
//! human-readable texts shown while it runs and after it settles.

pub mod catalog;
mod http;
mod invoker;
mod registry;
mod schema;

pub use http::{CapabilitySpec, HttpCapability, HttpProvider};
pub use invoker::call_with_deadline;
pub use registry::{
    CapabilityRegistry, CapabilityRegistryBuilder, RegisteredCapability, RegistryError,
    DEFAULT_DEADLINE,
};
pub use schema::{Field, FieldKind, ParameterSchema, SchemaError};

use crate::channel::Placeholder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Payload text longer than this is elided in summaries
const SUMMARY_PAYLOAD_LIMIT: usize = 1_000;

/// A structured request from the model to run a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolInvocationRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Why a tool call did not produce a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    InvalidArguments { detail: String },
    Timeout,
    ProviderError { detail: String },
}

impl FailureReason {
    /// Clause completing "I tried to ..., but ..."
    pub fn describe(&self) -> String {
        match self {
            FailureReason::InvalidArguments { detail } => {
                format!("the request was invalid ({detail})")
            }
            FailureReason::Timeout => "the request timed out".to_string(),
            FailureReason::ProviderError { detail } => {
                format!("the provider returned an error ({detail})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    Failure { reason: FailureReason },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(request: &ToolInvocationRequest, payload: Value) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Success { payload },
        }
    }

    pub fn failure(request: &ToolInvocationRequest, reason: FailureReason) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Failure { reason },
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match &self.outcome {
            ToolOutcome::Failure { reason } => Some(reason),
            ToolOutcome::Success { .. } => None,
        }
    }
}

/// Failure reported by a capability's underlying provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("provider failed with status {status}")]
    Upstream { status: u16 },
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("call was cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Per-invocation context handed to a capability
#[derive(Debug, Clone)]
pub struct CapabilityContext {
    /// Cancelled when the deadline fires; long calls should stop early
    pub cancel: CancellationToken,
    pub deadline: Duration,
    pub conversation_id: String,
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    /// Description shown to the model
    fn description(&self) -> String;

    fn parameters(&self) -> &ParameterSchema;

    /// Deadline used when the registry is not told otherwise
    fn default_deadline(&self) -> Duration {
        DEFAULT_DEADLINE
    }

    fn placeholder(&self) -> Placeholder {
        Placeholder::Generic
    }

    /// Verb phrase for the attempted action, e.g. "get the weather"
    fn action(&self) -> String {
        format!("use {}", self.name())
    }

    /// What the call is about, e.g. the location or the query
    fn subject(&self, args: &Value) -> String {
        args.as_object()
            .and_then(|map| map.values().find_map(Value::as_str))
            .map_or_else(|| "your request".to_string(), subject_or_default)
    }

    /// Status line for the interim "working" frame
    fn working_status(&self, args: &Value) -> String {
        format!("Working to {} for {}...", self.action(), self.subject(args))
    }

    /// Restatement of a successful result for the model's future context
    fn summarize(&self, args: &Value, payload: &Value) -> String {
        format!(
            "I used {} for {}. Result: {}",
            self.name(),
            self.subject(args),
            truncate_payload(payload)
        )
    }

    /// Restatement of a failure for the model's future context
    fn failure_summary(&self, args: &Value, reason: &FailureReason) -> String {
        format!(
            "I tried to {} for {}, but {}.",
            self.action(),
            self.subject(args),
            reason.describe()
        )
    }

    /// User-facing apology. Never contains raw error text.
    fn apology(&self, args: &Value) -> String {
        format!(
            "Sorry, I couldn't {} for {}. Please try again later.",
            self.action(),
            self.subject(args)
        )
    }

    async fn invoke(&self, args: Value, ctx: CapabilityContext) -> Result<Value, ProviderError>;
}

fn subject_or_default(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.is_empty() {
        "your request".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Compact JSON, elided past `SUMMARY_PAYLOAD_LIMIT` characters
pub(crate) fn truncate_payload(payload: &Value) -> String {
    let rendered = payload.to_string();
    if rendered.chars().count() <= SUMMARY_PAYLOAD_LIMIT {
        return rendered;
    }
    let mut truncated: String = rendered.chars().take(SUMMARY_PAYLOAD_LIMIT).collect();
    truncated.push_str("...");
    truncated
}
