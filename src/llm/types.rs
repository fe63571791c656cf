//! Types crossing the model adapter boundary

use super::LlmError;
use crate::capability::ToolInvocationRequest;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Tool offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One item of a model response stream
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// A chunk of assistant text. `is_final` marks the end of the response.
    TextDelta { text: String, is_final: bool },
    ToolCall(ToolInvocationRequest),
    /// The model produced output the adapter could not interpret
    Malformed { detail: String },
}

impl ModelEvent {
    pub fn text(text: impl Into<String>) -> Self {
        ModelEvent::TextDelta {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        ModelEvent::TextDelta {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Finite, non-resumable sequence of model events
pub type ModelEventStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, LlmError>> + Send>>;
