//! Model invocation adapter
//!
//! A `ModelClient` turns a system prompt and the committed history into a
//! lazy stream of `ModelEvent`s. Retry policy belongs to the backend, not to
//! the orchestrator.

mod anthropic;
mod error;
mod scripted;
mod types;

pub use anthropic::AnthropicClient;
pub use error::{LlmError, LlmErrorKind};
pub use scripted::ScriptedModel;
pub use types::*;

use crate::history::ConversationEntry;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a response. Errors here mean the request never got going;
    /// errors after that arrive as items of the stream.
    async fn invoke(
        &self,
        system_prompt: &str,
        history: &[ConversationEntry],
    ) -> Result<ModelEventStream, LlmError>;

    fn model_id(&self) -> &str;
}

/// Logging wrapper for model clients
pub struct LoggingModelClient {
    inner: Arc<dyn ModelClient>,
    model_id: String,
}

impl LoggingModelClient {
    pub fn new(inner: Arc<dyn ModelClient>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ModelClient for LoggingModelClient {
    async fn invoke(
        &self,
        system_prompt: &str,
        history: &[ConversationEntry],
    ) -> Result<ModelEventStream, LlmError> {
        let start = Instant::now();
        let result = self.inner.invoke(system_prompt, history).await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(stream) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration_ms,
                    history_len = history.len(),
                    "Model stream opened"
                );
                let model = self.model_id.clone();
                Ok(Box::pin(stream.inspect(move |item| match item {
                    Err(e) => tracing::error!(
                        model = %model,
                        error = %e.message,
                        retryable = e.is_retryable(),
                        elapsed_ms = %start.elapsed().as_millis(),
                        "Model stream failed"
                    ),
                    Ok(ModelEvent::Malformed { detail }) => tracing::warn!(
                        model = %model,
                        detail = %detail,
                        "Model produced malformed output"
                    ),
                    Ok(ModelEvent::TextDelta { is_final: true, .. }) => tracing::info!(
                        model = %model,
                        elapsed_ms = %start.elapsed().as_millis(),
                        "Model response completed"
                    ),
                    Ok(_) => {}
                })))
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration_ms,
                    error = %e.message,
                    retryable = e.is_retryable(),
                    "Model request failed"
                );
                Err(e)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
