//! Deadline-bounded capability invocation

use super::{Capability, CapabilityContext, FailureReason, ProviderError};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Spawned handler that is cancelled and aborted when dropped
struct HandlerTask {
    handle: JoinHandle<Result<Value, ProviderError>>,
    _cancel: DropGuard,
}

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run a capability with a deadline.
///
/// The handler runs on its own task and races a timer. If the timer wins, or
/// the caller stops waiting, the handler's token is cancelled and its task
/// aborted, so a late result never reaches anyone. A tie goes to the timer.
pub async fn call_with_deadline(
    capability: Arc<dyn Capability>,
    arguments: Value,
    deadline: Duration,
    conversation_id: &str,
) -> Result<Value, FailureReason> {
    let cancel = CancellationToken::new();
    let ctx = CapabilityContext {
        cancel: cancel.clone(),
        deadline,
        conversation_id: conversation_id.to_string(),
    };
    let name = capability.name().to_string();
    let started = Instant::now();

    let mut task = HandlerTask {
        handle: tokio::spawn(async move { capability.invoke(arguments, ctx).await }),
        _cancel: cancel.drop_guard(),
    };

    let outcome = tokio::select! {
        biased;

        () = tokio::time::sleep(deadline) => {
            drop(task);
            tracing::warn!(
                capability = %name,
                conversation_id = %conversation_id,
                deadline_ms = %deadline.as_millis(),
                "Capability deadline elapsed"
            );
            return Err(FailureReason::Timeout);
        }

        joined = &mut task.handle => joined,
    };

    let elapsed_ms = started.elapsed().as_millis();
    match outcome {
        Ok(Ok(payload)) => {
            tracing::info!(capability = %name, elapsed_ms = %elapsed_ms, "Capability completed");
            Ok(payload)
        }
        Ok(Err(error)) => {
            tracing::warn!(capability = %name, elapsed_ms = %elapsed_ms, error = %error, "Capability failed");
            Err(provider_failure(&error))
        }
        Err(join_error) => {
            tracing::error!(capability = %name, error = %join_error, "Capability task failed");
            Err(FailureReason::ProviderError {
                detail: if join_error.is_panic() {
                    "capability panicked".to_string()
                } else {
                    "capability task was cancelled".to_string()
                },
            })
        }
    }
}

fn provider_failure(error: &ProviderError) -> FailureReason {
    FailureReason::ProviderError {
        detail: error.to_string(),
    }
}
