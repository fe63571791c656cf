//! Pure turn transition function
//!
//! Given the same state and event it always produces the same new state and
//! effects. It never touches the store, the model or the channel.

use super::{CommitReason, Effect, TurnEvent, TurnState};
use crate::capability::ToolInvocationRequest;
use crate::channel::Renderable;
use crate::history::ConversationEntry;
use thiserror::Error;

/// Shown and committed when the model fails or answers with nothing
pub const MODEL_FAILURE_APOLOGY: &str = "Sorry, something went wrong. Please try again.";

#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A turn is already in progress")]
    TurnInProgress,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(state: &TurnState, event: TurnEvent) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        (TurnState::Idle, TurnEvent::UserInput { .. }) => {
            Ok(TransitionResult::new(TurnState::AwaitingModel).with_effect(Effect::RequestModel))
        }
        (_, TurnEvent::UserInput { .. }) => Err(TransitionError::TurnInProgress),

        // Text streaming
        (TurnState::AwaitingModel, TurnEvent::TextDelta { text, is_final: false }) => {
            Ok(TransitionResult::new(TurnState::Streaming { text: text.clone() })
                .with_effect(Effect::interim_text(text)))
        }
        (TurnState::AwaitingModel, TurnEvent::TextDelta { text, is_final: true }) => {
            Ok(finish_text(text))
        }
        (TurnState::Streaming { text: so_far }, TurnEvent::TextDelta { text, is_final }) => {
            let mut full = so_far.clone();
            full.push_str(&text);
            if is_final {
                Ok(finish_text(full))
            } else {
                Ok(TransitionResult::new(TurnState::Streaming { text: full.clone() })
                    .with_effect(Effect::interim_text(full)))
            }
        }
        (TurnState::Streaming { text }, TurnEvent::StreamEnded) => Ok(finish_text(text.clone())),
        (TurnState::AwaitingModel, TurnEvent::StreamEnded) => Ok(model_failure()),

        // Tool request; text streamed before it is not kept
        (
            TurnState::AwaitingModel | TurnState::Streaming { .. },
            TurnEvent::ToolRequested { request },
        ) => Ok(start_tool(request)),

        (TurnState::AwaitingModel | TurnState::Streaming { .. }, TurnEvent::ModelFailed { .. }) => {
            Ok(model_failure())
        }

        // Tool settlement commits call, result and summary together
        (
            TurnState::ExecutingTool { request },
            TurnEvent::ToolSettled {
                result,
                summary,
                view,
            },
        ) => {
            if result.id != request.id {
                return Err(TransitionError::InvalidTransition(format!(
                    "tool result {} does not answer request {}",
                    result.id, request.id
                )));
            }
            let entries = vec![
                ConversationEntry::tool_call(request),
                ConversationEntry::tool_result(&result),
                ConversationEntry::assistant(summary),
            ];
            Ok(TransitionResult::new(TurnState::Committing {
                reason: CommitReason::ToolSettled,
            })
            .with_effect(Effect::Commit { entries })
            .with_effect(Effect::final_frame(view)))
        }

        (TurnState::Committing { .. }, TurnEvent::Committed) => {
            Ok(TransitionResult::new(TurnState::Idle))
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {state}"
        ))),
    }
}

fn finish_text(text: String) -> TransitionResult {
    if text.trim().is_empty() {
        return model_failure();
    }
    TransitionResult::new(TurnState::Committing {
        reason: CommitReason::AssistantText,
    })
    .with_effect(Effect::Commit {
        entries: vec![ConversationEntry::assistant(text.clone())],
    })
    .with_effect(Effect::final_frame(Renderable::text(text)))
}

fn model_failure() -> TransitionResult {
    TransitionResult::new(TurnState::Committing {
        reason: CommitReason::ModelFailure,
    })
    .with_effect(Effect::Commit {
        entries: vec![ConversationEntry::assistant(MODEL_FAILURE_APOLOGY)],
    })
    .with_effect(Effect::final_frame(Renderable::apology(MODEL_FAILURE_APOLOGY)))
}

fn start_tool(request: ToolInvocationRequest) -> TransitionResult {
    TransitionResult::new(TurnState::ExecutingTool {
        request: request.clone(),
    })
    .with_effect(Effect::AnnounceTool {
        request: request.clone(),
    })
    .with_effect(Effect::ExecuteTool { request })
}
