//! Turn states

use crate::capability::ToolInvocationRequest;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum TurnState {
    /// No turn in flight
    #[default]
    Idle,
    /// Model invoked, nothing received yet
    AwaitingModel,
    /// Text deltas arriving; `text` is everything received so far
    Streaming { text: String },
    /// A capability is running
    ExecutingTool { request: ToolInvocationRequest },
    /// The turn's entries are being committed
    Committing { reason: CommitReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitReason {
    AssistantText,
    ToolSettled,
    ModelFailure,
}

impl TurnState {
    /// States in which the model stream is being consumed
    pub fn is_model_phase(&self) -> bool {
        matches!(self, TurnState::AwaitingModel | TurnState::Streaming { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::AwaitingModel => "awaiting_model",
            TurnState::Streaming { .. } => "streaming",
            TurnState::ExecutingTool { .. } => "executing_tool",
            TurnState::Committing { .. } => "committing",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
