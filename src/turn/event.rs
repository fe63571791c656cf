//! Events that drive a turn

use crate::capability::{ToolInvocationRequest, ToolResult};
use crate::channel::Renderable;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// The user's message was proposed and the turn may start
    UserInput { text: String },

    // Model events
    TextDelta { text: String, is_final: bool },
    ToolRequested { request: ToolInvocationRequest },
    /// Provider error or malformed output
    ModelFailed { detail: String },
    /// The model stream finished without a final text delta
    StreamEnded,

    // Capability events
    /// The capability settled; `summary` and `view` were rendered by it
    ToolSettled {
        result: ToolResult,
        summary: String,
        view: Renderable,
    },

    /// The store accepted the commit
    Committed,
}
