//! Effects produced by turn transitions

use crate::capability::ToolInvocationRequest;
use crate::channel::Renderable;
use crate::history::ConversationEntry;

/// Effects to be executed after a transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Invoke the model with the committed history plus the pending message
    RequestModel,

    /// Replace the current frame
    PushInterim { frame: Renderable },

    /// Push the "working" frame for a capability about to run
    AnnounceTool { request: ToolInvocationRequest },

    /// Look up, validate and run a capability under its deadline
    ExecuteTool { request: ToolInvocationRequest },

    /// Commit the pending proposal followed by these entries
    Commit { entries: Vec<ConversationEntry> },

    /// Push the closing frame
    PushFinal { frame: Renderable },
}

impl Effect {
    pub fn interim_text(text: impl Into<String>) -> Self {
        Effect::PushInterim {
            frame: Renderable::text(text),
        }
    }

    pub fn final_frame(frame: Renderable) -> Self {
        Effect::PushFinal { frame }
    }
}
