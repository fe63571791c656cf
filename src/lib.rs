//! turnwise - conversational turn orchestration
//!
//! Drives one user turn at a time per conversation: the model either streams
//! text or requests a capability, capabilities run under per-tool deadlines,
//! progress is published on a latest-frame-wins channel, and the outcome of
//! every turn is committed to an append-only history exactly once.

pub mod capability;
pub mod channel;
pub mod config;
pub mod history;
pub mod llm;
pub mod system_prompt;
pub mod turn;

pub use capability::{
    Capability, CapabilityContext, CapabilityRegistry, FailureReason, ToolInvocationRequest,
    ToolOutcome, ToolResult,
};
pub use channel::{response_channel, FrameKind, FrameReceiver, FrameSender, Renderable, StreamFrame};
pub use config::EngineConfig;
pub use history::{ConversationEntry, HistoryError, HistoryStore, ProposalHandle, Role};
pub use llm::{LlmError, ModelClient, ModelEvent};
pub use turn::{TurnError, TurnHandle, TurnOrchestrator, TurnReport, TurnState};
