//! Turn history
//!
//! Append-only conversation log with a single-proposal commit protocol.

mod entry;
mod store;

pub use entry::{ConversationEntry, EntryContent, Role};
pub use store::{HistoryError, HistoryStore, ProposalHandle, TurnHistory};
