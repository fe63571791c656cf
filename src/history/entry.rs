//! Conversation entry types

use crate::capability::{ToolInvocationRequest, ToolOutcome, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Entry payload, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryContent {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        name: String,
        outcome: ToolOutcome,
    },
}

/// One logical step in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: EntryContent,
}

impl ConversationEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: EntryContent::Text { text: text.into() },
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: EntryContent::Text { text: text.into() },
        }
    }

    /// The tool call exactly as the model issued it
    pub fn tool_call(request: &ToolInvocationRequest) -> Self {
        Self {
            role: Role::Assistant,
            content: EntryContent::ToolCall {
                id: request.id.clone(),
                name: request.name.clone(),
                args: request.arguments.clone(),
            },
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: EntryContent::ToolResult {
                id: result.id.clone(),
                name: result.name.clone(),
                outcome: result.outcome.clone(),
            },
        }
    }

    /// Plain text of the entry, if it is a text entry
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            EntryContent::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Tool invocation id for tool-call and tool-result entries
    pub fn tool_id(&self) -> Option<&str> {
        match &self.content {
            EntryContent::ToolCall { id, .. } | EntryContent::ToolResult { id, .. } => Some(id),
            EntryContent::Text { .. } => None,
        }
    }
}
