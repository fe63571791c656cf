//! System prompt construction
//!
//! The prompt is the base instructions followed by a catalog of the
//! registered capabilities and today's date.

use crate::capability::CapabilityRegistry;
use chrono::NaiveDate;
use std::fmt::Write;

/// Base system prompt establishing the assistant's role
pub const BASE_PROMPT: &str = r"You are a friendly assistant in a chat conversation. Answer briefly and conversationally.

When a question needs live information (the weather, news, places, movies, web results or GIFs), call the matching tool instead of guessing. Call at most one tool per reply, and pass the place or query the user mentioned as the tool's argument.

If a tool result says the request failed, tell the user plainly and do not invent an answer.";

pub fn build_system_prompt(base: &str, registry: &CapabilityRegistry, today: NaiveDate) -> String {
    let mut prompt = base.trim_end().to_string();

    let definitions = registry.definitions();
    if definitions.is_empty() {
        prompt.push_str("\n\nNo tools are available in this conversation; answer from your own knowledge.");
    } else {
        prompt.push_str("\n\n<tools>\n");
        for def in &definitions {
            let _ = writeln!(prompt, "- {}: {}", def.name, def.description);
        }
        prompt.push_str("</tools>");
    }

    let _ = write!(prompt, "\n\nToday's date is {}.", today.format("%A, %B %-d, %Y"));
    prompt
}
