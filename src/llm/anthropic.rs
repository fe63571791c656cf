//! Anthropic Messages API adapter (streaming)

use super::{LlmError, ModelClient, ModelEvent, ModelEventStream, ToolDefinition};
use crate::capability::{ToolInvocationRequest, ToolOutcome};
use crate::config::ModelConfig;
use crate::history::{ConversationEntry, EntryContent, Role};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::time::Duration;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    tools: Vec<ToolDefinition>,
}

impl AnthropicClient {
    pub fn new(config: &ModelConfig, client: Client) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::auth("ANTHROPIC_API_KEY is not set"))?;
        let base_url = match &config.gateway {
            Some(gw) => format!("{}/_/gateway/anthropic/v1/messages", gw.trim_end_matches('/')),
            None => API_URL.to_string(),
        };
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url,
            max_tokens: config.max_tokens,
            tools: Vec::new(),
        })
    }

    /// Tools offered with every request
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    fn translate_request(&self, system_prompt: &str, history: &[ConversationEntry]) -> AnthropicRequest {
        let tools: Vec<AnthropicTool> = self
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: system_prompt.to_string(),
            messages: translate_history(history),
            tools: if tools.is_empty() { None } else { Some(tools) },
            stream: true,
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn invoke(
        &self,
        system_prompt: &str,
        history: &[ConversationEntry],
    ) -> Result<ModelEventStream, LlmError> {
        let request = self.translate_request(system_prompt, history);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
            return Err(classify_error(status, &body));
        }

        Ok(decode_stream(response.bytes_stream()))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = body.to_string();
    match status.as_u16() {
        401 | 403 => LlmError::auth(format!("Authentication failed: {message}")),
        429 => {
            let mut err = LlmError::rate_limit(format!("Rate limited: {message}"));
            if let Some(retry_after) = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|parsed| parsed.pointer("/error/retry_after").and_then(serde_json::Value::as_f64))
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            {
                err = err.with_retry_after(retry_after);
            }
            err
        }
        400 => LlmError::invalid_request(format!("Invalid request: {message}")),
        500..=599 => LlmError::server_error(format!("Server error: {message}")),
        _ => LlmError::unknown(format!("HTTP {status}: {message}")),
    }
}

/// Convert history into alternating provider messages.
///
/// Tool calls become assistant `tool_use` blocks and tool results user
/// `tool_result` blocks; consecutive entries of the same side are merged.
fn translate_history(history: &[ConversationEntry]) -> Vec<AnthropicMessage> {
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for entry in history {
        let (role, block) = match (&entry.role, &entry.content) {
            (_, EntryContent::Text { text }) if text.is_empty() => continue,
            (Role::Assistant, EntryContent::Text { text }) => {
                ("assistant", AnthropicContentBlock::Text { text: text.clone() })
            }
            (_, EntryContent::Text { text }) => {
                ("user", AnthropicContentBlock::Text { text: text.clone() })
            }
            (_, EntryContent::ToolCall { id, name, args }) => (
                "assistant",
                AnthropicContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: args.clone(),
                },
            ),
            (_, EntryContent::ToolResult { id, outcome, .. }) => {
                let (content, is_error) = match outcome {
                    ToolOutcome::Success { payload } => (payload.to_string(), false),
                    ToolOutcome::Failure { reason } => (reason.describe(), true),
                };
                (
                    "user",
                    AnthropicContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content,
                        is_error,
                    },
                )
            }
        };

        match messages.last_mut() {
            Some(last) if last.role == role => last.content.push(block),
            _ => messages.push(AnthropicMessage {
                role: role.to_string(),
                content: vec![block],
            }),
        }
    }

    messages
}

/// Decode a server-sent event byte stream into model events
fn decode_stream<S, B, E>(bytes: S) -> ModelEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        sse: Box::pin(bytes.eventsource()),
        decoder: SseDecoder::default(),
        queued: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queued.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.sse.next().await {
                Some(Ok(event)) => match st.decoder.feed(&event.event, &event.data) {
                    Ok(events) => {
                        st.queued.extend(events.into_iter().map(Ok));
                        st.done = st.decoder.finished;
                    }
                    Err(e) => {
                        st.queued.push_back(Err(e));
                        st.done = true;
                    }
                },
                Some(Err(e)) => {
                    st.queued.push_back(Err(LlmError::network(format!("SSE error: {e}"))));
                    st.done = true;
                }
                None => {
                    if !st.decoder.finished {
                        st.queued.push_back(Err(LlmError::network(
                            "stream closed before response completed",
                        )));
                    }
                    st.done = true;
                }
            }
        }
    }))
}

struct DecodeState<T> {
    sse: std::pin::Pin<Box<T>>,
    decoder: SseDecoder,
    queued: VecDeque<Result<ModelEvent, LlmError>>,
    done: bool,
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    json: String,
}

/// Stateful decoder for one response's events
#[derive(Debug, Default)]
struct SseDecoder {
    tool_blocks: HashMap<usize, PendingToolUse>,
    finished: bool,
}

impl SseDecoder {
    fn feed(&mut self, event: &str, data: &str) -> Result<Vec<ModelEvent>, LlmError> {
        match event {
            "content_block_start" => {
                let start: ContentBlockStart = parse(data)?;
                if let StartBlock::ToolUse { id, name } = start.content_block {
                    self.tool_blocks.insert(
                        start.index,
                        PendingToolUse {
                            id,
                            name,
                            json: String::new(),
                        },
                    );
                }
                Ok(Vec::new())
            }
            "content_block_delta" => {
                let delta: ContentBlockDelta = parse(data)?;
                match delta.delta {
                    Delta::TextDelta { text } if !text.is_empty() => Ok(vec![ModelEvent::text(text)]),
                    Delta::InputJsonDelta { partial_json } => {
                        if let Some(block) = self.tool_blocks.get_mut(&delta.index) {
                            block.json.push_str(&partial_json);
                        }
                        Ok(Vec::new())
                    }
                    _ => Ok(Vec::new()),
                }
            }
            "content_block_stop" => {
                let stop: ContentBlockStop = parse(data)?;
                Ok(self
                    .tool_blocks
                    .remove(&stop.index)
                    .map(finish_tool_use)
                    .into_iter()
                    .collect())
            }
            "message_stop" => {
                self.finished = true;
                Ok(vec![ModelEvent::final_text("")])
            }
            "error" => {
                self.finished = true;
                let error: StreamError = parse(data)?;
                let message = format!("{}: {}", error.error.r#type, error.error.message);
                Err(if error.error.r#type == "rate_limit_error" {
                    LlmError::rate_limit(message)
                } else {
                    LlmError::server_error(message)
                })
            }
            // message_start, message_delta, ping
            _ => Ok(Vec::new()),
        }
    }
}

fn finish_tool_use(block: PendingToolUse) -> ModelEvent {
    let raw = if block.json.trim().is_empty() { "{}" } else { block.json.as_str() };
    match serde_json::from_str(raw) {
        Ok(arguments) => ModelEvent::ToolCall(ToolInvocationRequest::new(block.id, block.name, arguments)),
        Err(e) => ModelEvent::Malformed {
            detail: format!("tool `{}` arguments are not valid JSON: {e}", block.name),
        },
    }
}

fn parse<'a, T: Deserialize<'a>>(data: &'a str) -> Result<T, LlmError> {
    serde_json::from_str(data)
        .map_err(|e| LlmError::unknown(format!("Failed to parse stream event: {e} - data: {data}")))
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    index: usize,
    content_block: StartBlock,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    index: usize,
    delta: Delta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStop {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    error: StreamErrorBody,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    r#type: String,
    message: String,
}
