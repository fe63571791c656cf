//! Model client replaying queued scripts
//!
//! Used by tests and by the binary's offline mode. Each `invoke` pops the
//! next script; with the queue empty it echoes the last user message when
//! echo is enabled and fails otherwise.

use super::{LlmError, ModelClient, ModelEvent, ModelEventStream};
use crate::history::{ConversationEntry, Role};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

enum Script {
    Events(Vec<Result<ModelEvent, LlmError>>),
    /// Emit the events, then never finish
    Stall(Vec<ModelEvent>),
    Refuse(LlmError),
}

/// What a scripted model was called with
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub system_prompt: String,
    pub history: Vec<ConversationEntry>,
}

#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Script>>,
    invocations: Mutex<Vec<Invocation>>,
    echo: bool,
    delta_delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer unscripted calls by echoing the last user message
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Sleep this long before each event
    #[must_use]
    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = Some(delay);
        self
    }

    pub fn push_script(&self, events: Vec<ModelEvent>) {
        self.push(Script::Events(events.into_iter().map(Ok).collect()));
    }

    /// Script whose stream yields these items, errors included
    pub fn push_items(&self, items: Vec<Result<ModelEvent, LlmError>>) {
        self.push(Script::Events(items));
    }

    pub fn push_stall(&self, events: Vec<ModelEvent>) {
        self.push(Script::Stall(events));
    }

    /// Next call fails before a stream is opened
    pub fn push_failure(&self, error: LlmError) {
        self.push(Script::Refuse(error));
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
    }

    fn next_script(&self, history: &[ConversationEntry]) -> Script {
        let queued = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match queued {
            Some(script) => script,
            None if self.echo => Script::Events(echo_events(history)),
            None => Script::Refuse(LlmError::unknown("no scripted response queued")),
        }
    }

    fn paced<S>(&self, items: S) -> ModelEventStream
    where
        S: futures::Stream<Item = Result<ModelEvent, LlmError>> + Send + 'static,
    {
        match self.delta_delay {
            Some(delay) => Box::pin(items.then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            })),
            None => Box::pin(items),
        }
    }
}

fn echo_events(history: &[ConversationEntry]) -> Vec<Result<ModelEvent, LlmError>> {
    let said = history
        .iter()
        .rev()
        .find(|e| e.role == Role::User)
        .and_then(ConversationEntry::text)
        .unwrap_or_default();
    let reply = format!("You said: {said}");

    let words: Vec<&str> = reply.split_inclusive(' ').collect();
    let last = words.len().saturating_sub(1);
    words
        .into_iter()
        .enumerate()
        .map(|(i, word)| {
            Ok(ModelEvent::TextDelta {
                text: word.to_string(),
                is_final: i == last,
            })
        })
        .collect()
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn invoke(
        &self,
        system_prompt: &str,
        history: &[ConversationEntry],
    ) -> Result<ModelEventStream, LlmError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Invocation {
                system_prompt: system_prompt.to_string(),
                history: history.to_vec(),
            });

        match self.next_script(history) {
            Script::Events(items) => Ok(self.paced(stream::iter(items))),
            Script::Stall(events) => Ok(self.paced(
                stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
            )),
            Script::Refuse(error) => Err(error),
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}
