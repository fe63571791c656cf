//! Effect executor for turns
//!
//! Each turn runs as one task: it loops over events, feeds them to
//! `transition`, and executes the effects. The only suspension points are
//! the model stream and the deadline-bounded capability call.

use super::{transition, Effect, TransitionError, TurnEvent, TurnState, MODEL_FAILURE_APOLOGY};
use crate::capability::{
    call_with_deadline, Capability, CapabilityContext, CapabilityRegistry, FailureReason,
    ParameterSchema, ProviderError, ToolInvocationRequest, ToolResult,
};
use crate::channel::{response_channel, ChannelClosed, FrameReceiver, FrameSender, Renderable};
use crate::history::{ConversationEntry, HistoryError, HistoryStore, ProposalHandle};
use crate::llm::{ModelClient, ModelEvent, ModelEventStream};
use crate::system_prompt::{build_system_prompt, BASE_PROMPT};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Channel(#[from] ChannelClosed),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("turn stalled in state {0}")]
    Stalled(String),
    #[error("turn task failed: {0}")]
    TaskFailed(String),
}

/// What a completed turn committed
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub conversation_id: String,
    /// The user entry followed by the entries committed with it
    pub committed: Vec<ConversationEntry>,
    pub history_version: u64,
    /// Outcome of the capability call, if the model requested one
    pub tool_result: Option<ToolResult>,
    /// The model failed and the turn committed an apology
    pub model_failed: bool,
}

/// A turn running on its own task
#[derive(Debug)]
pub struct TurnHandle {
    conversation_id: String,
    frames: FrameReceiver,
    task: JoinHandle<Result<TurnReport, TurnError>>,
}

impl TurnHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Receiver for this turn's frames
    pub fn frames(&self) -> FrameReceiver {
        self.frames.clone()
    }

    /// Stop the turn. An uncommitted proposal is discarded.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub async fn join(self) -> Result<TurnReport, TurnError> {
        self.task
            .await
            .map_err(|e| TurnError::TaskFailed(e.to_string()))?
    }
}

/// Runs turns for any number of conversations. Cheap to clone.
#[derive(Clone)]
pub struct TurnOrchestrator {
    store: HistoryStore,
    model: Arc<dyn ModelClient>,
    registry: Arc<CapabilityRegistry>,
    system_prompt: Arc<str>,
}

impl TurnOrchestrator {
    /// Uses the built-in base prompt with today's date
    pub fn new(
        store: HistoryStore,
        model: Arc<dyn ModelClient>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        let today = chrono::Local::now().date_naive();
        let system_prompt = build_system_prompt(BASE_PROMPT, &registry, today);
        Self {
            store,
            model,
            registry,
            system_prompt: system_prompt.into(),
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into().into();
        self
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Propose the user's message and start the turn on a new task.
    ///
    /// Fails immediately with a conflict if the conversation already has a
    /// turn in flight.
    pub fn submit(
        &self,
        conversation_id: &str,
        text: impl Into<String>,
    ) -> Result<TurnHandle, TurnError> {
        let (sender, frames) = response_channel();
        let runner = self.start(conversation_id, text.into(), sender)?;
        Ok(TurnHandle {
            conversation_id: conversation_id.to_string(),
            frames,
            task: tokio::spawn(runner.run()),
        })
    }

    /// Run a turn on the current task, pushing frames to `sender`
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        text: impl Into<String>,
        sender: FrameSender,
    ) -> Result<TurnReport, TurnError> {
        self.start(conversation_id, text.into(), sender)?.run().await
    }

    fn start(
        &self,
        conversation_id: &str,
        text: String,
        sender: FrameSender,
    ) -> Result<TurnRunner, TurnError> {
        let user_entry = ConversationEntry::user(text.clone());
        let handle = self.store.propose(conversation_id, user_entry.clone()).map_err(|e| {
            tracing::warn!(conv_id = %conversation_id, error = %e, "Rejected user message");
            e
        })?;

        Ok(TurnRunner {
            conversation_id: conversation_id.to_string(),
            text,
            user_entry,
            orchestrator: self.clone(),
            sender,
            guard: ProposalGuard {
                store: self.store.clone(),
                handle,
                resolved: false,
            },
            state: TurnState::Idle,
            stream: None,
            queue: VecDeque::new(),
            committed: Vec::new(),
            history_version: 0,
            tool_result: None,
            model_failed: false,
        })
    }
}

/// Discards the proposal on drop unless it was committed
struct ProposalGuard {
    store: HistoryStore,
    handle: ProposalHandle,
    resolved: bool,
}

impl Drop for ProposalGuard {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        match self.store.discard(&self.handle) {
            Ok(()) => tracing::warn!(
                conv_id = %self.handle.conversation_id(),
                proposal_id = self.handle.proposal_id(),
                "Discarded uncommitted proposal"
            ),
            Err(e) => tracing::debug!(error = %e, "Proposal already resolved"),
        }
    }
}

struct TurnRunner {
    conversation_id: String,
    text: String,
    user_entry: ConversationEntry,
    orchestrator: TurnOrchestrator,
    sender: FrameSender,
    guard: ProposalGuard,
    state: TurnState,
    stream: Option<ModelEventStream>,
    queue: VecDeque<TurnEvent>,
    committed: Vec<ConversationEntry>,
    history_version: u64,
    tool_result: Option<ToolResult>,
    model_failed: bool,
}

impl TurnRunner {
    async fn run(mut self) -> Result<TurnReport, TurnError> {
        tracing::info!(conv_id = %self.conversation_id, "Turn started");
        let result = self.drive().await;

        if let Err(e) = &result {
            tracing::error!(
                conv_id = %self.conversation_id,
                state = %self.state,
                error = %e,
                "Turn aborted"
            );
            if !self.sender.is_closed() {
                let _ = self.sender.push_final(Renderable::apology(MODEL_FAILURE_APOLOGY));
            }
        }
        result
    }

    async fn drive(&mut self) -> Result<TurnReport, TurnError> {
        let text = std::mem::take(&mut self.text);
        self.queue.push_back(TurnEvent::UserInput { text });

        loop {
            let event = match self.queue.pop_front() {
                Some(event) => event,
                None => self.next_model_event().await?,
            };

            let result = match transition(&self.state, event) {
                Ok(result) => result,
                Err(TransitionError::InvalidTransition(detail)) => {
                    tracing::warn!(
                        conv_id = %self.conversation_id,
                        state = %self.state,
                        detail = %detail,
                        "Ignoring event"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            tracing::debug!(
                conv_id = %self.conversation_id,
                from = %self.state,
                to = %result.new_state,
                "Turn transition"
            );
            self.state = result.new_state;
            if !self.state.is_model_phase() {
                self.stream = None;
            }

            for effect in result.effects {
                self.execute(effect).await?;
            }

            if self.state == TurnState::Idle {
                return Ok(self.report());
            }
        }
    }

    async fn next_model_event(&mut self) -> Result<TurnEvent, TurnError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TurnError::Stalled(self.state.to_string()));
        };
        Ok(match stream.next().await {
            Some(Ok(ModelEvent::TextDelta { text, is_final })) => TurnEvent::TextDelta { text, is_final },
            Some(Ok(ModelEvent::ToolCall(request))) => TurnEvent::ToolRequested { request },
            Some(Ok(ModelEvent::Malformed { detail })) => self.model_failure(detail),
            Some(Err(e)) => self.model_failure(e.to_string()),
            None => TurnEvent::StreamEnded,
        })
    }

    fn model_failure(&mut self, detail: String) -> TurnEvent {
        tracing::warn!(
            conv_id = %self.conversation_id,
            state = %self.state,
            detail = %detail,
            "Model failed"
        );
        self.model_failed = true;
        TurnEvent::ModelFailed { detail }
    }

    async fn execute(&mut self, effect: Effect) -> Result<(), TurnError> {
        match effect {
            Effect::RequestModel => {
                let mut history = self.orchestrator.store.snapshot(&self.conversation_id);
                history.push(self.user_entry.clone());
                match self
                    .orchestrator
                    .model
                    .invoke(&self.orchestrator.system_prompt, &history)
                    .await
                {
                    Ok(stream) => self.stream = Some(stream),
                    Err(e) => {
                        let event = self.model_failure(e.to_string());
                        self.queue.push_back(event);
                    }
                }
            }

            Effect::PushInterim { frame } => self.sender.push_interim(frame)?,

            Effect::AnnounceTool { request } => {
                let capability = self.resolve(&request.name);
                let frame = Renderable::Working {
                    status: capability.working_status(&request.arguments),
                    placeholder: capability.placeholder(),
                };
                tracing::info!(
                    conv_id = %self.conversation_id,
                    tool = %request.name,
                    tool_id = %request.id,
                    "Dispatching tool"
                );
                self.sender.push_interim(frame)?;
            }

            Effect::ExecuteTool { request } => {
                let event = self.execute_tool(request).await;
                self.queue.push_back(event);
            }

            Effect::Commit { entries } => {
                let version = self
                    .orchestrator
                    .store
                    .commit(&self.guard.handle, entries.clone())?;
                self.guard.resolved = true;
                self.history_version = version;
                self.committed.push(self.user_entry.clone());
                self.committed.extend(entries);
                tracing::info!(
                    conv_id = %self.conversation_id,
                    version,
                    entries = self.committed.len(),
                    "Turn committed"
                );
                self.queue.push_back(TurnEvent::Committed);
            }

            Effect::PushFinal { frame } => self.sender.push_final(frame)?,
        }
        Ok(())
    }

    /// Registered capability, or a stand-in for names the registry lacks
    fn resolve(&self, name: &str) -> Arc<dyn Capability> {
        match self.orchestrator.registry.lookup(name) {
            Ok(entry) => Arc::clone(entry.capability()),
            Err(_) => Arc::new(Unregistered::new(name)),
        }
    }

    async fn execute_tool(&mut self, request: ToolInvocationRequest) -> TurnEvent {
        let (capability, outcome) = match self.orchestrator.registry.lookup(&request.name) {
            Err(e) => {
                tracing::warn!(conv_id = %self.conversation_id, tool = %request.name, "Unknown tool requested");
                let reason = FailureReason::InvalidArguments {
                    detail: e.to_string(),
                };
                (self.resolve(&request.name), Err(reason))
            }
            Ok(entry) => {
                let capability = Arc::clone(entry.capability());
                let outcome = match entry.parameters().validate(&request.arguments) {
                    Err(e) => {
                        tracing::warn!(
                            conv_id = %self.conversation_id,
                            tool = %request.name,
                            error = %e,
                            "Tool arguments rejected"
                        );
                        Err(FailureReason::InvalidArguments {
                            detail: e.to_string(),
                        })
                    }
                    Ok(arguments) => {
                        call_with_deadline(
                            Arc::clone(&capability),
                            arguments,
                            entry.deadline(),
                            &self.conversation_id,
                        )
                        .await
                    }
                };
                (capability, outcome)
            }
        };

        let args = &request.arguments;
        let (result, summary, view) = match outcome {
            Ok(payload) => (
                ToolResult::success(&request, payload.clone()),
                capability.summarize(args, &payload),
                Renderable::ToolView {
                    tool: request.name.clone(),
                    placeholder: capability.placeholder(),
                    data: payload,
                },
            ),
            Err(reason) => (
                ToolResult::failure(&request, reason.clone()),
                capability.failure_summary(args, &reason),
                Renderable::apology(capability.apology(args)),
            ),
        };
        tracing::info!(
            conv_id = %self.conversation_id,
            tool = %request.name,
            tool_id = %request.id,
            success = result.outcome.is_success(),
            "Tool settled"
        );
        self.tool_result = Some(result.clone());
        TurnEvent::ToolSettled {
            result,
            summary,
            view,
        }
    }

    fn report(&self) -> TurnReport {
        TurnReport {
            conversation_id: self.conversation_id.clone(),
            committed: self.committed.clone(),
            history_version: self.history_version,
            tool_result: self.tool_result.clone(),
            model_failed: self.model_failed,
        }
    }
}

/// Stand-in giving an unknown tool name the default texts
struct Unregistered {
    name: String,
    schema: ParameterSchema,
}

impl Unregistered {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: ParameterSchema::new(),
        }
    }
}

#[async_trait]
impl Capability for Unregistered {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        String::new()
    }

    fn parameters(&self) -> &ParameterSchema {
        &self.schema
    }

    async fn invoke(&self, _args: Value, _ctx: CapabilityContext) -> Result<Value, ProviderError> {
        Err(ProviderError::Other(format!("`{}` is not registered", self.name)))
    }
}
