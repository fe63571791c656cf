//! Test doubles and turn scenarios

use super::TurnOrchestrator;
use crate::capability::{
    Capability, CapabilityContext, CapabilityRegistry, Field, ParameterSchema, ProviderError,
};
use crate::channel::Placeholder;
use crate::history::HistoryStore;
use crate::llm::ScriptedModel;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Weather-like capability that sleeps before answering
pub struct SlowCapability {
    name: &'static str,
    delay: Duration,
    schema: ParameterSchema,
    pub calls: AtomicUsize,
    pub completed: AtomicBool,
    pub cancelled: Arc<AtomicBool>,
}

impl SlowCapability {
    pub fn new(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay,
            schema: ParameterSchema::new()
                .field(Field::string("location", "City or place name").required()),
            calls: AtomicUsize::new(0),
            completed: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Capability for SlowCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> String {
        "Slow weather lookup".to_string()
    }

    fn parameters(&self) -> &ParameterSchema {
        &self.schema
    }

    fn placeholder(&self) -> Placeholder {
        Placeholder::WeatherCard
    }

    fn action(&self) -> String {
        "get the weather".to_string()
    }

    async fn invoke(&self, args: Value, ctx: CapabilityContext) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::clone(&self.cancelled);
        let token = ctx.cancel.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            cancelled.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(self.delay).await;
        self.completed.store(true, Ordering::SeqCst);
        Ok(serde_json::json!({"location": args["location"], "temp_c": 18}))
    }
}

/// Capability that answers immediately and counts its calls
pub struct CountingCapability {
    name: &'static str,
    schema: ParameterSchema,
    response: Result<Value, ProviderError>,
    pub calls: AtomicUsize,
}

impl CountingCapability {
    pub fn returning(name: &'static str, payload: Value) -> Arc<Self> {
        Self::with_response(name, Ok(payload))
    }

    pub fn failing(name: &'static str, error: ProviderError) -> Arc<Self> {
        Self::with_response(name, Err(error))
    }

    fn with_response(name: &'static str, response: Result<Value, ProviderError>) -> Arc<Self> {
        Arc::new(Self {
            name,
            schema: ParameterSchema::new().field(Field::string("query", "Search query").required()),
            response,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for CountingCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> String {
        format!("Counting {}", self.name)
    }

    fn parameters(&self) -> &ParameterSchema {
        &self.schema
    }

    async fn invoke(&self, _args: Value, _ctx: CapabilityContext) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

/// Orchestrator over an in-memory store and a scripted model
pub struct TestHarness {
    pub store: HistoryStore,
    pub model: Arc<ScriptedModel>,
    pub orchestrator: TurnOrchestrator,
}

impl TestHarness {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self::with_model(registry, ScriptedModel::new())
    }

    pub fn with_model(registry: CapabilityRegistry, model: ScriptedModel) -> Self {
        let store = HistoryStore::new();
        let model = Arc::new(model);
        let orchestrator = TurnOrchestrator::new(store.clone(), model.clone(), Arc::new(registry))
            .with_system_prompt("test prompt");
        Self {
            store,
            model,
            orchestrator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{FailureReason, ToolInvocationRequest, ToolOutcome};
    use crate::channel::{response_channel, Renderable};
    use crate::history::{ConversationEntry, EntryContent, HistoryError, Role};
    use crate::llm::{LlmError, ModelEvent};
    use crate::turn::{TurnError, MODEL_FAILURE_APOLOGY};
    use serde_json::json;

    fn weather_call(location: &str) -> ModelEvent {
        ModelEvent::ToolCall(ToolInvocationRequest::new(
            "toolu_1",
            "get_weather",
            json!({ "location": location }),
        ))
    }

    fn weather_registry(capability: Arc<SlowCapability>, deadline: Duration) -> CapabilityRegistry {
        CapabilityRegistry::builder()
            .register_with_deadline(capability, deadline)
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_paris_weather_timeout_commits_failure() {
        let weather = SlowCapability::new("get_weather", Duration::from_secs(6));
        let harness = TestHarness::new(weather_registry(weather.clone(), Duration::from_secs(5)));
        harness.model.push_script(vec![weather_call("Paris")]);

        let handle = harness.orchestrator.submit("conv", "What's the weather in Paris?").unwrap();
        let mut frames = handle.frames();
        let report = handle.join().await.unwrap();

        let result = report.tool_result.unwrap();
        assert_eq!(result.failure_reason(), Some(&FailureReason::Timeout));

        let final_frame = frames.wait_final().await.unwrap();
        match final_frame.payload {
            Renderable::Apology { message } => assert!(message.contains("Paris"), "{message}"),
            other => panic!("expected apology, got {other:?}"),
        }

        let history = harness.store.snapshot("conv");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], ConversationEntry::user("What's the weather in Paris?"));
        assert!(matches!(history[1].content, EntryContent::ToolCall { .. }));
        assert!(matches!(
            &history[2].content,
            EntryContent::ToolResult { outcome: ToolOutcome::Failure { reason: FailureReason::Timeout }, .. }
        ));
        assert_eq!(history[3].role, Role::Assistant);
        assert!(history[3].text().is_some_and(|t| t.contains("Paris")));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(weather.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_handler_does_not_touch_history() {
        let weather = SlowCapability::new("get_weather", Duration::from_millis(5_001));
        let harness =
            TestHarness::new(weather_registry(weather.clone(), Duration::from_millis(5_000)));
        harness.model.push_script(vec![weather_call("Oslo")]);

        let report = harness
            .orchestrator
            .submit("conv", "Weather in Oslo?")
            .unwrap()
            .join()
            .await
            .unwrap();
        let committed = harness.store.snapshot("conv");
        assert_eq!(committed, report.committed);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!weather.completed.load(Ordering::SeqCst));
        assert_eq!(harness.store.snapshot("conv"), committed);
        assert_eq!(harness.store.version("conv"), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_short_circuits() {
        let search = CountingCapability::returning("web_search", json!([]));
        let harness =
            TestHarness::new(CapabilityRegistry::builder().register(search.clone()).build());
        harness.model.push_script(vec![ModelEvent::ToolCall(ToolInvocationRequest::new(
            "toolu_7",
            "teleport",
            json!({"destination": "Mars"}),
        ))]);

        let handle = harness.orchestrator.submit("conv", "beam me up").unwrap();
        let frames = handle.frames();
        let report = handle.join().await.unwrap();

        assert_eq!(search.call_count(), 0);
        assert!(matches!(
            report.tool_result.and_then(|r| r.failure_reason().cloned()),
            Some(FailureReason::InvalidArguments { .. })
        ));
        assert_eq!(report.committed.len(), 4);
        match frames.current_frame().payload {
            Renderable::Apology { message } => {
                assert!(message.contains("Mars"), "{message}");
                assert!(!message.contains("no capability"), "{message}");
            }
            other => panic!("expected apology, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_handler() {
        let search = CountingCapability::returning("web_search", json!([]));
        let harness =
            TestHarness::new(CapabilityRegistry::builder().register(search.clone()).build());
        harness.model.push_script(vec![ModelEvent::ToolCall(ToolInvocationRequest::new(
            "toolu_2",
            "web_search",
            json!({"q": "rust"}),
        ))]);

        let report = harness.orchestrator.submit("conv", "search").unwrap().join().await.unwrap();
        assert_eq!(search.call_count(), 0);
        assert!(matches!(
            report.tool_result.and_then(|r| r.failure_reason().cloned()),
            Some(FailureReason::InvalidArguments { detail }) if detail.contains("q")
        ));
    }

    #[tokio::test]
    async fn test_successful_tool_commits_three_entries_and_view() {
        let search = CountingCapability::returning("web_search", json!({"hits": ["rust-lang.org"]}));
        let harness =
            TestHarness::new(CapabilityRegistry::builder().register(search.clone()).build());
        harness.model.push_script(vec![
            ModelEvent::text("Let me look that up."),
            ModelEvent::ToolCall(ToolInvocationRequest::new("toolu_3", "web_search", json!({"query": "rust"}))),
            ModelEvent::final_text("ignored"),
        ]);

        let handle = harness.orchestrator.submit("conv", "find rust").unwrap();
        let frames = handle.frames();
        let report = handle.join().await.unwrap();

        assert_eq!(search.call_count(), 1);
        let history = harness.store.snapshot("conv");
        let ids: Vec<_> = history.iter().map(ConversationEntry::tool_id).collect();
        assert_eq!(ids, vec![None, Some("toolu_3"), Some("toolu_3"), None]);
        assert!(history[3].text().is_some_and(|t| t.contains("rust-lang.org")));
        assert_eq!(report.history_version, 1);
        assert!(matches!(
            frames.current_frame().payload,
            Renderable::ToolView { ref tool, .. } if tool == "web_search"
        ));
    }

    #[tokio::test]
    async fn test_provider_error_is_committed_not_raised() {
        let search = CountingCapability::failing("web_search", ProviderError::Upstream { status: 503 });
        let harness = TestHarness::new(CapabilityRegistry::builder().register(search).build());
        harness.model.push_script(vec![ModelEvent::ToolCall(ToolInvocationRequest::new(
            "toolu_4",
            "web_search",
            json!({"query": "rust"}),
        ))]);

        let handle = harness.orchestrator.submit("conv", "search rust").unwrap();
        let frames = handle.frames();
        let report = handle.join().await.unwrap();
        assert!(matches!(
            report.tool_result.and_then(|r| r.failure_reason().cloned()),
            Some(FailureReason::ProviderError { .. })
        ));
        match frames.current_frame().payload {
            Renderable::Apology { message } => assert!(!message.contains("503"), "{message}"),
            other => panic!("expected apology, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_text_reply_streams_and_commits() {
        let harness = TestHarness::new(CapabilityRegistry::empty());
        harness.model.push_script(vec![
            ModelEvent::text("Hel"),
            ModelEvent::text("lo"),
            ModelEvent::final_text("!"),
        ]);

        let handle = harness.orchestrator.submit("conv", "hi").unwrap();
        let mut frames = handle.frames();
        let report = handle.join().await.unwrap();

        assert_eq!(
            report.committed,
            vec![ConversationEntry::user("hi"), ConversationEntry::assistant("Hello!")]
        );
        assert_eq!(frames.wait_final().await.unwrap().payload, Renderable::text("Hello!"));
        assert!(!report.model_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_message_conflicts_while_first_runs() {
        let harness = TestHarness::with_model(
            CapabilityRegistry::empty(),
            ScriptedModel::new().with_delta_delay(Duration::from_millis(100)),
        );
        harness
            .model
            .push_script(vec![ModelEvent::text("one "), ModelEvent::final_text("two")]);

        let first = harness.orchestrator.submit("conv", "first").unwrap();
        let second = harness.orchestrator.submit("conv", "second");
        assert!(matches!(
            second,
            Err(TurnError::History(HistoryError::Conflict { .. }))
        ));

        let report = first.join().await.unwrap();
        assert_eq!(report.committed[1], ConversationEntry::assistant("one two"));
        assert_eq!(harness.model.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_degrades_to_apology() {
        let harness = TestHarness::new(CapabilityRegistry::empty());
        harness.model.push_failure(LlmError::network("connection refused"));
        harness.model.push_script(vec![ModelEvent::final_text("Back again")]);

        let handle = harness.orchestrator.submit("conv", "hello?").unwrap();
        let frames = handle.frames();
        let report = handle.join().await.unwrap();
        assert!(report.model_failed);
        assert_eq!(report.committed[1], ConversationEntry::assistant(MODEL_FAILURE_APOLOGY));
        assert_eq!(
            frames.current_frame().payload,
            Renderable::apology(MODEL_FAILURE_APOLOGY)
        );

        let next = harness.orchestrator.submit("conv", "still there?").unwrap().join().await.unwrap();
        assert!(!next.model_failed);
        assert_eq!(harness.store.snapshot("conv").len(), 4);
    }

    #[tokio::test]
    async fn test_malformed_output_and_stream_errors_apologize() {
        let harness = TestHarness::new(CapabilityRegistry::empty());
        harness.model.push_script(vec![ModelEvent::Malformed {
            detail: "bad json".into(),
        }]);
        harness
            .model
            .push_items(vec![Ok(ModelEvent::text("par")), Err(LlmError::server_error("overloaded"))]);

        for conv in ["a", "b"] {
            let report = harness.orchestrator.submit(conv, "hi").unwrap().join().await.unwrap();
            assert!(report.model_failed, "{conv}");
            assert_eq!(
                harness.store.snapshot(conv)[1],
                ConversationEntry::assistant(MODEL_FAILURE_APOLOGY)
            );
        }
    }

    #[tokio::test]
    async fn test_model_sees_committed_history_plus_new_message() {
        let harness = TestHarness::new(CapabilityRegistry::empty());
        harness.model.push_script(vec![ModelEvent::final_text("first answer")]);
        harness.model.push_script(vec![ModelEvent::final_text("second answer")]);

        harness.orchestrator.submit("conv", "one").unwrap().join().await.unwrap();
        harness.orchestrator.submit("conv", "two").unwrap().join().await.unwrap();

        let calls = harness.model.invocations();
        assert_eq!(calls[0].system_prompt, "test prompt");
        assert_eq!(calls[0].history, vec![ConversationEntry::user("one")]);
        assert_eq!(
            calls[1].history,
            vec![
                ConversationEntry::user("one"),
                ConversationEntry::assistant("first answer"),
                ConversationEntry::user("two"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversations_proceed_independently() {
        let weather = SlowCapability::new("get_weather", Duration::from_secs(3));
        let harness = TestHarness::new(weather_registry(weather, Duration::from_secs(5)));
        harness.model.push_script(vec![weather_call("Lima")]);
        harness.model.push_script(vec![ModelEvent::final_text("hi back")]);

        let slow = harness.orchestrator.submit("slow", "weather in Lima").unwrap();
        // Let the slow turn reach its capability call before the fast one starts
        tokio::task::yield_now().await;
        let fast = harness.orchestrator.submit("fast", "hi").unwrap();

        let fast_report = fast.join().await.unwrap();
        assert_eq!(fast_report.committed.len(), 2);
        assert!(harness.store.is_pending("slow"));

        let slow_report = slow.join().await.unwrap();
        assert!(slow_report.tool_result.is_some_and(|r| r.outcome.is_success()));
        assert!(!harness.store.is_pending("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_turn_releases_proposal() {
        let harness = TestHarness::new(CapabilityRegistry::empty());
        harness.model.push_stall(vec![ModelEvent::text("thinking")]);

        let handle = harness.orchestrator.submit("conv", "hello").unwrap();
        let mut frames = handle.frames();
        let frame = frames.changed().await.unwrap();
        assert_eq!(frame.payload, Renderable::text("thinking"));
        assert!(harness.store.is_pending("conv"));

        handle.abort();
        assert!(matches!(handle.join().await, Err(TurnError::TaskFailed(_))));
        assert!(!harness.store.is_pending("conv"));
        assert!(harness.store.snapshot("conv").is_empty());

        harness.model.push_script(vec![ModelEvent::final_text("hi")]);
        let report = harness.orchestrator.submit("conv", "hello again").unwrap().join().await.unwrap();
        assert_eq!(report.history_version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_turn_cancels_running_tool() {
        let weather = SlowCapability::new("get_weather", Duration::from_secs(3));
        let harness = TestHarness::new(weather_registry(weather.clone(), Duration::from_secs(5)));
        harness.model.push_script(vec![weather_call("Lisbon")]);

        let handle = harness.orchestrator.submit("conv", "Weather in Lisbon?").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(weather.calls.load(Ordering::SeqCst), 1);

        handle.abort();
        assert!(matches!(handle.join().await, Err(TurnError::TaskFailed(_))));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(weather.cancelled.load(Ordering::SeqCst));
        assert!(!weather.completed.load(Ordering::SeqCst));
        assert!(!harness.store.is_pending("conv"));
        assert!(harness.store.snapshot("conv").is_empty());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            let bytes = self.0.lock().unwrap();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_model_failure_detail_is_logged() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let harness = TestHarness::new(CapabilityRegistry::empty());
        harness.model.push_failure(LlmError::server_error("upstream overloaded"));
        let (sender, _frames) = response_channel();
        let report = harness.orchestrator.run_turn("conv", "hi", sender).await.unwrap();

        assert!(report.model_failed);
        let output = logs.contents();
        assert!(output.contains("Model failed"), "{output}");
        assert!(output.contains("upstream overloaded"), "{output}");
    }

    #[tokio::test]
    async fn test_run_turn_inline() {
        let harness = TestHarness::new(CapabilityRegistry::empty());
        harness.model.push_script(vec![ModelEvent::final_text("inline")]);
        let (sender, receiver) = response_channel();

        let report = harness.orchestrator.run_turn("conv", "hi", sender).await.unwrap();
        assert_eq!(report.conversation_id, "conv");
        assert_eq!(receiver.current_frame().payload, Renderable::text("inline"));
        assert!(receiver.current_frame().is_final());
    }
}
