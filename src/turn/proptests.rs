//! Property-based tests for the turn state machine

use super::*;
use crate::capability::{FailureReason, ToolInvocationRequest, ToolResult};
use crate::channel::Renderable;
use crate::history::{EntryContent, Role};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Generators
// ============================================================================

fn arb_request() -> impl Strategy<Value = ToolInvocationRequest> {
    ("toolu_[a-z]{4}", prop_oneof![Just("get_weather"), Just("web_search"), Just("teleport")], "[A-Za-z ]{0,12}")
        .prop_map(|(id, name, subject)| ToolInvocationRequest::new(id, name, json!({ "query": subject })))
}

fn arb_result_for(request: ToolInvocationRequest) -> impl Strategy<Value = ToolResult> {
    prop_oneof![
        Just(ToolResult::success(&request, json!({"ok": true}))),
        Just(ToolResult::failure(&request, FailureReason::Timeout)),
        "[a-z ]{1,20}".prop_map(move |detail| ToolResult::failure(
            &request,
            FailureReason::ProviderError { detail }
        )),
    ]
}

fn arb_event() -> impl Strategy<Value = TurnEvent> {
    prop_oneof![
        "[a-z ]{0,10}".prop_map(|text| TurnEvent::UserInput { text }),
        ("[a-zA-Z ]{0,8}", any::<bool>()).prop_map(|(text, is_final)| TurnEvent::TextDelta { text, is_final }),
        arb_request().prop_map(|request| TurnEvent::ToolRequested { request }),
        "[a-z ]{0,10}".prop_map(|detail| TurnEvent::ModelFailed { detail }),
        Just(TurnEvent::StreamEnded),
        arb_request()
            .prop_flat_map(arb_result_for)
            .prop_map(|result| TurnEvent::ToolSettled {
                result,
                summary: "summary".to_string(),
                view: Renderable::Blank,
            }),
        Just(TurnEvent::Committed),
    ]
}

/// Settlement answering the request the machine is currently executing
fn settle(state: &TurnState) -> Option<TurnEvent> {
    match state {
        TurnState::ExecutingTool { request } => Some(TurnEvent::ToolSettled {
            result: ToolResult::failure(request, FailureReason::Timeout),
            summary: "summary".to_string(),
            view: Renderable::apology("sorry"),
        }),
        _ => None,
    }
}

fn count_commits(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::Commit { .. }))
        .count()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Within a turn the machine commits at most once, and every commit is
    /// immediately followed by the final frame.
    #[test]
    fn prop_one_commit_per_turn(events in proptest::collection::vec(arb_event(), 0..40)) {
        let mut state = TurnState::Idle;
        let mut commits_this_turn = 0;

        for event in events {
            let Ok(result) = transition(&state, event) else { continue };
            let commits = count_commits(&result.effects);
            commits_this_turn += commits;
            prop_assert!(commits_this_turn <= 1, "second commit in one turn");

            if let Some(pos) = result.effects.iter().position(|e| matches!(e, Effect::Commit { .. })) {
                prop_assert!(matches!(result.effects.get(pos + 1), Some(Effect::PushFinal { .. })), "assertion failed: matches!(result.effects.get(pos + 1), Some(Effect::PushFinal {{ .. }}))");
                prop_assert!(matches!(result.new_state, TurnState::Committing { .. }), "assertion failed: matches!(result.new_state, TurnState::Committing {{ .. }})");
            }

            if result.new_state == TurnState::Idle {
                commits_this_turn = 0;
            }
            state = result.new_state;
        }
    }

    /// Tool settlement commits call, result and summary in that order, all
    /// carrying the request's id.
    #[test]
    fn prop_tool_commit_is_three_ordered_entries(
        prefix in "[a-z ]{0,10}",
        request in arb_request(),
    ) {
        let streaming = TurnState::Streaming { text: prefix };
        let executing = transition(&streaming, TurnEvent::ToolRequested { request: request.clone() })
            .unwrap()
            .new_state;
        let settled = transition(&executing, settle(&executing).unwrap()).unwrap();

        let Some(Effect::Commit { entries }) = settled.effects.first() else {
            return Err(TestCaseError::fail("expected commit first"));
        };
        prop_assert_eq!(entries.len(), 3);
        prop_assert!(matches!(entries[0].content, EntryContent::ToolCall { .. }), "assertion failed: matches!(entries[0].content, EntryContent::ToolCall {{ .. }})");
        prop_assert!(matches!(entries[1].content, EntryContent::ToolResult { .. }), "assertion failed: matches!(entries[1].content, EntryContent::ToolResult {{ .. }})");
        prop_assert_eq!(entries[2].role, Role::Assistant);
        prop_assert_eq!(entries[0].tool_id(), Some(request.id.as_str()));
        prop_assert_eq!(entries[1].tool_id(), Some(request.id.as_str()));
    }

    /// Streamed chunks are committed as their concatenation.
    #[test]
    fn prop_streamed_text_is_concatenated(chunks in proptest::collection::vec("[a-zA-Z]{1,6}", 1..10)) {
        let mut state = TurnState::AwaitingModel;
        let last = chunks.len() - 1;
        let mut effects = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let result = transition(&state, TurnEvent::TextDelta { text: chunk.clone(), is_final: i == last }).unwrap();
            state = result.new_state;
            effects = result.effects;
        }

        let expected: String = chunks.concat();
        prop_assert_eq!(
            effects.first(),
            Some(&Effect::Commit { entries: vec![crate::history::ConversationEntry::assistant(expected)] })
        );
    }

    /// From any reachable state the turn can still finish: model phases end
    /// with a stream end, tools settle, commits complete.
    #[test]
    fn prop_every_turn_can_reach_idle(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut state = TurnState::Idle;
        for event in events {
            if let Ok(result) = transition(&state, event) {
                state = result.new_state;
            }
        }

        for _ in 0..4 {
            let next = match &state {
                TurnState::Idle => break,
                TurnState::AwaitingModel | TurnState::Streaming { .. } => TurnEvent::StreamEnded,
                TurnState::ExecutingTool { .. } => settle(&state).unwrap(),
                TurnState::Committing { .. } => TurnEvent::Committed,
            };
            state = transition(&state, next).unwrap().new_state;
        }
        prop_assert_eq!(state, TurnState::Idle);
    }

    /// User input mid-turn is always rejected as a turn in progress.
    #[test]
    fn prop_busy_states_reject_input(request in arb_request(), text in "[a-z]{0,8}") {
        let busy = [
            TurnState::AwaitingModel,
            TurnState::Streaming { text: text.clone() },
            TurnState::ExecutingTool { request },
            TurnState::Committing { reason: CommitReason::AssistantText },
        ];
        for state in &busy {
            prop_assert_eq!(
                transition(state, TurnEvent::UserInput { text: text.clone() }).unwrap_err(),
                TransitionError::TurnInProgress
            );
        }
    }
}
