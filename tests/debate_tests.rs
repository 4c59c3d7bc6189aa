mod common;

use common::{agents, approve_all, fast_timings, reply, MockRuntime, RecordingHandler, Reply};
use debatellm::convergence::ConvergenceReason;
use debatellm::debate::{Debate, DebateConfig, DebateError, DebateOutcome, MAX_PARSE_RETRIES};
use debatellm::event::{DebateEvent, EventKind, StreamData};
use debatellm::prompts::CORRECTIVE_PROMPT;
use debatellm::session::DispatchError;
use std::path::PathBuf;
use std::sync::Arc;

const TITLES: [&str; 2] = ["Architecture", "Data Model"];

fn debate(runtime: &Arc<MockRuntime>, config: DebateConfig, handler: &Arc<RecordingHandler>) -> Debate {
    Debate::new(runtime.clone(), config)
        .with_timings(fast_timings())
        .with_event_handler(handler.clone())
}

fn count(events: &[DebateEvent], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

#[tokio::test]
async fn test_unanimous_approval_converges_naturally() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "alice's take")])
            .script("Bob", vec![approve_all(&TITLES, "bob's take")]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Alice", "Bob"])).with_max_rounds(3);

    let result = debate(&runtime, config, &handler).run().await.unwrap();

    assert!(result.is_converged());
    assert_eq!(result.rounds.len(), 2);

    let first = &result.rounds[0].convergence;
    assert_eq!(first.consecutive_approvals, 1);
    assert!(!first.converged);

    assert_eq!(result.convergence_state.consecutive_approvals, 2);
    assert!(result.convergence_state.converged);
    assert_eq!(result.convergence_state.reason, Some(ConvergenceReason::Natural));

    assert_eq!(result.consensus.len(), 2);
    for section in &result.consensus {
        assert!(section.agreed, "{} should be agreed", section.title);
        // First configured agent supplies the final content.
        assert_eq!(section.final_content, "alice's take");
    }
    assert_eq!(result.project_title, "test-project");

    let events = handler.events();
    assert_eq!(count(&events, EventKind::Status), 2);
    assert_eq!(count(&events, EventKind::RoundComplete), 2);
    assert_eq!(count(&events, EventKind::DebateComplete), 1);
    assert_eq!(count(&events, EventKind::AgentError), 0);
}

#[tokio::test]
async fn test_persistent_dispute_stops_at_round_cap() {
    let disputed = reply(
        &[
            ("Architecture", "monolith", "approve"),
            ("Auth", "use sessions instead", "suggest_changes"),
        ],
        "suggest_changes",
    );
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&["Architecture", "Auth"], "jwt")])
            .script("Bob", vec![disputed]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Alice", "Bob"])).with_max_rounds(2);

    let result = debate(&runtime, config, &handler).run().await.unwrap();

    assert_eq!(result.rounds.len(), 2);
    assert!(result.convergence_state.converged);
    assert_eq!(result.convergence_state.reason, Some(ConvergenceReason::CapExhausted));
    assert_eq!(result.convergence_state.consecutive_approvals, 0);
    assert_eq!(result.outcome, DebateOutcome::Converged);

    let auth = result.consensus.iter().find(|s| s.title == "Auth").unwrap();
    assert!(!auth.agreed);
    assert!(auth.final_content.is_empty());
    assert_eq!(auth.content_of("Bob"), Some("use sessions instead"));

    let architecture = result.consensus.iter().find(|s| s.title == "Architecture").unwrap();
    assert!(architecture.agreed);
}

#[tokio::test]
async fn test_timed_out_agent_is_left_out_of_the_round() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .script("Bob", vec![approve_all(&TITLES, "b")])
            .script("Carol", vec![approve_all(&TITLES, "c"), Reply::Hang]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config =
        DebateConfig::new("A todo app", agents(&["Alice", "Bob", "Carol"])).with_max_rounds(2);

    let result = debate(&runtime, config, &handler).run().await.unwrap();

    assert!(result.is_converged());
    assert_eq!(result.rounds.len(), 2);
    assert_eq!(result.rounds[0].responses.len(), 3);

    let round2 = &result.rounds[1];
    let names: Vec<&str> = round2.responses.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
    for section in &round2.consensus {
        assert!(section.content_of("Carol").is_none());
    }
    assert!(result.response("Carol").is_none());

    let errors: Vec<_> = handler
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DebateEvent::AgentError(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].agent, "Carol");
    assert!(errors[0].error.starts_with("Timeout waiting for session"));
}

#[tokio::test]
async fn test_unparseable_agent_aborts_two_agent_debate() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .script("Bob", vec![Reply::Text("I think we should use Rails.".into())]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Alice", "Bob"]));

    let result = debate(&runtime, config, &handler).run().await.unwrap();

    assert_eq!(
        result.outcome,
        DebateOutcome::Aborted {
            reason: DebateError::InsufficientAgents {
                round: 1,
                responded: 1
            }
        }
    );
    assert!(result.rounds.is_empty());
    assert!(result.agent_responses.is_empty());
    assert!(!result.convergence_state.converged);

    let bob_prompts = runtime.prompts_for("Bob");
    assert_eq!(bob_prompts.len(), MAX_PARSE_RETRIES + 1);
    assert!(bob_prompts[0].text.contains("A todo app"));
    assert!(bob_prompts[1..].iter().all(|p| p.text == CORRECTIVE_PROMPT));

    let events = handler.events();
    assert_eq!(count(&events, EventKind::RoundComplete), 0);
    assert_eq!(count(&events, EventKind::DebateComplete), 1);
    let bob_error = events.iter().find_map(|e| match e {
        DebateEvent::AgentError(p) if p.agent == "Bob" => Some(p.error.clone()),
        _ => None,
    });
    assert!(bob_error.unwrap().starts_with("Failed to parse after 3 attempts"));
}

#[tokio::test]
async fn test_corrective_prompt_recovers_agent() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .script(
                "Bob",
                vec![
                    Reply::Text("Sure! Here is my plan, in prose.".into()),
                    approve_all(&TITLES, "b"),
                ],
            ),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Alice", "Bob"])).with_max_rounds(2);

    let result = debate(&runtime, config, &handler).run().await.unwrap();

    assert!(result.is_converged());
    assert_eq!(result.rounds[0].responses.len(), 2);
    assert_eq!(count(&handler.events(), EventKind::AgentError), 0);

    let bob_prompts = runtime.prompts_for("Bob");
    assert_eq!(bob_prompts.len(), 3);
    assert_eq!(bob_prompts[1].text, CORRECTIVE_PROMPT);
    // Round 2 goes back to reviewing the other agent.
    assert!(bob_prompts[2].text.contains("The other agent (Alice)"));
}

#[tokio::test]
async fn test_review_prompts_show_only_other_agents() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "alice-content")])
            .script("Bob", vec![approve_all(&TITLES, "bob-content")])
            .script("Carol", vec![approve_all(&TITLES, "carol-content")]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config =
        DebateConfig::new("A todo app", agents(&["Alice", "Bob", "Carol"])).with_max_rounds(2);

    debate(&runtime, config, &handler).run().await.unwrap();

    let alice = runtime.prompts_for("Alice");
    assert_eq!(alice.len(), 2);
    let review = &alice[1].text;
    assert!(review.contains("=== Bob ==="));
    assert!(review.contains("=== Carol ==="));
    assert!(!review.contains("=== Alice ==="));
    assert!(!review.contains("alice-content"));
    assert!(review.find("=== Bob ===") < review.find("=== Carol ==="));
    assert!(alice[1].system.contains("round 2"));
}

#[tokio::test]
async fn test_invalid_config_reports_error_event() {
    let runtime = Arc::new(MockRuntime::new());
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Solo"]));

    let err = debate(&runtime, config, &handler).run().await.unwrap_err();

    assert_eq!(err, DebateError::TooFewAgents(1));
    let events = handler.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DebateEvent::Error(p) if p.message == err.to_string()));
    assert!(runtime.prompts().is_empty());
}

#[tokio::test]
async fn test_session_creation_failure_is_fatal() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .fail_session_for("Bob"),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Alice", "Bob"]));

    let err = debate(&runtime, config, &handler).run().await.unwrap_err();

    match err {
        DebateError::Session(DispatchError::Session { agent, message }) => {
            assert_eq!(agent, "Bob");
            assert!(message.contains("quota"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(count(&handler.events(), EventKind::Error), 1);
    assert!(runtime.prompts().is_empty());
}

#[tokio::test]
async fn test_stream_events_precede_debate_complete() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .script("Bob", vec![approve_all(&TITLES, "b")]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Alice", "Bob"])).with_max_rounds(2);

    debate(&runtime, config, &handler).run().await.unwrap();

    let events = handler.events();
    assert!(matches!(events.last(), Some(DebateEvent::DebateComplete(_))));

    let starts = events
        .iter()
        .filter(|e| matches!(e, DebateEvent::AgentStream(p) if p.data == StreamData::StreamingStart))
        .count();
    assert_eq!(starts, 4);

    let texts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DebateEvent::AgentStream(p) => match &p.data {
                StreamData::Text { text } => Some((p.agent.clone(), text.clone())),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert!(!texts.is_empty());
    // Prompts echoed back as user parts are never forwarded.
    assert!(texts.iter().all(|(_, text)| text.contains("\"sections\"")));

    // Late feed activity after the debate is over reaches nobody.
    let before = handler.len();
    let sid = runtime.session_id_for("Alice").unwrap();
    runtime.push_event(
        "message.updated",
        serde_json::json!({"info": {"id": "late", "role": "assistant", "sessionID": sid}}),
    );
    runtime.push_event(
        "message.part.updated",
        serde_json::json!({"part": {"sessionID": sid, "messageID": "late", "type": "text", "text": "too late"}}),
    );
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(handler.len(), before);
}

#[tokio::test]
async fn test_tools_enabled_only_for_first_round_one_prompt() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .script(
                "Bob",
                vec![Reply::Text("let me look around first".into()), approve_all(&TITLES, "b")],
            ),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("Add search", agents(&["Alice", "Bob"]))
        .with_max_rounds(2)
        .with_codebase("src/\n  main.rs", "/work/project");

    debate(&runtime, config, &handler).run().await.unwrap();

    for (_, options) in runtime.session_options() {
        assert!(options.enable_tools);
        assert_eq!(options.directory, Some(PathBuf::from("/work/project")));
    }

    let alice = runtime.prompts_for("Alice");
    assert!(alice[0].enable_tools);
    assert!(alice[0].system.contains("Codebase snapshot:\nsrc/\n  main.rs"));
    assert!(!alice[1].enable_tools);

    let bob = runtime.prompts_for("Bob");
    assert_eq!(bob.len(), 3);
    assert!(bob[0].enable_tools);
    assert!(!bob[1].enable_tools, "corrective retry runs without tools");
    assert!(!bob[2].enable_tools);
}

#[tokio::test]
async fn test_no_tools_without_project_dir() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .script("Bob", vec![approve_all(&TITLES, "b")]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Alice", "Bob"])).with_max_rounds(1);

    let result = debate(&runtime, config, &handler).run().await.unwrap();

    assert_eq!(result.convergence_state.reason, Some(ConvergenceReason::CapExhausted));
    assert!(runtime.prompts().iter().all(|(_, p)| !p.enable_tools));
    assert!(runtime
        .session_options()
        .iter()
        .all(|(_, o)| !o.enable_tools && o.directory.is_none()));
}

#[tokio::test]
async fn test_result_serializes_agents_in_configured_order() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Zed", vec![approve_all(&TITLES, "z")])
            .script("Amy", vec![approve_all(&TITLES, "a")]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Zed", "Amy"])).with_max_rounds(1);

    let result = debate(&runtime, config, &handler).run().await.unwrap();
    let json = serde_json::to_value(&result).unwrap();

    let keys: Vec<&String> = json["agentResponses"].as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["Zed", "Amy"]);
    assert_eq!(json["outcome"]["status"], "converged");
    assert_eq!(json["convergenceState"]["reason"], "cap_exhausted");
}

#[tokio::test]
async fn test_stalled_activity_feed_does_not_block_completion() {
    let runtime = Arc::new(
        MockRuntime::new()
            .stall_feed()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .script("Bob", vec![approve_all(&TITLES, "b")]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Alice", "Bob"])).with_max_rounds(1);

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(3),
        debate(&runtime, config, &handler).run(),
    )
    .await
    .expect("debate finishes even though the feed never opened")
    .unwrap();

    assert!(result.is_converged());
    assert!(matches!(handler.events().last(), Some(DebateEvent::DebateComplete(_))));
}

#[tokio::test]
async fn test_abort_after_completed_round_keeps_history() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .script("Bob", vec![approve_all(&TITLES, "b"), Reply::Hang]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config = DebateConfig::new("A todo app", agents(&["Alice", "Bob"])).with_max_rounds(5);

    let result = debate(&runtime, config, &handler).run().await.unwrap();

    assert_eq!(
        result.outcome,
        DebateOutcome::Aborted {
            reason: DebateError::InsufficientAgents {
                round: 2,
                responded: 1
            }
        }
    );
    assert_eq!(result.rounds.len(), 1);
    assert_eq!(result.rounds[0].round, 1);

    // Final state comes from round 1, not from the partial round 2.
    assert_eq!(result.agent_responses, result.rounds[0].responses);
    assert_eq!(result.consensus, result.rounds[0].consensus);
    assert_eq!(result.convergence_state, result.rounds[0].convergence);
    assert!(result.response("Bob").is_some());

    let events = handler.events();
    assert_eq!(count(&events, EventKind::RoundComplete), 1);
    let error_at = events
        .iter()
        .position(|e| matches!(e, DebateEvent::AgentError(p) if p.agent == "Bob"))
        .unwrap();
    match events.last() {
        Some(DebateEvent::DebateComplete(payload)) => {
            assert_eq!(payload.agents, result.rounds[0].responses);
            assert_eq!(payload.convergence.round, 1);
        }
        other => panic!("expected debate_complete last, got {other:?}"),
    }
    assert!(error_at < events.len() - 1);
}

#[tokio::test]
async fn test_lifecycle_events_follow_round_order() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("Alice", vec![approve_all(&TITLES, "a")])
            .script("Bob", vec![approve_all(&TITLES, "b")])
            .script("Carol", vec![approve_all(&TITLES, "c"), Reply::Hang]),
    );
    let handler = Arc::new(RecordingHandler::default());
    let config =
        DebateConfig::new("A todo app", agents(&["Alice", "Bob", "Carol"])).with_max_rounds(2);

    debate(&runtime, config, &handler).run().await.unwrap();

    // Forwarded text runs concurrently with the loop; only lifecycle events
    // have a fixed order.
    let lifecycle: Vec<String> = handler
        .events()
        .iter()
        .filter_map(|e| match e {
            DebateEvent::Status(p) => Some(format!("status:{}", p.round)),
            DebateEvent::AgentStream(p) if p.data == StreamData::StreamingStart => {
                Some(format!("start:{}", p.agent))
            }
            DebateEvent::AgentStream(_) => None,
            DebateEvent::AgentError(p) => Some(format!("error:{}", p.agent)),
            DebateEvent::RoundComplete(p) => Some(format!("round_complete:{}", p.round)),
            DebateEvent::DebateComplete(_) => Some("debate_complete".to_string()),
            other => Some(format!("{:?}", other.kind())),
        })
        .collect();

    assert_eq!(
        lifecycle,
        vec![
            "status:1",
            "start:Alice",
            "start:Bob",
            "start:Carol",
            "round_complete:1",
            "status:2",
            "start:Alice",
            "start:Bob",
            "start:Carol",
            "error:Carol",
            "round_complete:2",
            "debate_complete",
        ]
    );

    // One prompt per agent per round, hung or not.
    assert_eq!(runtime.prompts_for("Alice").len(), 2);
    assert_eq!(runtime.prompts_for("Carol").len(), 2);
}
