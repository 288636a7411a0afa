use super::*;
use crate::approval::{AutoApprovePolicy, DenyAllPolicy, ManualPolicy};
use crate::provider::mock::MockResponseEngine;
use crate::tool::mock::{CountingTool, FailingTool};
use crate::tool::Tool;
use std::sync::atomic::{AtomicUsize, Ordering};

fn hosted(id: &str, server: &str) -> ApprovalRequest {
    ApprovalRequest {
        id: id.to_string(),
        server_label: server.to_string(),
        tool_call_id: None,
        tool_name: Some("search_api_specs".to_string()),
        arguments: None,
    }
}

fn call(id: &str, server: &str, tool: &str) -> ToolCallRequest {
    let mut arguments = serde_json::Map::new();
    arguments.insert("currency_from".to_string(), serde_json::json!("USD"));
    ToolCallRequest {
        id: id.to_string(),
        server_label: server.to_string(),
        tool_name: tool.to_string(),
        arguments,
    }
}

fn session_with(
    engine: &Arc<MockResponseEngine>,
    registry: ToolRegistry,
    policy: Arc<dyn ApprovalPolicy>,
) -> ConversationSession {
    ConversationSession::new(
        Arc::clone(engine) as Arc<dyn ResponseEngine>,
        Arc::new(registry),
        policy,
    )
    .with_conversation_id("conv_test")
}

fn manual(engine: &Arc<MockResponseEngine>, registry: ToolRegistry) -> ConversationSession {
    session_with(engine, registry, Arc::new(ManualPolicy))
}

/// Registry with a gated "fx" server exposing two counting tools.
fn fx_registry() -> (ToolRegistry, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let rate = CountingTool::new("get_exchange_rate", "0.92");
    let transfer = CountingTool::new("transfer_funds", "ok");
    let (rate_calls, transfer_calls) = (rate.counter(), transfer.counter());
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(rate), Arc::new(transfer)];

    let mut registry = ToolRegistry::new();
    registry.register_server("fx", true, tools).unwrap();
    (registry, rate_calls, transfer_calls)
}

fn expect_pending(outcome: TurnOutcome) -> Vec<ApprovalRequest> {
    match outcome {
        TurnOutcome::NeedsApproval(pending) => pending,
        other => panic!("expected pending approvals, got {:?}", other),
    }
}

fn expect_complete(outcome: TurnOutcome) -> TurnOutput {
    match outcome {
        TurnOutcome::Complete(output) => output,
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_turn_without_approvals_is_one_round_trip() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_text("resp_1", "Hello there.");
    let mut session = manual(&engine, ToolRegistry::new());

    let output = expect_complete(session.send("Hi").await.unwrap());
    assert_eq!(output.text, "Hello there.");
    assert_eq!(output.round_trips, 1);
    assert_eq!(engine.round_trips(), 1);
    assert_eq!(session.phase(), SessionPhase::Complete);

    let request = &engine.requests()[0];
    assert_eq!(request.conversation_id.as_deref(), Some("conv_test"));
    assert!(!request.is_continuation());
}

#[tokio::test]
async fn test_summarize_readme_with_single_approval() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_approvals("resp_1", vec![hosted("mcpr_1", "api-specs")]);
    engine.queue_text("resp_2", "The readme describes a currency agent.");
    let mut session = manual(&engine, ToolRegistry::new());

    let pending = expect_pending(session.send("Please summarize the repo readme").await.unwrap());
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].server_label, "api-specs");
    assert_eq!(session.phase(), SessionPhase::HasPendingApprovals);
    // Suspend point: nothing more is sent until a decision arrives.
    assert_eq!(engine.round_trips(), 1);

    let output = expect_complete(
        session
            .submit_approvals(vec![ApprovalResponse::approve("mcpr_1")])
            .await
            .unwrap(),
    );
    assert_eq!(output.text, "The readme describes a currency agent.");
    assert_eq!(output.round_trips, 2);
    assert!(session.pending_approvals().is_empty());

    let continuation = &engine.requests()[1];
    assert_eq!(continuation.previous_response_id.as_deref(), Some("resp_1"));
    assert_eq!(
        continuation.input,
        vec![InputItem::McpApprovalResponse {
            approval_request_id: "mcpr_1".to_string(),
            approve: true,
        }]
    );
}

#[tokio::test]
async fn test_n_approvals_take_two_round_trips() {
    let engine = Arc::new(MockResponseEngine::new());
    let requests: Vec<ApprovalRequest> = (0..5)
        .map(|i| hosted(&format!("mcpr_{}", i), "api-specs"))
        .collect();
    engine.queue_approvals("resp_1", requests);
    engine.queue_text("resp_2", "done");
    let mut session = manual(&engine, ToolRegistry::new());

    let pending = expect_pending(session.send("go").await.unwrap());
    assert_eq!(pending.len(), 5);

    let decisions = pending
        .iter()
        .map(|r| ApprovalResponse::approve(r.id.clone()))
        .collect();
    let output = expect_complete(session.submit_approvals(decisions).await.unwrap());
    assert_eq!(output.round_trips, 2);
    assert_eq!(engine.round_trips(), 2);
    assert!(session.pending_approvals().is_empty());
    assert_eq!(engine.requests()[1].input.len(), 5);
}

#[tokio::test]
async fn test_denied_call_is_skipped_and_approved_call_runs() {
    let (registry, rate_calls, transfer_calls) = fx_registry();
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_tool_calls(
        "resp_1",
        vec![
            call("call_rate", "fx", "get_exchange_rate"),
            call("call_transfer", "fx", "transfer_funds"),
        ],
    );
    engine.queue_text("resp_2", "1 USD is 0.92 EUR.");
    let mut session = manual(&engine, registry);

    let pending = expect_pending(session.send("Convert 1 USD to EUR").await.unwrap());
    let ids: Vec<&str> = pending.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["approval_call_rate", "approval_call_transfer"]);
    assert_eq!(rate_calls.load(Ordering::SeqCst), 0);
    assert_eq!(transfer_calls.load(Ordering::SeqCst), 0);

    let output = expect_complete(
        session
            .submit_approvals(vec![
                ApprovalResponse::deny("approval_call_transfer"),
                ApprovalResponse::approve("approval_call_rate"),
            ])
            .await
            .unwrap(),
    );

    assert_eq!(rate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(transfer_calls.load(Ordering::SeqCst), 0);
    assert_eq!(output.tool_results.len(), 1);
    assert_eq!(output.tool_results[0].tool_call_id, "call_rate");
    assert_eq!(output.tool_results[0].content, "0.92");
    assert_eq!(output.round_trips, 2);

    let input = &engine.requests()[1].input;
    assert!(input.contains(&InputItem::FunctionCallOutput {
        call_id: "call_rate".to_string(),
        output: "0.92".to_string(),
        is_error: false,
    }));
    assert!(input.iter().any(|item| matches!(
        item,
        InputItem::FunctionCallOutput { call_id, is_error: true, .. } if call_id == "call_transfer"
    )));
}

#[tokio::test]
async fn test_unknown_approval_id_leaves_pending_unchanged() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_approvals("resp_1", vec![hosted("mcpr_1", "api-specs"), hosted("mcpr_2", "api-specs")]);
    engine.queue_text("resp_2", "ok");
    let mut session = manual(&engine, ToolRegistry::new());
    expect_pending(session.send("go").await.unwrap());

    let err = session
        .submit_approvals(vec![
            ApprovalResponse::approve("mcpr_1"),
            ApprovalResponse::approve("mcpr_999"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Conversation(ConversationError::UnknownApproval(ref id)) if id == "mcpr_999"
    ));
    assert_eq!(session.pending_approvals().len(), 2);
    assert_eq!(session.phase(), SessionPhase::HasPendingApprovals);

    let err = session
        .submit_approvals(vec![
            ApprovalResponse::approve("mcpr_2"),
            ApprovalResponse::deny("mcpr_2"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Conversation(ConversationError::DuplicateApproval(_))
    ));
    assert_eq!(session.pending_approvals().len(), 2);
    assert_eq!(engine.round_trips(), 1);

    let output = expect_complete(
        session
            .submit_approvals(vec![
                ApprovalResponse::approve("mcpr_1"),
                ApprovalResponse::approve("mcpr_2"),
            ])
            .await
            .unwrap(),
    );
    assert_eq!(output.text, "ok");
}

#[tokio::test]
async fn test_resolving_twice_is_rejected() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_approvals("resp_1", vec![hosted("mcpr_1", "api-specs")]);
    engine.queue_approvals("resp_2", vec![hosted("mcpr_2", "api-specs")]);
    let mut session = manual(&engine, ToolRegistry::new());

    expect_pending(session.send("go").await.unwrap());
    let pending = expect_pending(
        session
            .submit_approvals(vec![ApprovalResponse::approve("mcpr_1")])
            .await
            .unwrap(),
    );
    assert_eq!(pending[0].id, "mcpr_2");

    let err = session
        .submit_approvals(vec![ApprovalResponse::approve("mcpr_1")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Conversation(ConversationError::AlreadyResolved(_))
    ));
    assert_eq!(session.pending_approvals(), vec![hosted("mcpr_2", "api-specs")]);
}

#[tokio::test]
async fn test_submit_without_pending_is_rejected() {
    let engine = Arc::new(MockResponseEngine::new());
    let mut session = manual(&engine, ToolRegistry::new());
    let err = session
        .submit_approvals(vec![ApprovalResponse::approve("mcpr_1")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Conversation(ConversationError::NoPendingApprovals)
    ));
    assert_eq!(engine.round_trips(), 0);
}

#[tokio::test]
async fn test_new_turn_blocked_while_suspended() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_approvals("resp_1", vec![hosted("mcpr_1", "api-specs")]);
    let mut session = manual(&engine, ToolRegistry::new());
    expect_pending(session.send("go").await.unwrap());

    let err = session.send("another question").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Conversation(ConversationError::PendingApprovals(1))
    ));

    session.abandon_turn();
    engine.queue_text("resp_2", "fresh start");
    let output = expect_complete(session.send("another question").await.unwrap());
    assert_eq!(output.text, "fresh start");
}

#[tokio::test]
async fn test_stale_continuation_ends_the_turn() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_approvals("resp_1", vec![hosted("mcpr_1", "api-specs")]);
    engine.queue_error(EngineError::StaleResponse("resp_1".to_string()));
    let mut session = manual(&engine, ToolRegistry::new());
    expect_pending(session.send("go").await.unwrap());

    let err = session
        .submit_approvals(vec![ApprovalResponse::approve("mcpr_1")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Conversation(ConversationError::StaleContinuation(ref id)) if id == "resp_1"
    ));
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(session.pending_approvals().is_empty());
    assert!(session.state().previous_response_id().is_none());

    // Not retried on its own; the caller restarts.
    assert_eq!(engine.round_trips(), 2);
    engine.queue_text("resp_3", "restarted");
    let output = expect_complete(session.send("go").await.unwrap());
    assert_eq!(output.text, "restarted");
}

#[tokio::test]
async fn test_auto_approve_policy_never_suspends() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_approvals("resp_1", vec![hosted("mcpr_1", "api-specs")]);
    engine.queue_text("resp_2", "summary");
    let mut session = session_with(&engine, ToolRegistry::new(), Arc::new(AutoApprovePolicy));

    let output = expect_complete(session.send("go").await.unwrap());
    assert_eq!(output.round_trips, 2);
    assert_eq!(
        engine.requests()[1].input,
        vec![InputItem::McpApprovalResponse {
            approval_request_id: "mcpr_1".to_string(),
            approve: true,
        }]
    );
}

#[tokio::test]
async fn test_deny_all_policy_never_invokes() {
    let (registry, rate_calls, _) = fx_registry();
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_tool_calls("resp_1", vec![call("call_1", "fx", "get_exchange_rate")]);
    engine.queue_text("resp_2", "I could not look that up.");
    let mut session = session_with(&engine, registry, Arc::new(DenyAllPolicy));

    let output = expect_complete(session.send("rate?").await.unwrap());
    assert_eq!(rate_calls.load(Ordering::SeqCst), 0);
    assert!(output.tool_results.is_empty());
    assert!(matches!(
        &engine.requests()[1].input[0],
        InputItem::FunctionCallOutput { is_error: true, .. }
    ));
}

#[tokio::test]
async fn test_ungated_call_runs_and_continues() {
    let tool = CountingTool::new("eval", "368");
    let calls = tool.counter();
    let mut registry = ToolRegistry::new();
    registry.register("calculator", tool).unwrap();

    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_tool_calls("resp_1", vec![call("call_1", "calculator", "eval")]);
    engine.queue_text("resp_2", "The answer is 368.");
    let mut session = manual(&engine, registry);

    let output = expect_complete(session.send("What is 23 * 16?").await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.tool_results[0].content, "368");
    assert_eq!(output.round_trips, 2);
    assert_eq!(
        engine.requests()[1].previous_response_id.as_deref(),
        Some("resp_1")
    );
}

#[tokio::test]
async fn test_ungated_call_waits_for_gated_batch() {
    let (mut registry, rate_calls, _) = fx_registry();
    let calc = CountingTool::new("eval", "4");
    let calc_calls = calc.counter();
    registry.register("calculator", calc).unwrap();

    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_tool_calls(
        "resp_1",
        vec![
            call("call_calc", "calculator", "eval"),
            call("call_rate", "fx", "get_exchange_rate"),
        ],
    );
    engine.queue_text("resp_2", "done");
    let mut session = manual(&engine, registry);

    expect_pending(session.send("go").await.unwrap());
    assert_eq!(calc_calls.load(Ordering::SeqCst), 0);

    let output = expect_complete(
        session
            .submit_approvals(vec![ApprovalResponse::approve("approval_call_rate")])
            .await
            .unwrap(),
    );
    assert_eq!(calc_calls.load(Ordering::SeqCst), 1);
    assert_eq!(rate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.tool_results.len(), 2);
}

#[tokio::test]
async fn test_failing_tool_becomes_error_result() {
    let mut registry = ToolRegistry::new();
    registry.register("fx", FailingTool("get_exchange_rate")).unwrap();

    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_tool_calls("resp_1", vec![call("call_1", "fx", "get_exchange_rate")]);
    engine.queue_text("resp_2", "The rate service is down.");
    let mut session = manual(&engine, registry);

    let output = expect_complete(session.send("rate?").await.unwrap());
    assert!(output.tool_results[0].is_error);
    assert!(output.tool_results[0].content.contains("503"));
    assert_eq!(output.text, "The rate service is down.");
}

#[tokio::test]
async fn test_omitted_ids_are_denied() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_approvals("resp_1", vec![hosted("mcpr_1", "a"), hosted("mcpr_2", "b")]);
    engine.queue_text("resp_2", "partial");
    let mut session = manual(&engine, ToolRegistry::new());
    expect_pending(session.send("go").await.unwrap());

    expect_complete(
        session
            .submit_approvals(vec![ApprovalResponse::approve("mcpr_1")])
            .await
            .unwrap(),
    );
    assert_eq!(
        engine.requests()[1].input,
        vec![
            InputItem::McpApprovalResponse {
                approval_request_id: "mcpr_1".to_string(),
                approve: true,
            },
            InputItem::McpApprovalResponse {
                approval_request_id: "mcpr_2".to_string(),
                approve: false,
            },
        ]
    );
}

struct StallOn(&'static str);

#[async_trait::async_trait]
impl ApprovalHandler for StallOn {
    async fn decide(&self, request: &ApprovalRequest) -> bool {
        if request.id == self.0 {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
        }
        true
    }
}

#[tokio::test(start_paused = true)]
async fn test_handler_timeout_denies_only_that_request() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_approvals("resp_1", vec![hosted("mcpr_1", "a"), hosted("mcpr_2", "b")]);
    engine.queue_text("resp_2", "done");
    let mut session = manual(&engine, ToolRegistry::new()).with_options(SessionOptions {
        approval_timeout: Duration::from_secs(5),
        ..SessionOptions::default()
    });
    expect_pending(session.send("go").await.unwrap());

    expect_complete(session.decide_pending(&StallOn("mcpr_2")).await.unwrap());
    assert_eq!(
        engine.requests()[1].input,
        vec![
            InputItem::McpApprovalResponse {
                approval_request_id: "mcpr_1".to_string(),
                approve: true,
            },
            InputItem::McpApprovalResponse {
                approval_request_id: "mcpr_2".to_string(),
                approve: false,
            },
        ]
    );
}

#[tokio::test]
async fn test_incomplete_stream_fails_the_turn() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_events(vec![
        StreamEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        },
        StreamEvent::TextDelta {
            text: "cut o".to_string(),
        },
    ]);
    let mut session = manual(&engine, ToolRegistry::new());

    let err = session.send("go").await.unwrap_err();
    assert!(matches!(err, SessionError::Engine(EngineError::IncompleteStream)));
    assert_eq!(session.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_new_turn_never_continues_previous_turn_response() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_text("resp_1", "hi");
    let mut session = manual(&engine, ToolRegistry::new());
    expect_complete(session.send("hello").await.unwrap());
    assert_eq!(session.state().previous_response_id(), Some("resp_1"));

    // The second turn's response raises approvals but carries no id.
    engine.queue_events(vec![
        StreamEvent::ApprovalRequest {
            request: hosted("mcpr_9", "api-specs"),
        },
        StreamEvent::Done { response_id: None },
    ]);
    expect_pending(session.send("again").await.unwrap());
    assert!(session.state().previous_response_id().is_none());

    let err = session
        .submit_approvals(vec![ApprovalResponse::approve("mcpr_9")])
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Engine(EngineError::InvalidResponse(_))));
    assert_eq!(session.phase(), SessionPhase::Idle);

    assert_eq!(engine.round_trips(), 2);
    assert!(engine
        .requests()
        .iter()
        .skip(1)
        .all(|r| r.previous_response_id.as_deref() != Some("resp_1")));
}

#[tokio::test]
async fn test_engine_error_event_fails_the_turn() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_events(vec![
        StreamEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        },
        StreamEvent::Error {
            message: "model overloaded".to_string(),
        },
        StreamEvent::Done { response_id: None },
    ]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = manual(&engine, ToolRegistry::new()).with_event_sink(tx);

    let err = session.send("go").await.unwrap_err();
    assert!(matches!(err, SessionError::Engine(EngineError::Reported(ref m)) if m == "model overloaded"));
    assert!(err.to_string().contains("model overloaded"));
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(session.state().previous_response_id().is_none());

    let mut forwarded = Vec::new();
    while let Ok(event) = rx.try_recv() {
        forwarded.push(event);
    }
    assert!(forwarded.contains(&StreamEvent::Error {
        message: "model overloaded".to_string(),
    }));
}

#[tokio::test]
async fn test_engine_error_before_stream_end_keeps_message() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_events(vec![
        StreamEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        },
        StreamEvent::Error {
            message: "model overloaded".to_string(),
        },
    ]);
    let mut session = manual(&engine, ToolRegistry::new());

    let err = session.send("go").await.unwrap_err();
    assert!(matches!(err, SessionError::Engine(EngineError::Reported(ref m)) if m == "model overloaded"));
    assert_eq!(session.phase(), SessionPhase::Idle);

    engine.queue_text("resp_2", "recovered");
    let output = expect_complete(session.send("go").await.unwrap());
    assert_eq!(output.text, "recovered");
}

#[tokio::test]
async fn test_round_trip_limit() {
    let mut registry = ToolRegistry::new();
    registry.register("calculator", CountingTool::new("eval", "1")).unwrap();
    let engine = Arc::new(MockResponseEngine::new());
    for i in 0..3 {
        engine.queue_tool_calls(
            &format!("resp_{}", i),
            vec![call(&format!("call_{}", i), "calculator", "eval")],
        );
    }
    let mut session = manual(&engine, registry).with_options(SessionOptions {
        max_round_trips: 2,
        ..SessionOptions::default()
    });

    let err = session.send("loop forever").await.unwrap_err();
    assert!(matches!(err, SessionError::RoundTripLimit(2)));
    assert_eq!(engine.round_trips(), 2);
}

#[tokio::test]
async fn test_events_forwarded_in_order() {
    let engine = Arc::new(MockResponseEngine::new());
    engine.queue_events(vec![
        StreamEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        },
        StreamEvent::TextDelta {
            text: "one ".to_string(),
        },
        StreamEvent::TextDelta {
            text: "two".to_string(),
        },
        StreamEvent::Done { response_id: None },
    ]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = manual(&engine, ToolRegistry::new()).with_event_sink(tx);

    let output = expect_complete(session.send("count").await.unwrap());
    assert_eq!(output.text, "one two");

    let mut texts = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let StreamEvent::TextDelta { text } = event {
            texts.push(text);
        }
    }
    assert_eq!(texts, vec!["one ", "two"]);
}
