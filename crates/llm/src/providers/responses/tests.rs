use serde_json::json;

use toolgate_tool_runtime::{
    EngineError, InputItem, ResponseRequest, StreamEvent, ToolCapability,
};

use super::translate::{parse_chunk, parse_response, request_body};

fn request() -> ResponseRequest {
    ResponseRequest {
        input: vec![InputItem::user("hi")],
        conversation_id: Some("conv_1".to_string()),
        previous_response_id: None,
        tools: vec![ToolCapability {
            server_label: "api-specs".to_string(),
            tool_name: "search".to_string(),
            description: "Search specs".to_string(),
            parameter_schema: json!({"type": "object"}),
        }],
        instructions: Some("Be brief.".to_string()),
    }
}

#[test]
fn test_request_body_shape() {
    let body = request_body("gpt-4.1", Some("MyAgent"), &request());

    assert_eq!(body["model"], "gpt-4.1");
    assert_eq!(body["stream"], true);
    assert_eq!(body["conversationId"], "conv_1");
    assert!(body.get("previousResponseId").is_none());
    assert_eq!(body["input"][0], json!({"type": "message", "role": "user", "content": "hi"}));
    assert_eq!(body["tools"][0]["name"], "api-specs__search");
    assert_eq!(body["tools"][0]["parameters"], json!({"type": "object"}));
    assert_eq!(body["instructions"], "Be brief.");
    assert_eq!(body["agent"], json!({"name": "MyAgent", "type": "agent_reference"}));
}

#[test]
fn test_continuation_body_carries_decisions() {
    let request = ResponseRequest {
        input: vec![InputItem::McpApprovalResponse {
            approval_request_id: "mcpr_1".to_string(),
            approve: true,
        }],
        conversation_id: None,
        previous_response_id: Some("resp_1".to_string()),
        tools: Vec::new(),
        instructions: None,
    };
    let body = request_body("gpt-4.1", None, &request);

    assert_eq!(body["previousResponseId"], "resp_1");
    assert_eq!(
        body["input"][0],
        json!({"type": "mcp_approval_response", "approval_request_id": "mcpr_1", "approve": true})
    );
    assert!(body.get("tools").is_none());
    assert!(body.get("agent").is_none());
}

#[test]
fn test_stream_chunks() {
    let created = parse_chunk(r#"{"type":"response.created","response":{"id":"resp_7"}}"#).unwrap();
    assert_eq!(
        created,
        vec![StreamEvent::ResponseCreated {
            response_id: "resp_7".to_string()
        }]
    );

    let delta = parse_chunk(r#"{"type":"response.output_text.delta","delta":"Hel"}"#).unwrap();
    assert_eq!(delta, vec![StreamEvent::TextDelta { text: "Hel".to_string() }]);

    let done = parse_chunk(r#"{"type":"done"}"#).unwrap();
    assert_eq!(done, vec![StreamEvent::Done { response_id: None }]);

    assert!(parse_chunk(r#"{"type":"response.in_progress"}"#).unwrap().is_empty());
    assert!(matches!(
        parse_chunk("not json"),
        Err(EngineError::InvalidResponse(_))
    ));
}

#[test]
fn test_output_items() {
    let call = parse_chunk(
        r#"{"type":"response.output_item.done","item":{"type":"function_call","call_id":"call_1","name":"rates__convert","arguments":"{\"from\":\"USD\"}"}}"#,
    )
    .unwrap();
    let StreamEvent::ToolCall { call } = &call[0] else {
        panic!("expected a tool call, got {:?}", call);
    };
    assert_eq!(call.id, "call_1");
    assert_eq!(call.server_label, "rates");
    assert_eq!(call.tool_name, "convert");
    assert_eq!(call.arguments["from"], "USD");

    let approval = parse_chunk(
        r#"{"type":"response.output_item.done","item":{"type":"mcp_approval_request","id":"mcpr_1","server_label":"api-specs","name":"fetch_readme","arguments":"{}"}}"#,
    )
    .unwrap();
    let StreamEvent::ApprovalRequest { request } = &approval[0] else {
        panic!("expected an approval request, got {:?}", approval);
    };
    assert_eq!(request.id, "mcpr_1");
    assert_eq!(request.server_label, "api-specs");
    assert_eq!(request.tool_call_id, None);
    assert_eq!(request.tool_name.as_deref(), Some("fetch_readme"));

    // Streamed message items repeat text the deltas already carried.
    let message = parse_chunk(
        r#"{"type":"response.output_item.done","item":{"type":"message","content":[{"type":"output_text","text":"dup"}]}}"#,
    )
    .unwrap();
    assert!(message.is_empty());

    let bad = parse_chunk(
        r#"{"type":"response.output_item.done","item":{"type":"function_call","call_id":"c","name":"x","arguments":"[1"}}"#,
    );
    assert!(matches!(bad, Err(EngineError::InvalidResponse(_))));
}

#[test]
fn test_single_json_response() {
    let events = parse_response(
        &json!({
            "id": "resp_2",
            "output": [
                {"type": "mcp_approval_request", "id": "mcpr_9", "server_label": "api-specs"},
                {"type": "message", "content": [{"type": "output_text", "text": "Need approval."}]}
            ]
        })
        .to_string(),
    )
    .unwrap();

    assert_eq!(events.len(), 4);
    assert_eq!(
        events[0],
        StreamEvent::ResponseCreated {
            response_id: "resp_2".to_string()
        }
    );
    assert!(matches!(&events[1], StreamEvent::ApprovalRequest { request } if request.id == "mcpr_9"));
    assert_eq!(events[2], StreamEvent::TextDelta { text: "Need approval.".to_string() });
    assert_eq!(
        events[3],
        StreamEvent::Done {
            response_id: Some("resp_2".to_string())
        }
    );
}

#[test]
fn test_single_json_output_text_and_error() {
    let events = parse_response(r#"{"id":"resp_3","output":[],"output_text":"plain"}"#).unwrap();
    assert_eq!(events[1], StreamEvent::TextDelta { text: "plain".to_string() });

    let events = parse_response(r#"{"id":"resp_4","error":{"message":"model overloaded"}}"#).unwrap();
    assert!(events.contains(&StreamEvent::Error {
        message: "model overloaded".to_string()
    }));
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
}
