//! Conversion between toolgate types and the responses wire format.

use serde_json::{json, Map, Value};
use tracing::trace;

use toolgate_tool_runtime::{
    ApprovalRequest, EngineError, ResponseRequest, StreamEvent, ToolCallRequest,
};

/// Joins server label and tool name into one function name, since the
/// engine's function namespace is flat.
pub(super) const NAME_SEPARATOR: &str = "__";

pub(super) fn request_body(model: &str, agent_name: Option<&str>, request: &ResponseRequest) -> Value {
    let mut body = json!({
        "model": model,
        "input": request.input,
        "stream": true,
    });

    if let Some(conversation_id) = &request.conversation_id {
        body["conversationId"] = json!(conversation_id);
    }
    if let Some(previous) = &request.previous_response_id {
        body["previousResponseId"] = json!(previous);
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|cap| {
                json!({
                    "type": "function",
                    "name": format!("{}{}{}", cap.server_label, NAME_SEPARATOR, cap.tool_name),
                    "description": cap.description,
                    "parameters": cap.parameter_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    if let Some(instructions) = &request.instructions {
        body["instructions"] = json!(instructions);
    }
    if let Some(agent) = agent_name {
        body["agent"] = json!({"name": agent, "type": "agent_reference"});
    }
    body
}

/// Translate one streamed chunk.
pub(super) fn parse_chunk(line: &str) -> Result<Vec<StreamEvent>, EngineError> {
    let chunk: Value = serde_json::from_str(line)
        .map_err(|e| EngineError::InvalidResponse(format!("malformed chunk: {}", e)))?;

    let events = match chunk["type"].as_str() {
        Some("response.created") => match chunk["response"]["id"].as_str() {
            Some(id) => vec![StreamEvent::ResponseCreated {
                response_id: id.to_string(),
            }],
            None => Vec::new(),
        },
        Some("response.output_text.delta") => match chunk["delta"].as_str() {
            Some(text) if !text.is_empty() => vec![StreamEvent::TextDelta {
                text: text.to_string(),
            }],
            _ => Vec::new(),
        },
        // Message text already arrived as deltas.
        Some("response.output_item.done") => item_events(&chunk["item"], false)?,
        Some("done") | Some("response.completed") => vec![StreamEvent::Done {
            response_id: chunk["response"]["id"]
                .as_str()
                .or_else(|| chunk["response_id"].as_str())
                .map(String::from),
        }],
        Some("error") | Some("response.failed") => vec![StreamEvent::Error {
            message: error_message(&chunk),
        }],
        other => {
            trace!(chunk_type = ?other, "ignoring chunk");
            Vec::new()
        }
    };
    Ok(events)
}

/// Translate a complete, non-streamed response body.
pub(super) fn parse_response(body: &str) -> Result<Vec<StreamEvent>, EngineError> {
    let response: Value = serde_json::from_str(body)
        .map_err(|e| EngineError::InvalidResponse(format!("malformed response: {}", e)))?;
    let response_id = response["id"].as_str().map(String::from);

    let mut events = Vec::new();
    if let Some(id) = &response_id {
        events.push(StreamEvent::ResponseCreated {
            response_id: id.clone(),
        });
    }

    match response["output"].as_array() {
        Some(items) if !items.is_empty() => {
            for item in items {
                events.extend(item_events(item, true)?);
            }
        }
        _ => {
            if let Some(text) = response["output_text"].as_str() {
                events.push(StreamEvent::TextDelta {
                    text: text.to_string(),
                });
            }
        }
    }

    if !response["error"].is_null() {
        events.push(StreamEvent::Error {
            message: error_message(&response),
        });
    }
    events.push(StreamEvent::Done { response_id });
    Ok(events)
}

fn item_events(item: &Value, include_text: bool) -> Result<Vec<StreamEvent>, EngineError> {
    match item["type"].as_str() {
        Some("message") if include_text => Ok(item["content"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| p["type"] == "output_text")
                    .filter_map(|p| p["text"].as_str())
                    .map(|text| StreamEvent::TextDelta {
                        text: text.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()),
        Some("function_call") => {
            let id = item["call_id"]
                .as_str()
                .or_else(|| item["id"].as_str())
                .ok_or_else(|| EngineError::InvalidResponse("function_call without call_id".into()))?;
            let name = item["name"]
                .as_str()
                .ok_or_else(|| EngineError::InvalidResponse("function_call without name".into()))?;
            let (server_label, tool_name) = split_name(name, item["server_label"].as_str());
            Ok(vec![StreamEvent::ToolCall {
                call: ToolCallRequest {
                    id: id.to_string(),
                    server_label,
                    tool_name,
                    arguments: arguments(&item["arguments"])?,
                },
            }])
        }
        Some("mcp_approval_request") => {
            let id = item["id"].as_str().ok_or_else(|| {
                EngineError::InvalidResponse("mcp_approval_request without id".into())
            })?;
            let server_label = item["server_label"].as_str().ok_or_else(|| {
                EngineError::InvalidResponse("mcp_approval_request without server_label".into())
            })?;
            let arguments = match &item["arguments"] {
                Value::Null => None,
                raw => Some(Value::Object(arguments(raw)?)),
            };
            Ok(vec![StreamEvent::ApprovalRequest {
                request: ApprovalRequest {
                    id: id.to_string(),
                    server_label: server_label.to_string(),
                    tool_call_id: None,
                    tool_name: item["name"].as_str().map(String::from),
                    arguments,
                },
            }])
        }
        other => {
            trace!(item_type = ?other, "ignoring output item");
            Ok(Vec::new())
        }
    }
}

fn split_name(name: &str, server_label: Option<&str>) -> (String, String) {
    match server_label {
        Some(label) => {
            let prefix = format!("{}{}", label, NAME_SEPARATOR);
            let tool = name.strip_prefix(&prefix).unwrap_or(name);
            (label.to_string(), tool.to_string())
        }
        None => match name.split_once(NAME_SEPARATOR) {
            Some((label, tool)) => (label.to_string(), tool.to_string()),
            None => (String::new(), name.to_string()),
        },
    }
}

/// Arguments arrive either as an object or as a JSON-encoded string.
fn arguments(raw: &Value) -> Result<Map<String, Value>, EngineError> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::String(s) if s.trim().is_empty() => Ok(Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(EngineError::InvalidResponse(
                "tool arguments are not an object".into(),
            )),
            Err(e) => Err(EngineError::InvalidResponse(format!(
                "malformed tool arguments: {}",
                e
            ))),
        },
        Value::Null => Ok(Map::new()),
        _ => Err(EngineError::InvalidResponse(
            "tool arguments are not an object".into(),
        )),
    }
}

fn error_message(value: &Value) -> String {
    value["error"]["message"]
        .as_str()
        .or_else(|| value["message"].as_str())
        .or_else(|| value["error"].as_str())
        .unwrap_or("unknown engine error")
        .to_string()
}
