use crate::stream::ResponseStream;
use crate::tool::ToolCapability;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Trait for response engines that accept tool catalogs and stream output.
///
/// This trait lives in tool-runtime (not in crates/llm) because it's
/// defined by the consumer (the conversation session), not the engine.
/// Implementations live in crates/llm or adapter crates.
#[async_trait]
pub trait ResponseEngine: Send + Sync {
    /// Send one request and return its chunk stream.
    ///
    /// A request whose `previous_response_id` the engine does not recognise
    /// must fail with [`EngineError::StaleResponse`].
    async fn create_response(&self, request: ResponseRequest) -> Result<ResponseStream, EngineError>;

    /// Engine name for logging/debugging
    fn engine_name(&self) -> &str;
}

/// One request to the response engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRequest {
    pub input: Vec<InputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl ResponseRequest {
    pub fn is_continuation(&self) -> bool {
        self.previous_response_id.is_some()
    }
}

/// An item of request input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /// A user (or system) message
    Message { role: String, content: String },
    /// Output of a client-side tool call
    FunctionCallOutput {
        call_id: String,
        output: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Decision on an approval request
    McpApprovalResponse {
        approval_request_id: String,
        approve: bool,
    },
}

impl InputItem {
    pub fn user(text: impl Into<String>) -> Self {
        Self::Message {
            role: "user".to_string(),
            content: text.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Authentication failed")]
    Auth,
    #[error("Credential unavailable: {0}")]
    Credential(String),
    #[error("Unknown or expired previous response id: {0}")]
    StaleResponse(String),
    #[error("Engine reported an error: {0}")]
    Reported(String),
    #[error("Response stream ended before completion")]
    IncompleteStream,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Mock engine for testing the session without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::approval::ApprovalRequest;
    use crate::stream::StreamEvent;
    use crate::tool::ToolCallRequest;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// An engine that replays queued replies in order and records every request.
    pub struct MockResponseEngine {
        replies: Mutex<VecDeque<Result<Vec<StreamEvent>, EngineError>>>,
        requests: Mutex<Vec<ResponseRequest>>,
    }

    impl MockResponseEngine {
        pub fn new() -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Queue raw events. No sentinel is added, so a reply without `Done`
        /// surfaces as an incomplete stream.
        pub fn queue_events(&self, events: Vec<StreamEvent>) {
            self.replies.lock().unwrap().push_back(Ok(events));
        }

        pub fn queue_error(&self, error: EngineError) {
            self.replies.lock().unwrap().push_back(Err(error));
        }

        /// Queue a complete plain-text response.
        pub fn queue_text(&self, response_id: &str, text: &str) {
            self.queue_events(vec![
                StreamEvent::ResponseCreated {
                    response_id: response_id.to_string(),
                },
                StreamEvent::TextDelta {
                    text: text.to_string(),
                },
                StreamEvent::Done { response_id: None },
            ]);
        }

        /// Queue a complete response that carries tool calls.
        pub fn queue_tool_calls(&self, response_id: &str, calls: Vec<ToolCallRequest>) {
            let mut events = vec![StreamEvent::ResponseCreated {
                response_id: response_id.to_string(),
            }];
            events.extend(calls.into_iter().map(|call| StreamEvent::ToolCall { call }));
            events.push(StreamEvent::Done { response_id: None });
            self.queue_events(events);
        }

        /// Queue a complete response that carries hosted approval requests.
        pub fn queue_approvals(&self, response_id: &str, requests: Vec<ApprovalRequest>) {
            let mut events = vec![StreamEvent::ResponseCreated {
                response_id: response_id.to_string(),
            }];
            events.extend(
                requests
                    .into_iter()
                    .map(|request| StreamEvent::ApprovalRequest { request }),
            );
            events.push(StreamEvent::Done { response_id: None });
            self.queue_events(events);
        }

        /// Every request received so far.
        pub fn requests(&self) -> Vec<ResponseRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn round_trips(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl Default for MockResponseEngine {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ResponseEngine for MockResponseEngine {
        async fn create_response(
            &self,
            request: ResponseRequest,
        ) -> Result<ResponseStream, EngineError> {
            self.requests.lock().unwrap().push(request);
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(vec![StreamEvent::Done { response_id: None }])
            });
            let events = reply?;
            Ok(ResponseStream::new(futures::stream::iter(
                events.into_iter().map(Ok),
            )))
        }

        fn engine_name(&self) -> &str {
            "mock"
        }
    }
}
