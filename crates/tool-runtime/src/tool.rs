use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Describes a tool's interface as advertised by the server that hosts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique within its server (e.g., "get_exchange_rate")
    pub name: String,
    /// Human-readable description for the model
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// A catalog entry: one tool on one server, as attached to outgoing requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCapability {
    pub server_label: String,
    pub tool_name: String,
    pub description: String,
    pub parameter_schema: Value,
}

/// The response engine asking for a tool to be run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique ID for this invocation (used to match results)
    pub id: String,
    /// Label of the server that owns the tool
    pub server_label: String,
    /// Tool name to execute
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Result of executing a tool, sent back to the response engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must match the ToolCallRequest id
    pub tool_call_id: String,
    /// Result content (text)
    pub content: String,
    /// Whether this result represents an error
    pub is_error: bool,
}

impl ToolResult {
    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// Context passed to tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Id of the call being served; copied onto the result
    pub tool_call_id: String,
}

/// The primary extension point: local tools and remote tool adapters both
/// implement this trait.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, JSON Schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON input.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Server unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

impl fmt::Display for ToolCallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.server_label, self.tool_name, self.id)
    }
}

/// Echoes back its `message` argument. Served by the bundled echo server.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes back the input message.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to echo back"
                    }
                },
                "required": ["message"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let message = input
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;

        Ok(ToolResult {
            tool_call_id: context.tool_call_id.clone(),
            content: message.to_string(),
            is_error: false,
        })
    }
}

/// Test doubles for tools.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// A tool that records every invocation and replies with a fixed text.
    pub struct CountingTool {
        name: String,
        reply: String,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl CountingTool {
        pub fn new(name: &str, reply: &str) -> Self {
            Self {
                name: name.to_string(),
                reply: reply.to_string(),
                calls: Arc::new(AtomicUsize::new(0)),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Shared invocation counter; stays valid after the tool is moved into a registry.
        pub fn counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }

        /// Shared list of call ids this tool has served.
        pub fn seen_ids(&self) -> Arc<Mutex<Vec<String>>> {
            Arc::clone(&self.seen)
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.clone(),
                description: format!("Test tool {}", self.name),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(context.tool_call_id.clone());
            Ok(ToolResult {
                tool_call_id: context.tool_call_id.clone(),
                content: self.reply.clone(),
                is_error: false,
            })
        }
    }

    /// A tool whose every call fails inside the server.
    pub struct FailingTool(pub &'static str);

    #[async_trait]
    impl Tool for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.0.to_string(),
                description: "Always fails".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
            Err(ToolError::ExecutionFailed("upstream rate API returned 503".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_request_defaults_arguments() {
        let call: ToolCallRequest = serde_json::from_value(serde_json::json!({
            "id": "call_001",
            "server_label": "calculator",
            "tool_name": "add",
        }))
        .unwrap();
        assert!(call.arguments.is_empty());
        assert_eq!(call.to_string(), "calculator/add#call_001");
    }

    #[test]
    fn test_error_result_helper() {
        let result = ToolResult::error("call_9", "boom");
        assert!(result.is_error);
        assert_eq!(result.tool_call_id, "call_9");
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let tool = EchoTool;
        let def = tool.definition();
        assert_eq!(def.name, "echo");

        let ctx = ToolContext {
            tool_call_id: "call_1".to_string(),
        };
        let result = tool
            .execute(serde_json::json!({"message": "hello world"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.content, "hello world");
        assert_eq!(result.tool_call_id, "call_1");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_echo_tool_rejects_missing_message() {
        let ctx = ToolContext {
            tool_call_id: "call_2".to_string(),
        };
        let err = EchoTool.execute(serde_json::json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
