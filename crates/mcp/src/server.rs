//! A local tool server.
//!
//! Serves a fixed set of [`Tool`]s over any [`LineTransport`]. Used by the
//! `toolgate-echo-server` binary and by tests that need a real peer.

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use toolgate_tool_runtime::{Tool, ToolContext};

use crate::error::McpError;
use crate::transport::LineTransport;
use crate::types::*;

/// Serves local tools to MCP clients.
pub struct McpServer {
    tools: IndexMap<String, Arc<dyn Tool>>,
    server_name: String,
    server_version: String,
    initialized: bool,
}

impl McpServer {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            tools: IndexMap::new(),
            server_name: server_name.into(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            initialized: false,
        }
    }

    /// Add a tool. A later tool with the same name replaces the earlier one.
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        let name = tool.definition().name;
        self.tools.insert(name, Arc::new(tool));
        self
    }

    /// Serve until the peer closes the transport.
    pub async fn run<T: LineTransport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, tools = self.tools.len(), "MCP server starting");

        while let Some(line) = transport.receive().await? {
            tracing::debug!(message = %line, "Received message");
            if let Some(reply) = self.handle_line(&line).await {
                let json = serde_json::to_string(&reply)?;
                tracing::debug!(response = %json, "Sending response");
                transport.send(&json).await?;
            }
        }

        tracing::info!("Transport closed, shutting down");
        Ok(())
    }

    /// Handle one raw line. Notifications produce no reply.
    pub async fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse JSON");
                return Some(error_reply(RpcId::Number(0), McpError::JsonParse(e)));
            }
        };

        match IncomingMessage::classify(raw) {
            Ok(IncomingMessage::Request(request)) => Some(self.handle_request(&request).await),
            Ok(IncomingMessage::Notification(notification)) => {
                self.handle_notification(&notification);
                None
            }
            Ok(IncomingMessage::Response(response)) => {
                tracing::debug!(id = ?response.id, "Ignoring response sent to server");
                None
            }
            Err(e) => Some(error_reply(RpcId::Number(0), McpError::JsonParse(e))),
        }
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(request.params.as_ref()),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" | "tools/call" if !self.initialized => Err(McpError::NotInitialized),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(&id, request.params.as_ref()).await,
            method => {
                tracing::warn!(method = %method, "Unknown method");
                Err(McpError::MethodNotFound(method.to_string()))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => error_reply(id, e),
        }
    }

    fn handle_notification(&mut self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => tracing::info!("Client confirmed initialization"),
            "notifications/cancelled" => tracing::debug!("Client cancelled a request"),
            "notifications/shutdown" => tracing::info!("Client announced shutdown"),
            method => tracing::debug!(method = %method, "Unknown notification, ignoring"),
        }
    }

    fn initialize(&mut self, params: Option<&Value>) -> Result<Value, McpError> {
        let params: InitializeParams = params
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;

        tracing::info!(
            client = %params.client_info.name,
            requested = %params.protocol_version,
            "Handling initialize"
        );
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: Implementation {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
        };
        Ok(serde_json::to_value(result)?)
    }

    fn list_tools(&self) -> Result<Value, McpError> {
        let tools = self
            .tools
            .values()
            .map(|tool| ToolInfo::from(tool.definition()))
            .collect();
        Ok(serde_json::to_value(ListToolsResult {
            tools,
            next_cursor: None,
        })?)
    }

    async fn call_tool(&self, id: &RpcId, params: Option<&Value>) -> Result<Value, McpError> {
        let params: CallToolParams = match params {
            Some(p) => serde_json::from_value(p.clone())
                .map_err(|e| McpError::InvalidParams(e.to_string()))?,
            None => return Err(McpError::InvalidParams("missing params".to_string())),
        };

        tracing::debug!(tool = %params.name, "Handling tools/call");
        let tool = self
            .tools
            .get(&params.name)
            .ok_or_else(|| McpError::ToolNotFound(params.name.clone()))?;

        let context = ToolContext {
            tool_call_id: match id {
                RpcId::Number(n) => n.to_string(),
                RpcId::String(s) => s.clone(),
            },
        };
        // Execution failures are tool results, not protocol errors.
        let result = match tool.execute(params.arguments, &context).await {
            Ok(output) => CallToolResult::text(output.content, output.is_error),
            Err(e) => CallToolResult::text(e.to_string(), true),
        };
        Ok(serde_json::to_value(result)?)
    }
}

fn error_reply(id: RpcId, error: McpError) -> JsonRpcResponse {
    let rpc = error.to_rpc_error();
    JsonRpcResponse::error(id, rpc.code, rpc.message)
}
