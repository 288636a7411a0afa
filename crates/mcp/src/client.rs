//! MCP client implementation.
//!
//! Runs the MCP conversation over any [`Connector`]: the `initialize`
//! handshake, paginated tool discovery, and `tools/call`. Each discovered
//! tool is exposed as a [`Tool`] through [`McpTool`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use toolgate_core::{Timeouts, ToolServerDescriptor, TransportKind};
use toolgate_tool_runtime::{Tool, ToolCapability, ToolContext, ToolDefinition, ToolError, ToolResult};

use crate::connector::{self, Connector};
use crate::error::McpError;
use crate::types::*;

/// A connected, initialized tool server.
pub struct McpClient {
    label: String,
    requires_approval: bool,
    connector: Arc<dyn Connector>,
    server_info: Implementation,
    protocol_version: String,
    tools: Vec<ToolInfo>,
    invoke_timeout: Duration,
}

impl McpClient {
    /// Open the descriptor's transport, run the handshake and list tools.
    ///
    /// On any failure the transport is closed before the error is returned.
    pub async fn connect(
        descriptor: &ToolServerDescriptor,
        timeouts: &Timeouts,
    ) -> Result<Self, McpError> {
        let connector = connector::open(descriptor, timeouts.connect).await?;
        Self::establish(
            &descriptor.name,
            descriptor.requires_approval,
            connector,
            timeouts,
        )
        .await
    }

    /// Handshake and discovery over an already open connector.
    pub(crate) async fn establish(
        label: &str,
        requires_approval: bool,
        connector: Arc<dyn Connector>,
        timeouts: &Timeouts,
    ) -> Result<Self, McpError> {
        let established = async {
            let init = initialize(label, connector.as_ref(), timeouts.connect).await?;
            let tools = list_tools(connector.as_ref(), timeouts.list_tools).await?;
            Ok::<_, McpError>((init, tools))
        };

        match established.await {
            Ok((init, tools)) => {
                tracing::info!(
                    server = %label,
                    transport = %connector.kind(),
                    remote = %init.server_info.name,
                    protocol = %init.protocol_version,
                    tools = tools.len(),
                    "Tool server connected"
                );
                Ok(Self {
                    label: label.to_string(),
                    requires_approval,
                    connector,
                    server_info: init.server_info,
                    protocol_version: init.protocol_version,
                    tools,
                    invoke_timeout: timeouts.invoke,
                })
            }
            Err(e) => {
                connector.close().await;
                Err(e)
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    pub fn transport(&self) -> TransportKind {
        self.connector.kind()
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Tools the server advertised, in the order it listed them.
    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn capabilities(&self) -> Vec<ToolCapability> {
        self.tools.iter().map(|t| t.capability(&self.label)).collect()
    }

    /// Invoke a tool, bounded by the invoke timeout.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        call_tool(self.connector.as_ref(), name, arguments, self.invoke_timeout).await
    }

    /// One [`Tool`] per discovered tool, each routed back to this server.
    pub fn create_tool_adapters(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .map(|info| {
                Arc::new(McpTool {
                    server_label: self.label.clone(),
                    info: info.clone(),
                    connector: Arc::clone(&self.connector),
                    timeout: self.invoke_timeout,
                }) as Arc<dyn Tool>
            })
            .collect()
    }

    /// Release the transport. Adapters created from this client stop working.
    pub async fn close(&self) {
        self.connector.close().await;
        tracing::info!(server = %self.label, "Tool server disconnected");
    }
}

async fn initialize(
    label: &str,
    connector: &dyn Connector,
    timeout: Duration,
) -> Result<InitializeResult, McpError> {
    let params = InitializeParams {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: serde_json::json!({}),
        client_info: Implementation {
            name: "toolgate".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        },
    };

    let handshake_failed =
        |e: McpError| McpError::Connect(format!("handshake with '{}' failed: {}", label, e));

    let raw = connector
        .request("initialize", Some(serde_json::to_value(params)?), timeout)
        .await
        .map_err(handshake_failed)?;
    let init: InitializeResult = serde_json::from_value(raw).map_err(|e| {
        McpError::Connect(format!("'{}' sent a malformed initialize result: {}", label, e))
    })?;

    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
        return Err(McpError::UnsupportedVersion(init.protocol_version));
    }

    connector
        .notify("notifications/initialized", None)
        .await
        .map_err(handshake_failed)?;
    Ok(init)
}

/// Follow `nextCursor` until the server stops paginating.
async fn list_tools(connector: &dyn Connector, timeout: Duration) -> Result<Vec<ToolInfo>, McpError> {
    let mut tools = Vec::new();
    let mut seen_cursors = HashSet::new();
    let mut cursor: Option<String> = None;

    loop {
        let params = serde_json::to_value(ListToolsParams { cursor: cursor.clone() })?;
        let raw = connector.request("tools/list", Some(params), timeout).await?;
        let page: ListToolsResult = serde_json::from_value(raw)
            .map_err(|e| McpError::Protocol(format!("malformed tools/list result: {}", e)))?;

        for tool in &page.tools {
            tracing::debug!(tool = %tool.name, "Discovered tool");
        }
        tools.extend(page.tools);

        match page.next_cursor {
            Some(next) if !seen_cursors.insert(next.clone()) => {
                return Err(McpError::Protocol(format!(
                    "tools/list repeated cursor '{}'",
                    next
                )));
            }
            Some(next) => cursor = Some(next),
            None => return Ok(tools),
        }
    }
}

async fn call_tool(
    connector: &dyn Connector,
    name: &str,
    arguments: Value,
    timeout: Duration,
) -> Result<CallToolResult, McpError> {
    let params = serde_json::to_value(CallToolParams {
        name: name.to_string(),
        arguments,
    })?;
    let raw = connector.request("tools/call", Some(params), timeout).await?;
    serde_json::from_value(raw)
        .map_err(|e| McpError::Protocol(format!("malformed tools/call result: {}", e)))
}

/// A remote tool seen through the [`Tool`] trait.
///
/// Failures never escape as errors: transport faults, timeouts and
/// server-side tool errors all come back as an error [`ToolResult`].
pub struct McpTool {
    server_label: String,
    info: ToolInfo,
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

#[async_trait]
impl Tool for McpTool {
    fn definition(&self) -> ToolDefinition {
        self.info.clone().into()
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        tracing::debug!(
            server = %self.server_label,
            tool = %self.info.name,
            id = %context.tool_call_id,
            "Invoking remote tool"
        );

        let result = call_tool(self.connector.as_ref(), &self.info.name, input, self.timeout).await;
        Ok(match result {
            Ok(result) => ToolResult {
                tool_call_id: context.tool_call_id.clone(),
                content: result.joined_text(),
                is_error: result.is_error,
            },
            Err(McpError::Timeout { after, .. }) => {
                tracing::warn!(server = %self.server_label, tool = %self.info.name, "Tool call timed out");
                ToolResult::error(
                    &context.tool_call_id,
                    format!("Tool '{}' timed out after {:?}", self.info.name, after),
                )
            }
            Err(e) => {
                tracing::warn!(server = %self.server_label, tool = %self.info.name, error = %e, "Tool call failed");
                ToolResult::error(
                    &context.tool_call_id,
                    format!("Tool '{}' failed: {}", self.info.name, e),
                )
            }
        })
    }
}
