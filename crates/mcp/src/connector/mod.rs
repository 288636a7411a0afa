//! Transport connectors.
//!
//! A [`Connector`] moves JSON-RPC messages to and from one tool server. The
//! three variants differ only in framing:
//!
//! - [`StdioConnector`]: a subprocess, newline-delimited JSON on stdin/stdout.
//! - [`HttpConnector`]: one HTTP POST per exchange, JSON or SSE replies.
//! - [`SocketConnector`]: one WebSocket, frames multiplexed by request id.
//!
//! The MCP conversation on top (handshake, discovery, calls) is shared and
//! lives in [`McpClient`](crate::client::McpClient).

mod http;
pub(crate) mod rpc;
mod stdio;
mod websocket;

pub use http::HttpConnector;
pub use stdio::StdioConnector;
pub use websocket::SocketConnector;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use toolgate_core::{Endpoint, ToolServerDescriptor, TransportKind};

use crate::error::McpError;

/// An open channel to one tool server.
///
/// Callers own the release: `close` must run on every exit path once
/// [`open`] has returned a connector.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Send a request and wait up to `timeout` for the reply's `result`.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError>;

    /// Send a notification. No reply is expected.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// Release the channel. Safe to call more than once.
    async fn close(&self);
}

/// Open the transport a descriptor names, bounded by `connect_timeout`.
///
/// Nothing is left running when this fails: partially opened resources are
/// dropped, which kills spawned processes and closes sockets.
pub async fn open(
    descriptor: &ToolServerDescriptor,
    connect_timeout: Duration,
) -> Result<Arc<dyn Connector>, McpError> {
    tracing::debug!(
        server = %descriptor.name,
        transport = %descriptor.transport(),
        target = %descriptor.endpoint.target(),
        "Opening transport"
    );

    let opening = async {
        let connector: Arc<dyn Connector> = match &descriptor.endpoint {
            Endpoint::Process { command, args, env } => {
                Arc::new(StdioConnector::spawn(&descriptor.name, command, args, env)?)
            }
            Endpoint::Http { url, headers } => {
                Arc::new(HttpConnector::new(url, headers, connect_timeout)?)
            }
            Endpoint::Socket { url, headers } => {
                Arc::new(SocketConnector::connect(url, headers).await?)
            }
        };
        Ok::<_, McpError>(connector)
    };

    tokio::time::timeout(connect_timeout, opening)
        .await
        .map_err(|_| McpError::timeout(format!("connect to '{}'", descriptor.name), connect_timeout))?
}
