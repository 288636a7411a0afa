//! MCP (Model Context Protocol) plumbing for toolgate.
//!
//! Tool servers speak JSON-RPC 2.0 over one of three transports. This crate
//! opens them, discovers their tools and exposes every remote tool as a
//! [`Tool`](toolgate_tool_runtime::Tool) so the conversation session can
//! route calls without knowing where a tool lives.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **connector**: process-pipe, HTTP-stream and persistent-socket transports
//! - **client**: handshake, discovery and `tools/call` over a connector
//! - **hub**: concurrent connect of many servers into one `ToolRegistry`
//! - **transport** / **server**: a local line-oriented MCP server
//! - **error**: Unified error types
//!
//! # Usage
//!
//! ```no_run
//! use toolgate_core::{Timeouts, ToolServerDescriptor};
//! use toolgate_mcp::ToolHub;
//!
//! # async fn example() {
//! let servers = vec![ToolServerDescriptor::process("echo", "toolgate-echo-server", &[])];
//! let hub = ToolHub::connect_all(&servers, &Timeouts::default()).await;
//! for capability in hub.capabilities() {
//!     println!("{}/{}", capability.server_label, capability.tool_name);
//! }
//! hub.close_all().await;
//! # }
//! ```

pub mod client;
pub mod connector;
pub mod error;
pub mod hub;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{McpClient, McpTool};
pub use connector::{Connector, HttpConnector, SocketConnector, StdioConnector};
pub use error::McpError;
pub use hub::ToolHub;
pub use server::McpServer;
pub use transport::{ChannelTransport, LineTransport, StdioTransport};
pub use types::*;
