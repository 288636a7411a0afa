//! Error types for the MCP crate.

use std::time::Duration;

use crate::types::{error_codes, JsonRpcError};

/// Errors that can occur during MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to parse JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The tool server could not be reached, refused us, or failed the handshake.
    #[error("Connect error: {0}")]
    Connect(String),

    /// The server sent something that does not follow the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A transport call did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The requested method is not supported.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters for a method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The requested tool was not found.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed.
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Protocol version mismatch.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Server/client not initialized.
    #[error("Not initialized: call initialize first")]
    NotInitialized,

    /// The MCP server exited or is unavailable.
    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),

    /// The connection was closed while a call was in flight.
    #[error("Connection closed")]
    Closed,
}

impl McpError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let code = match self {
            McpError::JsonParse(_) => error_codes::PARSE_ERROR,
            McpError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::ToolNotFound(_) => error_codes::INVALID_PARAMS,
            McpError::NotInitialized => error_codes::INVALID_REQUEST,
            _ => error_codes::INTERNAL_ERROR,
        };
        JsonRpcError {
            code,
            message: self.to_string(),
            data: None,
        }
    }

    /// Map an error object received from a server.
    pub fn from_rpc_error(error: JsonRpcError) -> Self {
        match error.code {
            error_codes::METHOD_NOT_FOUND => McpError::MethodNotFound(error.message),
            error_codes::INVALID_PARAMS => McpError::InvalidParams(error.message),
            code => McpError::Protocol(format!("server error {}: {}", code, error.message)),
        }
    }
}
