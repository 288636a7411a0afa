//! A minimal stdio tool server exposing the built-in `echo` tool.
//!
//! stdout carries JSON-RPC only, so logs go to stderr.

use toolgate_mcp::{McpServer, StdioTransport};
use toolgate_tool_runtime::EchoTool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut server = McpServer::new("toolgate-echo").with_tool(EchoTool);
    let mut transport = StdioTransport::new();

    tracing::info!("toolgate-echo-server starting");
    server.run(&mut transport).await?;
    tracing::info!("toolgate-echo-server stopped");
    Ok(())
}
