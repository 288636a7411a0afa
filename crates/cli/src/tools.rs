use anyhow::{Context, Result};

use toolgate_core::Config;
use toolgate_mcp::ToolHub;

use crate::cli::ToolsArgs;
use crate::config::load_servers;
use crate::terminal::Terminal;

/// Connect every configured server, print the catalog and disconnect.
pub async fn run(config: Config, args: ToolsArgs) -> Result<()> {
    let descriptors = load_servers(args.servers.servers.as_deref())?;
    let hub = ToolHub::connect_all(&descriptors, &config.timeouts).await;
    let capabilities = hub.capabilities();

    let printed = if args.json {
        serde_json::to_string_pretty(&capabilities)
            .context("failed to serialize catalog")
            .map(|json| println!("{}", json))
    } else {
        Terminal::new().print_catalog(&capabilities, hub.excluded())
    };

    hub.close_all().await;
    printed
}
