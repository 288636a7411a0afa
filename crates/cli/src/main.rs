mod chat;
mod cli;
mod config;
mod probe;
mod terminal;
mod tools;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use toolgate_core::config::load_dotenv;
use toolgate_core::Config;

use crate::cli::{CliArgs, Command};
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    config.log_summary();

    match args.command {
        Command::Chat(chat) => chat::run(config, chat).await,
        Command::Tools(tools) => tools::run(config, tools).await,
        Command::Probe => run_probe(config).await,
    }
}

async fn run_probe(config: Config) -> Result<()> {
    let endpoint = config.engine.require_endpoint()?;
    let terminal = Terminal::new();

    let attempts = probe::probe(
        endpoint,
        config.engine.api_key.as_deref(),
        probe::API_VERSIONS,
        config.timeouts.connect,
    )
    .await?;

    for attempt in &attempts {
        terminal.print_info(&format!("{:<20} {}", attempt.version, attempt.status.describe()))?;
    }

    match attempts
        .iter()
        .find(|a| a.status == probe::ProbeStatus::Available)
    {
        Some(found) => {
            info!(url = %found.url, "Probe succeeded");
            println!("{}", found.url);
            Ok(())
        }
        None => anyhow::bail!("no API version answered at {}", endpoint),
    }
}
