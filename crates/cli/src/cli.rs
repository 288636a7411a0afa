use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Tool-calling conversations with human approval in the loop.
///
/// Connects the tool servers declared in a TOML file, exposes their tools to
/// a response engine and asks before running anything that needs consent.
#[derive(Parser, Debug)]
#[command(name = "toolgate", about = "Mediate tool calls between a response engine and tool servers")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an interactive conversation
    Chat(ChatArgs),
    /// Connect every configured tool server and print the tool catalog
    Tools(ToolsArgs),
    /// Check which tool-listing API versions the engine endpoint answers
    Probe,
}

#[derive(Args, Debug)]
pub struct ServersArg {
    /// Tool server file (default: ./toolgate.toml, then ~/.config/toolgate/toolgate.toml)
    #[arg(long, env = "TOOLGATE_SERVERS")]
    pub servers: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    #[command(flatten)]
    pub servers: ServersArg,

    /// Instructions sent with every request
    #[arg(long)]
    pub instructions: Option<String>,

    /// Continue an existing conversation instead of starting a new one
    #[arg(long)]
    pub conversation: Option<String>,

    /// Approval mode override: manual, auto or deny
    #[arg(long)]
    pub approval: Option<String>,

    /// Send one message, print the answer and exit
    #[arg(short, long)]
    pub message: Option<String>,
}

#[derive(Args, Debug)]
pub struct ToolsArgs {
    #[command(flatten)]
    pub servers: ServersArg,

    /// Print the catalog as JSON
    #[arg(long)]
    pub json: bool,
}
