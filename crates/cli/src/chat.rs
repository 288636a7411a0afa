use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use toolgate_core::{ApprovalMode, Config, ToolServerDescriptor};
use toolgate_llm::create_engine;
use toolgate_mcp::{McpError, ToolHub};
use toolgate_tool_runtime::{
    AllowListPolicy, ApprovalPolicy, AutoApprovePolicy, ConversationSession, DenyAllPolicy,
    ManualPolicy, SessionError, SessionOptions, StreamEvent, TurnOutcome, TurnOutput,
};

use crate::cli::ChatArgs;
use crate::config::load_servers;
use crate::terminal::{Terminal, TerminalApprover};

/// Pick the approval policy for a mode. In manual mode, tools listed under a
/// server's `allow` key are approved without asking.
pub fn build_policy(mode: ApprovalMode, descriptors: &[ToolServerDescriptor]) -> Arc<dyn ApprovalPolicy> {
    match mode {
        ApprovalMode::Auto => Arc::new(AutoApprovePolicy),
        ApprovalMode::Deny => Arc::new(DenyAllPolicy),
        ApprovalMode::Manual => {
            let mut policy = AllowListPolicy::new();
            let mut any = false;
            for descriptor in descriptors {
                for tool in &descriptor.allow {
                    policy = policy.allow(&descriptor.name, tool);
                    any = true;
                }
            }
            if any {
                Arc::new(policy)
            } else {
                Arc::new(ManualPolicy)
            }
        }
    }
}

pub async fn run(config: Config, args: ChatArgs) -> Result<()> {
    let terminal = Terminal::new();
    let descriptors = load_servers(args.servers.servers.as_deref())?;
    let engine = create_engine(&config.engine).context("failed to create response engine")?;

    let mode = match &args.approval {
        Some(raw) => raw.parse::<ApprovalMode>()?,
        None => config.approval_mode,
    };
    info!(mode = %mode, servers = descriptors.len(), "Starting chat");

    let hub = ToolHub::connect_all(&descriptors, &config.timeouts).await;
    report_excluded(&terminal, hub.excluded());

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(terminal, rx));

    let options = SessionOptions {
        instructions: args.instructions.clone(),
        max_round_trips: config.max_round_trips,
        approval_timeout: config.timeouts.approval,
    };
    let mut session = ConversationSession::new(
        Arc::new(engine),
        hub.registry(),
        build_policy(mode, &descriptors),
    )
    .with_options(options)
    .with_event_sink(tx);
    if let Some(conversation) = &args.conversation {
        session = session.with_conversation_id(conversation.clone());
    }
    let approver = TerminalApprover::new(terminal, &descriptors);

    let result = match args.message {
        Some(message) => match run_turn(&mut session, &approver, message).await {
            Ok(output) => show_output(&terminal, &output),
            Err(e) => Err(anyhow::Error::new(e).context("turn failed")),
        },
        None => {
            match terminal.print_banner(&config.engine.model, hub.clients().len(), hub.registry().len()) {
                Ok(()) => repl(&terminal, &mut session, &approver).await,
                Err(e) => Err(e),
            }
        }
    };

    hub.close_all().await;
    drop(session);
    printer.await.ok();
    result
}

async fn repl(
    terminal: &Terminal,
    session: &mut ConversationSession,
    approver: &TerminalApprover,
) -> Result<()> {
    terminal.print_info(&format!("Conversation: {}", session.conversation_id()))?;

    loop {
        let reader = *terminal;
        let input = match tokio::task::spawn_blocking(move || reader.read_input()).await?? {
            Some(text) => text,
            None => {
                terminal.print_info("Goodbye.")?;
                return Ok(());
            }
        };
        if input.is_empty() {
            continue;
        }

        let finished = tokio::select! {
            result = run_turn(session, approver, input) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };

        match finished {
            Some(Ok(output)) => show_output(terminal, &output)?,
            Some(Err(e)) => {
                error!(error = %e, "Turn failed");
                terminal.print_error(&e.to_string())?;
            }
            None => {
                warn!("Turn interrupted");
                session.abandon_turn();
                terminal.print_info("[turn abandoned]")?;
            }
        }
    }
}

/// Drive one turn to completion, asking on the terminal whenever it suspends.
async fn run_turn(
    session: &mut ConversationSession,
    approver: &TerminalApprover,
    input: String,
) -> Result<TurnOutput, SessionError> {
    let mut outcome = session.send(input).await?;
    loop {
        match outcome {
            TurnOutcome::Complete(output) => return Ok(output),
            TurnOutcome::NeedsApproval(pending) => {
                info!(count = pending.len(), "Turn waiting for approval");
                outcome = session.decide_pending(approver).await?;
            }
        }
    }
}

/// Tell the user which servers were left out. Display failures are logged
/// so startup always reaches the shutdown of connected servers.
fn report_excluded(terminal: &Terminal, excluded: &[(String, McpError)]) -> usize {
    let mut shown = 0;
    for (server, err) in excluded {
        match terminal.print_error(&format!("tool server '{}' excluded: {}", server, err)) {
            Ok(()) => shown += 1,
            Err(e) => warn!(server = %server, error = %e, "Failed to display excluded server"),
        }
    }
    shown
}

fn show_output(terminal: &Terminal, output: &TurnOutput) -> Result<()> {
    for result in &output.tool_results {
        terminal.display_tool_result(result)?;
    }
    tracing::debug!(
        round_trips = output.round_trips,
        response_id = ?output.response_id,
        "Turn complete"
    );
    Ok(())
}

async fn print_events(terminal: Terminal, mut rx: mpsc::UnboundedReceiver<StreamEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = terminal.display_event(&event) {
            warn!(error = %e, "Failed to display event");
        }
    }
}
