use anyhow::Result;
use async_trait::async_trait;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use toolgate_core::ToolServerDescriptor;
use toolgate_mcp::McpError;
use toolgate_tool_runtime::{ApprovalHandler, ApprovalRequest, StreamEvent, ToolCapability, ToolResult};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

const MAX_RESULT_CHARS: usize = 500;

/// Terminal output for the interactive front end.
#[derive(Debug, Clone, Copy, Default)]
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    /// Print the startup banner.
    pub fn print_banner(&self, model: &str, servers: usize, tools: usize) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("toolgate"),
            ResetColor,
            Print(" - tool calls with approval\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!(
                "Model: {} | Servers: {} | Tools: {}\n",
                model, servers, tools
            )),
            Print("Type 'exit' or 'quit' to end. Ctrl+C abandons the current turn.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Read a line of user input with prompt.
    /// Returns None if the user wants to exit or stdin is closed.
    pub fn read_input(&self) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::USER_PROMPT),
            Print("you> "),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        let trimmed = input.trim().to_string();

        if trimmed == "exit" || trimmed == "quit" || trimmed == "/exit" || trimmed == "/quit" {
            return Ok(None);
        }

        Ok(Some(trimmed))
    }

    /// Display a stream event with appropriate formatting.
    pub fn display_event(&self, event: &StreamEvent) -> Result<()> {
        let mut stdout = io::stdout();
        match event {
            StreamEvent::ResponseCreated { response_id } => {
                debug!(response_id = %response_id, "Response started");
            }
            StreamEvent::TextDelta { text } => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::ASSISTANT_TEXT),
                    Print(text),
                    ResetColor,
                )?;
            }
            StreamEvent::ToolCall { call } => {
                execute!(
                    stdout,
                    Print("\n"),
                    SetForegroundColor(Colors::TOOL_CALL),
                    Print(format!("[tool: {}/{}] ", call.server_label, call.tool_name)),
                    ResetColor,
                )?;
            }
            StreamEvent::ApprovalRequest { request } => {
                execute!(
                    stdout,
                    Print("\n"),
                    SetForegroundColor(Colors::TOOL_CALL),
                    Print(format!(
                        "[approval requested: {} on '{}']\n",
                        request.tool_name.as_deref().unwrap_or("tool"),
                        request.server_label
                    )),
                    ResetColor,
                )?;
            }
            StreamEvent::Done { .. } => {
                execute!(stdout, Print("\n"))?;
            }
            StreamEvent::Error { message } => {
                execute!(
                    stdout,
                    Print("\n"),
                    SetForegroundColor(Colors::ERROR),
                    Print(format!("[error: {}]\n", message)),
                    ResetColor,
                )?;
            }
        }
        stdout.flush()?;
        Ok(())
    }

    /// Display a tool execution result.
    pub fn display_tool_result(&self, result: &ToolResult) -> Result<()> {
        let mut stdout = io::stdout();
        let (color, label) = if result.is_error {
            (Colors::ERROR, "error")
        } else {
            (Colors::TOOL_RESULT, "result")
        };

        execute!(
            stdout,
            SetForegroundColor(color),
            Print(format!(
                "  [{} {}]: {}\n",
                result.tool_call_id,
                label,
                truncate(&result.content, MAX_RESULT_CHARS)
            )),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print the tool catalog grouped by server, then the excluded servers.
    pub fn print_catalog(
        &self,
        capabilities: &[ToolCapability],
        excluded: &[(String, McpError)],
    ) -> Result<()> {
        let mut stdout = io::stdout();
        if capabilities.is_empty() {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print("No tools available.\n"),
                ResetColor,
            )?;
        }

        let mut current: Option<&str> = None;
        for cap in capabilities {
            if current != Some(cap.server_label.as_str()) {
                current = Some(cap.server_label.as_str());
                execute!(
                    stdout,
                    SetForegroundColor(Colors::HEADER),
                    Print(format!("{}\n", cap.server_label)),
                    ResetColor,
                )?;
            }
            execute!(
                stdout,
                Print(format!("  {:<32} ", cap.tool_name)),
                SetForegroundColor(Colors::DIM),
                Print(format!("{}\n", truncate(&cap.description, 80))),
                ResetColor,
            )?;
        }

        for (server, error) in excluded {
            execute!(
                stdout,
                SetForegroundColor(Colors::ERROR),
                Print(format!("{} (excluded): {}\n", server, error)),
                ResetColor,
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    /// Print an error message.
    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::ERROR),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print an info message.
    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Ask a yes/no question about one approval request. Anything but an
    /// explicit yes is a denial.
    fn prompt_approval(&self, request: &ApprovalRequest, gated: bool) -> Result<bool> {
        let mut stdout = io::stdout();
        let arguments = request
            .arguments
            .as_ref()
            .map(|a| truncate(&a.to_string(), MAX_RESULT_CHARS))
            .unwrap_or_else(|| "(not shown)".to_string());
        let note = if gated { " (server requires approval)" } else { "" };

        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::TOOL_CALL),
            Print(format!(
                "Tool '{}' on '{}' wants to run{}.\n  Arguments: {}\n",
                request.tool_name.as_deref().unwrap_or("(unnamed)"),
                request.server_label,
                note,
                arguments
            )),
            ResetColor,
            SetForegroundColor(Colors::USER_PROMPT),
            Print("Allow? [y/N] "),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(is_yes(&input))
    }
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}... ({} chars total)", &text[..cut], text.chars().count()),
        None => text.to_string(),
    }
}

/// Decides approval requests by asking on the terminal, one at a time.
pub struct TerminalApprover {
    terminal: Terminal,
    gated_servers: Vec<String>,
    prompt: Mutex<()>,
}

impl TerminalApprover {
    pub fn new(terminal: Terminal, descriptors: &[ToolServerDescriptor]) -> Self {
        Self {
            terminal,
            gated_servers: descriptors
                .iter()
                .filter(|d| d.requires_approval)
                .map(|d| d.name.clone())
                .collect(),
            prompt: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ApprovalHandler for TerminalApprover {
    async fn decide(&self, request: &ApprovalRequest) -> bool {
        // Requests are asked concurrently; the terminal takes one at a time.
        let _turn = self.prompt.lock().await;

        let terminal = self.terminal;
        let gated = self.gated_servers.contains(&request.server_label);
        let request = request.clone();
        let answer =
            tokio::task::spawn_blocking(move || terminal.prompt_approval(&request, gated)).await;

        match answer {
            Ok(Ok(approve)) => approve,
            Ok(Err(e)) => {
                warn!(error = %e, "Approval prompt failed, denying");
                false
            }
            Err(e) => {
                warn!(error = %e, "Approval prompt task failed, denying");
                false
            }
        }
    }
}
