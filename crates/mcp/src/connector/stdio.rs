use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use toolgate_core::TransportKind;

use super::rpc::RpcChannel;
use super::Connector;
use crate::error::McpError;

const EXIT_GRACE: Duration = Duration::from_secs(5);
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A tool server running as a child process.
///
/// The process is killed when the connector is closed or dropped.
pub struct StdioConnector {
    label: String,
    channel: RpcChannel,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl StdioConnector {
    /// Spawn `command` with piped stdio. Must be called inside a runtime.
    pub fn spawn(
        label: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, McpError> {
        tracing::info!(server = %label, command = %command, "Spawning tool server process");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Connect(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connect("failed to capture server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connect("failed to capture server stdout".to_string()))?;

        let (channel, queue) = RpcChannel::new();
        let writer = tokio::spawn(write_lines(stdin, queue));
        let reader = tokio::spawn(read_lines(label.to_string(), stdout, channel.clone()));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(label.to_string(), stderr));
        }

        Ok(Self {
            label: label.to_string(),
            channel,
            child: Mutex::new(Some(child)),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        })
    }
}

#[async_trait]
impl Connector for StdioConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Process
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        self.channel.request(method, params, timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.channel.notify(method, params)
    }

    async fn close(&self) {
        self.channel.shutdown().await;

        if let Some(writer) = self.writer.lock().await.take() {
            writer.abort();
        }

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(server = %self.label, error = %e, "Process already gone");
            }
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::info!(server = %self.label, %status, "Tool server process exited"),
                Ok(Err(e)) => tracing::warn!(server = %self.label, error = %e, "Failed to reap tool server process"),
                Err(_) => tracing::warn!(server = %self.label, "Tool server process did not exit in time"),
            }
        }

        // Whatever the process wrote before dying is read to EOF.
        if let Some(reader) = self.reader.lock().await.take() {
            if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
                tracing::debug!(server = %self.label, "Output not drained in time");
            }
        }
    }
}

async fn write_lines(mut stdin: ChildStdin, mut queue: mpsc::UnboundedReceiver<Value>) {
    while let Some(message) = queue.recv().await {
        let mut line = message.to_string();
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::debug!(error = %e, "Server stdin closed");
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

async fn read_lines(label: String, stdout: ChildStdout, channel: RpcChannel) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = match std::str::from_utf8(&buf) {
                    Ok(line) => line.trim(),
                    Err(e) => {
                        tracing::warn!(server = %label, error = %e, "Ignoring non-UTF-8 output line");
                        continue;
                    }
                };
                if line.is_empty() {
                    continue;
                }
                tracing::trace!(server = %label, line = %line, "Received line");
                match serde_json::from_str::<Value>(line) {
                    Ok(message) => channel.dispatch(message).await,
                    Err(e) => tracing::warn!(server = %label, error = %e, "Ignoring non-JSON output line"),
                }
            }
            Err(e) => {
                tracing::warn!(server = %label, error = %e, "Failed to read server output");
                break;
            }
        }
    }
    if !channel.is_closed() {
        tracing::info!(server = %label, "Tool server closed its output");
    }
    channel.shutdown().await;
}

async fn forward_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %label, "stderr: {}", line);
    }
}
