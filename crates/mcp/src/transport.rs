//! Server-side line transports.
//!
//! [`McpServer`](crate::server::McpServer) reads one JSON-RPC message per line
//! and writes one reply per line. The client side of each wire shape lives in
//! [`connector`](crate::connector).

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::error::McpError;

/// A bidirectional channel of newline-framed messages.
#[async_trait]
pub trait LineTransport: Send {
    /// Next non-empty line, or `None` once the peer has closed.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;

    /// Write one message followed by a newline.
    async fn send(&mut self, message: &str) -> Result<(), McpError>;
}

/// Reads stdin, writes stdout. Anything else the process prints must go to
/// stderr or it corrupts the stream.
pub struct StdioTransport {
    reader: BufReader<tokio::io::Stdin>,
    writer: tokio::io::Stdout,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineTransport for StdioTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// In-memory transport backed by a pair of channels.
pub struct ChannelTransport {
    rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Two connected ends: what one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(32);
        let (tx_b, rx_a) = mpsc::channel(32);
        (Self { rx: rx_a, tx: tx_a }, Self { rx: rx_b, tx: tx_b })
    }
}

#[async_trait]
impl LineTransport for ChannelTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.tx
            .send(message.to_string())
            .await
            .map_err(|_| McpError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_pair_is_bidirectional() {
        let (mut a, mut b) = ChannelTransport::pair();

        a.send("from a").await.unwrap();
        assert_eq!(b.receive().await.unwrap().as_deref(), Some("from a"));

        b.send("from b").await.unwrap();
        assert_eq!(a.receive().await.unwrap().as_deref(), Some("from b"));
    }

    #[tokio::test]
    async fn test_closed_peer() {
        let (mut a, b) = ChannelTransport::pair();
        drop(b);
        assert_eq!(a.receive().await.unwrap(), None);
        assert!(matches!(a.send("lost").await, Err(McpError::Closed)));
    }
}
