use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use toolgate_core::TransportKind;

use super::rpc::RpcChannel;
use super::Connector;
use crate::error::McpError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A tool server behind one long-lived WebSocket.
///
/// Every frame is a JSON-RPC message with an extra `direction` member:
/// `"client"` on frames we send, `"server"` on frames we accept. Concurrent
/// calls share the socket and are told apart by request id.
pub struct SocketConnector {
    url: String,
    channel: RpcChannel,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SocketConnector {
    pub async fn connect(url: &str, headers: &BTreeMap<String, String>) -> Result<Self, McpError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| McpError::Connect(format!("invalid socket url '{}': {}", url, e)))?;
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| McpError::Connect(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| McpError::Connect(format!("invalid value for header '{}'", key)))?;
            request.headers_mut().insert(name, value);
        }

        tracing::info!(url = %url, "Connecting to tool server socket");
        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| McpError::Connect(format!("socket connect to '{}' failed: {}", url, e)))?;
        let (sink, stream) = ws_stream.split();

        let (channel, queue) = RpcChannel::new();
        let (stop_tx, stop_rx) = oneshot::channel();
        let writer = tokio::spawn(write_frames(sink, queue, stop_rx));
        let reader = tokio::spawn(read_frames(url.to_string(), stream, channel.clone()));

        Ok(Self {
            url: url.to_string(),
            channel,
            stop: Mutex::new(Some(stop_tx)),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        })
    }
}

#[async_trait]
impl Connector for SocketConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
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
        let Some(stop) = self.stop.lock().await.take() else {
            return;
        };

        if let Err(e) = self.channel.notify("notifications/shutdown", None) {
            tracing::debug!(url = %self.url, error = %e, "Socket already closed");
        }
        let _ = stop.send(());

        if let Some(writer) = self.writer.lock().await.take() {
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                tracing::warn!(url = %self.url, "Close frame not sent in time");
            }
        }
        self.channel.shutdown().await;
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        tracing::info!(url = %self.url, "Socket connector closed");
    }
}

fn frame(mut message: Value) -> Message {
    if let Value::Object(map) = &mut message {
        map.insert("direction".to_string(), Value::String("client".to_string()));
    }
    Message::Text(message.to_string().into())
}

async fn write_frames(
    mut sink: SplitSink<WsStream, Message>,
    mut queue: mpsc::UnboundedReceiver<Value>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            message = queue.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = sink.send(frame(message)).await {
                    tracing::debug!(error = %e, "Socket write failed");
                    return;
                }
            }
            _ = &mut stop => {
                // Flush what is already queued (the shutdown notice) before closing.
                while let Ok(message) = queue.try_recv() {
                    if sink.send(frame(message)).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }
    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!(error = %e, "Close frame not delivered");
    }
}

async fn read_frames(url: String, mut stream: SplitStream<WsStream>, channel: RpcChannel) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(url = %url, "Ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!(url = %url, "Server closed the socket");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Socket read failed");
                break;
            }
        };

        let mut message: Value = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Ignoring non-JSON frame");
                continue;
            }
        };
        if !accept_direction(&mut message) {
            tracing::warn!(url = %url, "Ignoring frame not addressed to the client");
            continue;
        }
        channel.dispatch(message).await;
    }
    channel.shutdown().await;
}

/// Strip the `direction` member. Frames tagged with anything other than
/// `"server"` are rejected; untagged frames are accepted.
fn accept_direction(message: &mut Value) -> bool {
    let Some(map) = message.as_object_mut() else {
        return false;
    };
    match map.remove("direction") {
        None => true,
        Some(Value::String(direction)) => direction == "server",
        Some(_) => false,
    }
}
