use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use toolgate_core::TransportKind;

use super::rpc::into_result;
use super::Connector;
use crate::error::McpError;
use crate::types::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcId};

const SESSION_HEADER: &str = "mcp-session-id";

/// A tool server reached with one HTTP POST per JSON-RPC exchange.
///
/// Static headers (e.g. `Authorization`) go on every request. A session id
/// handed out by the server is echoed back on later requests.
pub struct HttpConnector {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
}

impl HttpConnector {
    pub fn new(
        url: &str,
        headers: &BTreeMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self, McpError> {
        let mut map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| McpError::Connect(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| McpError::Connect(format!("invalid value for header '{}'", key)))?;
            map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| McpError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            headers: map,
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.lock().await.clone() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                McpError::Connect(e.to_string())
            } else {
                McpError::ServerUnavailable(e.to_string())
            }
        })?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => McpError::Connect(format!("server rejected credentials (HTTP {})", status)),
            500..=599 => McpError::ServerUnavailable(format!("HTTP {}: {}", status, text)),
            _ => McpError::Protocol(format!("HTTP {}: {}", status, text)),
        })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_value(JsonRpcRequest::new(RpcId::Number(id), method, params))?;
        tracing::debug!(id, method = %method, url = %self.url, "Posting request");

        let exchange = async {
            let response = self.post(&body).await?;
            let is_event_stream = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("text/event-stream"));

            let reply = if is_event_stream {
                read_event_stream(response, id).await?
            } else {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| McpError::ServerUnavailable(e.to_string()))?;
                serde_json::from_slice::<JsonRpcResponse>(&bytes)?
            };

            if reply.id.as_number() != Some(id) {
                return Err(McpError::Protocol(format!(
                    "reply id {:?} does not match request {}",
                    reply.id, id
                )));
            }
            into_result(reply)
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| McpError::timeout(method, timeout))?
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let body = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        self.post(&body).await?;
        Ok(())
    }

    async fn close(&self) {
        self.session_id.lock().await.take();
        tracing::debug!(url = %self.url, "HTTP connector released");
    }
}

/// Read an SSE body until the event carrying reply `id` arrives.
async fn read_event_stream(response: reqwest::Response, id: i64) -> Result<JsonRpcResponse, McpError> {
    let mut bytes = response.bytes_stream();
    let mut buffer = String::new();
    let mut data = String::new();

    loop {
        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);

            if line.is_empty() {
                if let Some(reply) = take_event(&mut data, id)? {
                    return Ok(reply);
                }
            } else if let Some(payload) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(payload.trim_start());
            }
            // `event:`, `id:` and comment lines carry nothing we need.
        }

        match bytes.next().await {
            Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
            Some(Err(e)) => return Err(McpError::ServerUnavailable(e.to_string())),
            None => {
                if let Some(reply) = take_event(&mut data, id)? {
                    return Ok(reply);
                }
                return Err(McpError::Protocol(
                    "event stream ended without a reply".to_string(),
                ));
            }
        }
    }
}

/// Parse the buffered event data; return it if it is our reply.
fn take_event(data: &mut String, id: i64) -> Result<Option<JsonRpcResponse>, McpError> {
    if data.is_empty() {
        return Ok(None);
    }
    let raw: Value = serde_json::from_str(&std::mem::take(data))?;
    match IncomingMessage::classify(raw)? {
        IncomingMessage::Response(reply) if reply.id.as_number() == Some(id) => Ok(Some(reply)),
        other => {
            tracing::debug!(message = ?other, "Skipping unrelated event");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_event_matches_id() {
        let mut data = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#.to_string();
        let reply = take_event(&mut data, 2).unwrap().unwrap();
        assert!(reply.result.is_some());
        assert!(data.is_empty());

        let mut data = r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#.to_string();
        assert!(take_event(&mut data, 2).unwrap().is_none());
    }

    #[test]
    fn test_invalid_header_is_a_connect_error() {
        let mut headers = BTreeMap::new();
        headers.insert("Bad Header".to_string(), "x".to_string());
        let err = HttpConnector::new("http://localhost:1/mcp", &headers, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Connect(_)));
    }
}
