//! Request/response correlation for connectors that keep one long-lived
//! channel open (process pipes and sockets).
//!
//! Outgoing messages go through an unbounded queue drained by the
//! connector's writer task, so concurrent callers never interleave partial
//! frames. Replies are routed back to their caller by id.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::McpError;
use crate::types::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcId};
use crate::types::error_codes;

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

#[derive(Clone)]
pub(crate) struct RpcChannel {
    outbound: mpsc::UnboundedSender<Value>,
    pending: Pending,
    next_id: Arc<AtomicI64>,
    closed: Arc<AtomicBool>,
}

impl RpcChannel {
    /// A channel plus the queue its writer task must drain.
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (outbound, queue) = mpsc::unbounded_channel();
        let channel = Self {
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        (channel, queue)
    }

    /// Send a request and wait up to `timeout` for its reply.
    pub(crate) async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = serde_json::to_value(JsonRpcRequest::new(RpcId::Number(id), method, params))?;

        // Register before sending so a fast reply cannot be missed.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
            // A shutdown may have cleared the map since the check above.
            if self.closed.load(Ordering::SeqCst) {
                pending.remove(&id);
                return Err(McpError::Closed);
            }
        }

        tracing::debug!(id, method = %method, "Sending request");
        if self.outbound.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::Closed);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(McpError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::timeout(method, timeout));
            }
        };

        into_result(response)
    }

    pub(crate) fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed);
        }
        let message = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        self.outbound.send(message).map_err(|_| McpError::Closed)
    }

    /// Route one incoming message. Replies wake their caller; requests from
    /// the server are answered with method-not-found.
    pub(crate) async fn dispatch(&self, raw: Value) {
        match IncomingMessage::classify(raw) {
            Ok(IncomingMessage::Response(response)) => {
                let Some(id) = response.id.as_number() else {
                    tracing::warn!(id = ?response.id, "Reply with an id we never issue");
                    return;
                };
                match self.pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(id, "Reply for an unknown or expired request"),
                }
            }
            Ok(IncomingMessage::Request(request)) => {
                tracing::debug!(method = %request.method, "Server-initiated request, declining");
                let reply = JsonRpcResponse::error(
                    request.id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                );
                if let Ok(reply) = serde_json::to_value(reply) {
                    let _ = self.outbound.send(reply);
                }
            }
            Ok(IncomingMessage::Notification(notification)) => {
                tracing::debug!(method = %notification.method, "Server notification");
            }
            Err(e) => tracing::warn!(error = %e, "Dropping malformed message"),
        }
    }

    /// Fail every in-flight request and refuse new ones.
    pub(crate) async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = {
            let mut pending = self.pending.lock().await;
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            tracing::debug!(count = dropped, "Failed in-flight requests on close");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Unwrap a reply into its `result`, mapping an `error` member.
pub(crate) fn into_result(response: JsonRpcResponse) -> Result<Value, McpError> {
    match (response.error, response.result) {
        (Some(error), _) => Err(McpError::from_rpc_error(error)),
        (None, Some(result)) => Ok(result),
        (None, None) => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Answers every request on `queue` by echoing its method back.
    fn spawn_echo_peer(channel: RpcChannel, mut queue: mpsc::UnboundedReceiver<Value>) {
        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                if let (Some(id), Some(method)) = (message.get("id"), message.get("method")) {
                    let reply = json!({"jsonrpc": "2.0", "id": id, "result": {"method": method}});
                    channel.dispatch(reply).await;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_routed_by_id() {
        let (channel, queue) = RpcChannel::new();
        spawn_echo_peer(channel.clone(), queue);

        let (a, b) = tokio::join!(
            channel.request("tools/list", None, Duration::from_secs(1)),
            channel.request("ping", None, Duration::from_secs(1)),
        );
        assert_eq!(a.unwrap()["method"], "tools/list");
        assert_eq!(b.unwrap()["method"], "ping");
    }

    #[tokio::test]
    async fn test_error_reply_is_mapped() {
        let (channel, mut queue) = RpcChannel::new();
        let peer = channel.clone();
        tokio::spawn(async move {
            let message = queue.recv().await.unwrap();
            peer.dispatch(json!({
                "jsonrpc": "2.0",
                "id": message["id"],
                "error": {"code": -32601, "message": "nope"}
            }))
            .await;
        });

        let err = channel
            .request("tools/list", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::MethodNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_forgets_the_request() {
        let (channel, _queue) = RpcChannel::new();
        let err = channel
            .request("tools/list", None, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
        assert!(channel.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_fails_in_flight_requests() {
        let (channel, _queue) = RpcChannel::new();
        let waiter = channel.clone();
        let call = tokio::spawn(async move {
            waiter.request("tools/call", None, Duration::from_secs(30)).await
        });
        tokio::task::yield_now().await;
        while channel.pending.lock().await.is_empty() {
            tokio::task::yield_now().await;
        }

        channel.shutdown().await;
        assert!(matches!(call.await.unwrap(), Err(McpError::Closed)));
        assert!(matches!(channel.notify("ping", None), Err(McpError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_between_check_and_register_fails_fast() {
        let (channel, _queue) = RpcChannel::new();
        let guard = channel.pending.lock().await;

        let waiter = channel.clone();
        let call = tokio::spawn(async move {
            waiter.request("tools/call", None, Duration::from_secs(30)).await
        });
        // Past the closed check, blocked on the pending map.
        while channel.next_id.load(Ordering::SeqCst) == 1 {
            tokio::task::yield_now().await;
        }

        channel.closed.store(true, Ordering::SeqCst);
        drop(guard);

        assert!(matches!(call.await.unwrap(), Err(McpError::Closed)));
        assert!(channel.pending.lock().await.is_empty());
    }
}
