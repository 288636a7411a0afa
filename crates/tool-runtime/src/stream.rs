//! Response streaming.
//!
//! A [`ResponseStream`] is the lazy, finite, non-restartable sequence of
//! chunks for one engine response. Chunks come out in the order they were
//! received. The sequence ends naturally after [`StreamEvent::Done`], ends
//! quietly when the caller cancels it, and ends with
//! [`EngineError::IncompleteStream`] when the connection closes before the
//! sentinel arrives.

use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalRequest;
use crate::provider::EngineError;
use crate::tool::ToolCallRequest;

/// Events emitted while a response streams in.
/// Engine-agnostic: wire formats are translated in the engine layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The engine assigned an id to the response
    ResponseCreated { response_id: String },
    /// A chunk of text from the assistant
    TextDelta { text: String },
    /// The engine wants a client-side tool run
    ToolCall { call: ToolCallRequest },
    /// The engine wants consent before running a tool it hosts
    ApprovalRequest { request: ApprovalRequest },
    /// Sentinel: the response is complete
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
    /// The engine reported an error inside the stream
    Error { message: String },
}

type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, EngineError>> + Send>>;

/// The chunk sequence of one response.
pub struct ResponseStream {
    inner: EventStream,
    cancel: CancellationToken,
}

struct State {
    source: EventStream,
    cancel: CancellationToken,
    finished: bool,
}

impl ResponseStream {
    /// Wrap a raw chunk source. Dropping the source closes the underlying
    /// connection.
    pub fn new<S>(source: S) -> Self
    where
        S: Stream<Item = Result<StreamEvent, EngineError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let state = State {
            source: Box::pin(source),
            cancel: cancel.clone(),
            finished: false,
        };

        let inner = stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            let next = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => {
                    tracing::debug!("Response stream cancelled by caller");
                    return None;
                }
                next = state.source.next() => next,
            };
            match next {
                Some(Ok(event @ StreamEvent::Done { .. })) => {
                    state.finished = true;
                    Some((Ok(event), state))
                }
                Some(Ok(event)) => Some((Ok(event), state)),
                Some(Err(e)) => {
                    state.finished = true;
                    Some((Err(e), state))
                }
                None => {
                    state.finished = true;
                    Some((Err(EngineError::IncompleteStream), state))
                }
            }
        });

        Self {
            inner: Box::pin(inner),
            cancel,
        }
    }

    /// A complete stream from already-known events. A trailing `Done` is added
    /// if missing.
    pub fn from_events(mut events: Vec<StreamEvent>) -> Self {
        if !matches!(events.last(), Some(StreamEvent::Done { .. })) {
            events.push(StreamEvent::Done { response_id: None });
        }
        Self::new(stream::iter(events.into_iter().map(Ok)))
    }

    /// Handle that ends the sequence early without an error.
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream into a [`CollectedResponse`].
    pub async fn collect_response(mut self) -> Result<CollectedResponse, EngineError> {
        let mut collected = CollectedResponse::default();
        while let Some(event) = self.next().await {
            collected.push(&event?);
        }
        Ok(collected)
    }
}

impl Stream for ResponseStream {
    type Item = Result<StreamEvent, EngineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Everything one response produced, folded from its events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedResponse {
    pub response_id: Option<String>,
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub approvals: Vec<ApprovalRequest>,
    pub errors: Vec<String>,
    /// Whether the `Done` sentinel was seen
    pub complete: bool,
}

impl CollectedResponse {
    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ResponseCreated { response_id } => {
                self.response_id = Some(response_id.clone());
            }
            StreamEvent::TextDelta { text } => self.text.push_str(text),
            StreamEvent::ToolCall { call } => self.tool_calls.push(call.clone()),
            StreamEvent::ApprovalRequest { request } => self.approvals.push(request.clone()),
            StreamEvent::Done { response_id } => {
                if let Some(id) = response_id {
                    self.response_id = Some(id.clone());
                }
                self.complete = true;
            }
            StreamEvent::Error { message } => {
                tracing::warn!(message = %message, "Engine reported a stream error");
                self.errors.push(message.clone());
            }
        }
    }
}
