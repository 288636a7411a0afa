//! [`ResponseEngine`] implementation for an HTTP responses endpoint.

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use toolgate_tool_runtime::{
    EngineError, ResponseEngine, ResponseRequest, ResponseStream, StreamEvent,
};

use super::jsonl::LineDecoder;
use super::translate::{parse_chunk, parse_response, request_body};
use crate::credential::CredentialProvider;

/// Response engine reached over HTTP.
///
/// Each request is one POST to `{endpoint}/responses`. The reply is either a
/// single JSON response or a JSON-lines stream closed by a `done` chunk.
pub struct HttpResponseEngine {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    agent_name: Option<String>,
    credential: Arc<dyn CredentialProvider>,
}

impl HttpResponseEngine {
    /// # Arguments
    /// * `endpoint` - Base URL, e.g. a project endpoint
    /// * `model` - Model deployment name
    /// * `credential` - Source of the bearer token
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        credential: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            agent_name: None,
            credential,
        }
    }

    /// Reference a server-side agent definition in every request.
    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    fn url(&self) -> String {
        format!("{}/responses", self.endpoint)
    }
}

#[async_trait]
impl ResponseEngine for HttpResponseEngine {
    async fn create_response(&self, request: ResponseRequest) -> Result<ResponseStream, EngineError> {
        let token = self.credential.bearer_token().await?;
        let url = self.url();
        let body = request_body(&self.model, self.agent_name.as_deref(), &request);

        debug!(
            model = %self.model,
            url = %url,
            continuation = request.is_continuation(),
            items = request.input.len(),
            "starting response request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(ACCEPT, "application/x-ndjson, application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body_text, &request));
        }

        let is_single_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if is_single_json {
            let text = response
                .text()
                .await
                .map_err(|e| EngineError::Network(e.to_string()))?;
            return Ok(ResponseStream::from_events(parse_response(&text)?));
        }

        Ok(ResponseStream::new(chunk_stream(response)))
    }

    fn engine_name(&self) -> &str {
        "http-responses"
    }
}

fn classify_failure(status: u16, body: String, request: &ResponseRequest) -> EngineError {
    match (status, &request.previous_response_id) {
        (401 | 403, _) => EngineError::Auth,
        (404, Some(previous)) => EngineError::StaleResponse(previous.clone()),
        (400, Some(previous)) if body.contains(previous.as_str()) => {
            EngineError::StaleResponse(previous.clone())
        }
        _ => EngineError::Api {
            status,
            message: body,
        },
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

struct State {
    bytes: ByteStream,
    decoder: LineDecoder,
    pending: VecDeque<Result<StreamEvent, EngineError>>,
    ended: bool,
}

/// Decode a JSON-lines body into events, in arrival order.
///
/// Ends without a `Done` if the connection closes early; the
/// [`ResponseStream`] wrapper reports that as an incomplete stream.
fn chunk_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<StreamEvent, EngineError>> + Send {
    let state = State {
        bytes: Box::pin(response.bytes_stream()),
        decoder: LineDecoder::new(),
        pending: VecDeque::new(),
        ended: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.ended {
                return None;
            }

            let lines = match state.bytes.next().await {
                Some(Ok(chunk)) => state.decoder.push(&chunk),
                Some(Err(e)) => {
                    state.ended = true;
                    return Some((Err(EngineError::Network(e.to_string())), state));
                }
                None => {
                    state.ended = true;
                    state.decoder.finish().into_iter().collect()
                }
            };

            for line in lines {
                match parse_chunk(&line) {
                    Ok(events) => state.pending.extend(events.into_iter().map(Ok)),
                    Err(e) => {
                        state.ended = true;
                        state.pending.push_back(Err(e));
                        break;
                    }
                }
            }
        }
    })
}
