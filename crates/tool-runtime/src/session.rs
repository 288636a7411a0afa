use crate::approval::{
    collect_decisions, ApprovalHandler, ApprovalPolicy, ApprovalRequest, ApprovalResponse,
    DecisionSource, PolicyDecision,
};
use crate::conversation::{ConversationError, ConversationState, SessionPhase};
use crate::provider::{EngineError, InputItem, ResponseEngine, ResponseRequest};
use crate::registry::ToolRegistry;
use crate::stream::{CollectedResponse, StreamEvent};
use crate::tool::{ToolCallRequest, ToolContext, ToolResult};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Sent with every request
    pub instructions: Option<String>,
    /// Upper bound on requests per turn, continuations included
    pub max_round_trips: usize,
    /// How long an [`ApprovalHandler`] gets per request
    pub approval_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            instructions: None,
            max_round_trips: 8,
            approval_timeout: Duration::from_secs(120),
        }
    }
}

/// How a call to [`ConversationSession::send`] or a continuation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The turn is finished.
    Complete(TurnOutput),
    /// The turn is suspended until every listed request has a decision.
    NeedsApproval(Vec<ApprovalRequest>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutput {
    pub response_id: Option<String>,
    /// Text of the final response
    pub text: String,
    /// Every client-side tool result produced during the turn
    pub tool_results: Vec<ToolResult>,
    pub round_trips: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error("Response engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Turn exceeded {0} round trips")]
    RoundTripLimit(usize),
}

#[derive(Debug, Default)]
struct TurnProgress {
    round_trips: usize,
    tool_results: Vec<ToolResult>,
}

enum Step {
    Continue(ResponseRequest),
    Suspend(Vec<ApprovalRequest>),
    Done(TurnOutput),
}

/// Drives conversation turns against a response engine, pausing gated tool
/// calls at the approval gate.
///
/// Flow: user text → engine → (approvals → caller → continuation)* → final text
pub struct ConversationSession {
    engine: Arc<dyn ResponseEngine>,
    registry: Arc<ToolRegistry>,
    policy: Arc<dyn ApprovalPolicy>,
    options: SessionOptions,
    state: ConversationState,
    phase: SessionPhase,
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
    turn: TurnProgress,
}

impl ConversationSession {
    pub fn new(
        engine: Arc<dyn ResponseEngine>,
        registry: Arc<ToolRegistry>,
        policy: Arc<dyn ApprovalPolicy>,
    ) -> Self {
        Self {
            engine,
            registry,
            policy,
            options: SessionOptions::default(),
            state: ConversationState::generate(),
            phase: SessionPhase::Idle,
            events: None,
            turn: TurnProgress::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Resume an existing conversation instead of starting a new one.
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.state = ConversationState::new(conversation_id);
        self
    }

    /// Forward every stream event, in arrival order, to `sink`.
    pub fn with_event_sink(mut self, sink: mpsc::UnboundedSender<StreamEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn conversation_id(&self) -> &str {
        self.state.conversation_id()
    }

    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.state.pending_approvals()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Start a new turn with user text.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<TurnOutcome, SessionError> {
        match self.phase {
            SessionPhase::HasPendingApprovals => {
                return Err(ConversationError::PendingApprovals(
                    self.state.gate().pending_count(),
                )
                .into());
            }
            SessionPhase::AwaitingResponse => {
                warn!("Previous turn was interrupted, discarding its state");
                self.state.reset_turn();
            }
            SessionPhase::Idle | SessionPhase::Complete => {}
        }

        self.turn = TurnProgress::default();
        // A new turn never continues the previous turn's response.
        self.state.set_previous_response_id(None);
        let request = self.request(vec![InputItem::user(text)], None);
        self.advance(request).await
    }

    /// Submit decisions for the pending batch and continue the turn.
    ///
    /// Unknown, duplicate, or already-resolved ids reject the whole submission
    /// and leave the pending set untouched. Pending ids the submission leaves
    /// out are denied.
    pub async fn submit_approvals(
        &mut self,
        responses: Vec<ApprovalResponse>,
    ) -> Result<TurnOutcome, SessionError> {
        if self.phase != SessionPhase::HasPendingApprovals {
            return Err(ConversationError::NoPendingApprovals.into());
        }
        self.state.gate_mut().apply(&responses)?;

        let omitted = self.state.gate_mut().deny_pending();
        if !omitted.is_empty() {
            warn!(ids = ?omitted, "No decision submitted, treating as denied");
        }

        let next = self.continuation().await?;
        self.advance(next).await
    }

    /// Ask `handler` about every pending request, then continue the turn.
    /// Each request gets the configured approval timeout on its own.
    pub async fn decide_pending(
        &mut self,
        handler: &dyn ApprovalHandler,
    ) -> Result<TurnOutcome, SessionError> {
        if self.phase != SessionPhase::HasPendingApprovals {
            return Err(ConversationError::NoPendingApprovals.into());
        }
        let pending = self.state.pending_approvals();
        let responses = collect_decisions(handler, &pending, self.options.approval_timeout).await;
        self.submit_approvals(responses).await
    }

    /// Give up on a suspended turn. Pending requests are dropped unresolved.
    pub fn abandon_turn(&mut self) {
        self.state.reset_turn();
        self.turn = TurnProgress::default();
        self.phase = SessionPhase::Idle;
    }

    async fn advance(&mut self, mut request: ResponseRequest) -> Result<TurnOutcome, SessionError> {
        loop {
            if self.turn.round_trips >= self.options.max_round_trips {
                self.abandon_turn();
                return Err(SessionError::RoundTripLimit(self.options.max_round_trips));
            }

            let collected = self.exchange(request).await?;
            match self.absorb(collected).await? {
                Step::Continue(next) => request = next,
                Step::Suspend(pending) => return Ok(TurnOutcome::NeedsApproval(pending)),
                Step::Done(output) => return Ok(TurnOutcome::Complete(output)),
            }
        }
    }

    /// One request/response round trip.
    async fn exchange(&mut self, request: ResponseRequest) -> Result<CollectedResponse, SessionError> {
        self.phase = SessionPhase::AwaitingResponse;
        self.turn.round_trips += 1;
        info!(
            conversation = %self.state.conversation_id(),
            round_trip = self.turn.round_trips,
            continuation = request.is_continuation(),
            "Sending request to {}",
            self.engine.engine_name()
        );

        let response = self.engine.create_response(request).await;
        let mut stream = match response {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(e)),
        };

        let mut collected = CollectedResponse::default();
        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Error { message }) => {
                    self.emit(&StreamEvent::Error {
                        message: message.clone(),
                    });
                    return Err(self.fail(EngineError::Reported(message)));
                }
                Ok(event) => {
                    self.emit(&event);
                    collected.push(&event);
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
        if !collected.complete {
            return Err(self.fail(EngineError::IncompleteStream));
        }

        debug!(
            response_id = ?collected.response_id,
            tool_calls = collected.tool_calls.len(),
            approvals = collected.approvals.len(),
            "Response received"
        );
        Ok(collected)
    }

    /// Fold a response into the conversation state and decide what happens next.
    async fn absorb(&mut self, collected: CollectedResponse) -> Result<Step, SessionError> {
        self.state.set_previous_response_id(collected.response_id.clone());

        for request in collected.approvals {
            self.open(request)?;
        }
        for call in collected.tool_calls {
            if self.registry.requires_approval(&call.server_label) {
                let request = ApprovalRequest::for_call(&call);
                let id = request.id.clone();
                self.open(request)?;
                self.state.hold(id, call);
            } else {
                self.state.defer(call);
            }
        }

        if self.state.has_pending_approvals() {
            self.apply_policy().await?;
            let pending = self.state.pending_approvals();
            if !pending.is_empty() {
                self.phase = SessionPhase::HasPendingApprovals;
                info!(count = pending.len(), "Turn suspended for approval");
                return Ok(Step::Suspend(pending));
            }
        }

        if self.state.has_pending_approvals() || self.state.has_deferred() {
            return self.continuation().await.map(Step::Continue);
        }

        self.phase = SessionPhase::Complete;
        let output = TurnOutput {
            response_id: collected.response_id,
            text: collected.text,
            tool_results: std::mem::take(&mut self.turn.tool_results),
            round_trips: self.turn.round_trips,
        };
        info!(round_trips = output.round_trips, "Turn complete");
        Ok(Step::Done(output))
    }

    fn open(&mut self, request: ApprovalRequest) -> Result<(), SessionError> {
        match self.state.gate_mut().open(request) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn apply_policy(&mut self) -> Result<(), SessionError> {
        for request in self.state.pending_approvals() {
            let approve = match self.policy.evaluate(&request).await {
                PolicyDecision::Approved => true,
                PolicyDecision::Denied(reason) => {
                    info!(id = %request.id, reason = %reason, "Denied by policy");
                    false
                }
                PolicyDecision::NeedsConfirmation => continue,
            };
            self.state
                .gate_mut()
                .decide(&request.id, approve, DecisionSource::Policy)?;
        }
        Ok(())
    }

    /// Resolve every decided request, run the calls that may run, and build
    /// the request that continues the previous response.
    async fn continuation(&mut self) -> Result<ResponseRequest, SessionError> {
        let Some(previous) = self.state.previous_response_id().map(str::to_string) else {
            return Err(self.fail(EngineError::InvalidResponse(
                "response carried no id to continue from".to_string(),
            )));
        };

        let mut input = Vec::new();
        let mut runnable: Vec<ToolCallRequest> = Vec::new();
        let batch = self.state.gate_mut().resolve();
        for resolved in batch {
            let id = resolved.request.id;
            match (resolved.request.tool_call_id, self.state.release(&id)) {
                (Some(_), Some(call)) if resolved.approved => runnable.push(call),
                (Some(call_id), _) => input.push(InputItem::FunctionCallOutput {
                    call_id,
                    output: "Tool call was not approved".to_string(),
                    is_error: true,
                }),
                (None, _) => input.push(InputItem::McpApprovalResponse {
                    approval_request_id: id,
                    approve: resolved.approved,
                }),
            }
        }
        runnable.extend(self.state.take_deferred());

        if !runnable.is_empty() {
            info!(count = runnable.len(), "Executing tool calls");
        }
        let results = dispatch(&self.registry, runnable).await;
        for result in results {
            input.push(InputItem::FunctionCallOutput {
                call_id: result.tool_call_id.clone(),
                output: result.content.clone(),
                is_error: result.is_error,
            });
            self.turn.tool_results.push(result);
        }

        Ok(self.request(input, Some(previous)))
    }

    fn request(&self, input: Vec<InputItem>, previous_response_id: Option<String>) -> ResponseRequest {
        ResponseRequest {
            input,
            conversation_id: Some(self.state.conversation_id().to_string()),
            previous_response_id,
            tools: self.registry.capabilities(),
            instructions: self.options.instructions.clone(),
        }
    }

    /// End the turn after a fatal error.
    fn fail(&mut self, error: impl Into<SessionError>) -> SessionError {
        let error = match error.into() {
            SessionError::Engine(EngineError::StaleResponse(id)) => {
                SessionError::Conversation(ConversationError::StaleContinuation(id))
            }
            other => other,
        };
        warn!(error = %error, "Turn failed");
        self.abandon_turn();
        error
    }

    fn emit(&mut self, event: &StreamEvent) {
        if let Some(sink) = &self.events {
            if sink.send(event.clone()).is_err() {
                debug!("Event sink closed");
                self.events = None;
            }
        }
    }
}

/// Run calls concurrently. Failures become error results, never errors.
async fn dispatch(registry: &ToolRegistry, calls: Vec<ToolCallRequest>) -> Vec<ToolResult> {
    let runs = calls.into_iter().map(|call| async move {
        let Some(tool) = registry.resolve(&call.server_label, &call.tool_name) else {
            warn!(call = %call, "No tool registered for call");
            return ToolResult::error(
                call.id,
                format!("Unknown tool: {}/{}", call.server_label, call.tool_name),
            );
        };

        let context = ToolContext {
            tool_call_id: call.id.clone(),
        };
        debug!(call = %call, "Invoking tool");
        match tool
            .execute(serde_json::Value::Object(call.arguments), &context)
            .await
        {
            Ok(mut result) => {
                result.tool_call_id = call.id;
                result
            }
            Err(e) => {
                warn!(tool = %call.tool_name, error = %e, "Tool call failed");
                ToolResult::error(call.id, format!("Tool error: {}", e))
            }
        }
    });
    futures::future::join_all(runs).await
}
