use crate::approval::{ApprovalGate, ApprovalRequest};
use crate::tool::ToolCallRequest;
use std::collections::HashMap;

/// Where the turn loop currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    AwaitingResponse,
    HasPendingApprovals,
    Complete,
}

/// State that must survive between a suspend point and its continuation.
///
/// Owned by exactly one session and mutated only by its turn loop.
#[derive(Debug)]
pub struct ConversationState {
    conversation_id: String,
    previous_response_id: Option<String>,
    gate: ApprovalGate,
    /// Client-side calls held behind an approval request, keyed by approval id.
    gated_calls: HashMap<String, ToolCallRequest>,
    /// Calls that need no approval but arrived alongside ones that do. They run
    /// when the batch is submitted, not before.
    deferred_calls: Vec<ToolCallRequest>,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            previous_response_id: None,
            gate: ApprovalGate::new(),
            gated_calls: HashMap::new(),
            deferred_calls: Vec::new(),
        }
    }

    /// A state with a fresh random conversation id.
    pub fn generate() -> Self {
        Self::new(format!("conv_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn previous_response_id(&self) -> Option<&str> {
        self.previous_response_id.as_deref()
    }

    pub(crate) fn set_previous_response_id(&mut self, id: Option<String>) {
        self.previous_response_id = id;
    }

    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.gate.pending()
    }

    pub fn has_pending_approvals(&self) -> bool {
        self.gate.has_unresolved()
    }

    pub(crate) fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub(crate) fn gate_mut(&mut self) -> &mut ApprovalGate {
        &mut self.gate
    }

    /// Hold a client-side call behind its approval request.
    pub(crate) fn hold(&mut self, approval_id: String, call: ToolCallRequest) {
        self.gated_calls.insert(approval_id, call);
    }

    pub(crate) fn defer(&mut self, call: ToolCallRequest) {
        self.deferred_calls.push(call);
    }

    pub(crate) fn has_deferred(&self) -> bool {
        !self.deferred_calls.is_empty()
    }

    pub(crate) fn release(&mut self, approval_id: &str) -> Option<ToolCallRequest> {
        self.gated_calls.remove(approval_id)
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<ToolCallRequest> {
        std::mem::take(&mut self.deferred_calls)
    }

    /// Drop everything belonging to the current turn. The conversation id is kept.
    pub(crate) fn reset_turn(&mut self) {
        let abandoned = self.gate.abandon();
        if abandoned > 0 {
            tracing::warn!(count = abandoned, "Abandoned unresolved approval requests");
        }
        self.gated_calls.clear();
        self.deferred_calls.clear();
        self.previous_response_id = None;
    }
}

/// Errors that end the current turn. Never retried automatically: repeating a
/// continuation could run an already-approved tool twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("{0} approval request(s) still pending; submit decisions before a new turn")]
    PendingApprovals(usize),
    #[error("Unknown approval request id: {0}")]
    UnknownApproval(String),
    #[error("Approval request id appears more than once: {0}")]
    DuplicateApproval(String),
    #[error("Approval request already resolved: {0}")]
    AlreadyResolved(String),
    #[error("No approval requests are pending")]
    NoPendingApprovals,
    #[error("Continuation rejected, previous response id is stale: {0}")]
    StaleContinuation(String),
}
