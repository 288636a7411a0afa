//! Approval gate.
//!
//! Each [`ApprovalRequest`] moves `Pending -> {Approved, Denied} -> Resolved`.
//! Decisions come from a policy, the caller, or the approval timeout (which
//! always denies). Requests in one batch are independent of each other.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::conversation::ConversationError;
use crate::tool::ToolCallRequest;

/// A tool call held back until someone decides on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique within the conversation.
    pub id: String,
    pub server_label: String,
    /// The client-side call this request guards. `None` when the engine runs
    /// the tool itself and only asks for consent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

impl ApprovalRequest {
    /// The approval request guarding a client-side tool call.
    pub fn for_call(call: &ToolCallRequest) -> Self {
        Self {
            id: format!("approval_{}", call.id),
            server_label: call.server_label.clone(),
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.tool_name.clone()),
            arguments: Some(serde_json::Value::Object(call.arguments.clone())),
        }
    }
}

/// The caller's (or policy's) answer to one approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approval_request_id: String,
    pub approve: bool,
}

impl ApprovalResponse {
    pub fn approve(id: impl Into<String>) -> Self {
        Self {
            approval_request_id: id.into(),
            approve: true,
        }
    }

    pub fn deny(id: impl Into<String>) -> Self {
        Self {
            approval_request_id: id.into(),
            approve: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
    Resolved,
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    Caller,
    Policy,
    /// No decision arrived in time, or the caller left the request out.
    Timeout,
}

#[derive(Debug, Clone)]
struct GateEntry {
    request: ApprovalRequest,
    state: ApprovalState,
    source: Option<DecisionSource>,
}

/// A request whose decision has been submitted back into the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedApproval {
    pub request: ApprovalRequest,
    pub approved: bool,
    pub source: DecisionSource,
}

/// Holds the current batch of approval requests for one conversation.
#[derive(Debug, Default)]
pub struct ApprovalGate {
    entries: IndexMap<String, GateEntry>,
    resolved: HashSet<String>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a request in `Pending`. Ids are unique for the lifetime of the gate.
    pub fn open(&mut self, request: ApprovalRequest) -> Result<(), ConversationError> {
        if self.entries.contains_key(&request.id) || self.resolved.contains(&request.id) {
            return Err(ConversationError::DuplicateApproval(request.id));
        }
        tracing::debug!(id = %request.id, server = %request.server_label, "Approval request opened");
        self.entries.insert(
            request.id.clone(),
            GateEntry {
                request,
                state: ApprovalState::Pending,
                source: None,
            },
        );
        Ok(())
    }

    /// Requests still waiting for a decision, in arrival order.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.entries
            .values()
            .filter(|e| e.state == ApprovalState::Pending)
            .map(|e| e.request.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == ApprovalState::Pending)
            .count()
    }

    /// Whether any request in the current batch has not been resolved yet.
    pub fn has_unresolved(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn state(&self, id: &str) -> Option<ApprovalState> {
        if let Some(entry) = self.entries.get(id) {
            return Some(entry.state);
        }
        self.resolved.contains(id).then_some(ApprovalState::Resolved)
    }

    /// Check a batch of responses without changing anything.
    ///
    /// Every response must name a request that is currently pending, and no
    /// id may appear twice.
    pub fn validate(&self, responses: &[ApprovalResponse]) -> Result<(), ConversationError> {
        let mut seen = HashSet::new();
        for response in responses {
            let id = &response.approval_request_id;
            if !seen.insert(id.as_str()) {
                return Err(ConversationError::DuplicateApproval(id.clone()));
            }
            match self.state(id) {
                Some(ApprovalState::Pending) => {}
                Some(_) => return Err(ConversationError::AlreadyResolved(id.clone())),
                None => return Err(ConversationError::UnknownApproval(id.clone())),
            }
        }
        Ok(())
    }

    /// Record one decision. Fails unless the request is pending.
    pub fn decide(
        &mut self,
        id: &str,
        approve: bool,
        source: DecisionSource,
    ) -> Result<(), ConversationError> {
        let entry = match self.entries.get_mut(id) {
            Some(entry) => entry,
            None if self.resolved.contains(id) => {
                return Err(ConversationError::AlreadyResolved(id.to_string()))
            }
            None => return Err(ConversationError::UnknownApproval(id.to_string())),
        };
        if entry.state != ApprovalState::Pending {
            return Err(ConversationError::AlreadyResolved(id.to_string()));
        }
        entry.state = if approve {
            ApprovalState::Approved
        } else {
            ApprovalState::Denied
        };
        entry.source = Some(source);
        tracing::info!(id = %id, approve, ?source, "Approval decided");
        Ok(())
    }

    /// Validate, then record, a whole batch of caller decisions.
    pub fn apply(&mut self, responses: &[ApprovalResponse]) -> Result<(), ConversationError> {
        self.validate(responses)?;
        for response in responses {
            self.decide(&response.approval_request_id, response.approve, DecisionSource::Caller)?;
        }
        Ok(())
    }

    /// Deny every request that is still pending. Returns the denied ids.
    pub fn deny_pending(&mut self) -> Vec<String> {
        let mut denied = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if entry.state == ApprovalState::Pending {
                entry.state = ApprovalState::Denied;
                entry.source = Some(DecisionSource::Timeout);
                denied.push(id.clone());
            }
        }
        if !denied.is_empty() {
            tracing::warn!(count = denied.len(), "Undecided approval requests denied");
        }
        denied
    }

    /// Move every decided request to `Resolved` and hand them back in arrival
    /// order. Requests still pending stay in the gate.
    pub fn resolve(&mut self) -> Vec<ResolvedApproval> {
        let mut out = Vec::new();
        let mut keep = IndexMap::new();
        for (id, entry) in self.entries.drain(..) {
            match (entry.state, entry.source) {
                (ApprovalState::Approved, Some(source)) | (ApprovalState::Denied, Some(source)) => {
                    self.resolved.insert(id);
                    out.push(ResolvedApproval {
                        approved: entry.state == ApprovalState::Approved,
                        request: entry.request,
                        source,
                    });
                }
                _ => {
                    keep.insert(id, entry);
                }
            }
        }
        self.entries = keep;
        out
    }

    /// Forget the current batch without resolving it. Used when a turn is
    /// abandoned; the ids stay reserved.
    pub fn abandon(&mut self) -> usize {
        let count = self.entries.len();
        for (id, _) in self.entries.drain(..) {
            self.resolved.insert(id);
        }
        count
    }
}

// ── Policies ────────────────────────────────────────────────────────

/// Result of consulting a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Approved,
    Denied(String),
    NeedsConfirmation,
}

/// Decides approval requests without asking the caller, where it can.
#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    async fn evaluate(&self, request: &ApprovalRequest) -> PolicyDecision;
}

/// Always defers to the caller.
pub struct ManualPolicy;

#[async_trait]
impl ApprovalPolicy for ManualPolicy {
    async fn evaluate(&self, _request: &ApprovalRequest) -> PolicyDecision {
        PolicyDecision::NeedsConfirmation
    }
}

/// Approves everything.
pub struct AutoApprovePolicy;

#[async_trait]
impl ApprovalPolicy for AutoApprovePolicy {
    async fn evaluate(&self, _request: &ApprovalRequest) -> PolicyDecision {
        PolicyDecision::Approved
    }
}

/// Denies everything.
pub struct DenyAllPolicy;

#[async_trait]
impl ApprovalPolicy for DenyAllPolicy {
    async fn evaluate(&self, request: &ApprovalRequest) -> PolicyDecision {
        PolicyDecision::Denied(format!(
            "calls to server '{}' are denied by policy",
            request.server_label
        ))
    }
}

/// Approves listed tools per server and asks about everything else.
///
/// A `"*"` entry approves every tool on that server.
#[derive(Debug, Clone, Default)]
pub struct AllowListPolicy {
    allowed: HashMap<String, HashSet<String>>,
}

impl AllowListPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, server_label: &str, tool_name: &str) -> Self {
        self.allowed
            .entry(server_label.to_string())
            .or_default()
            .insert(tool_name.to_string());
        self
    }

    pub fn is_allowed(&self, server_label: &str, tool_name: Option<&str>) -> bool {
        let Some(tools) = self.allowed.get(server_label) else {
            return false;
        };
        tools.contains("*") || tool_name.is_some_and(|name| tools.contains(name))
    }
}

#[async_trait]
impl ApprovalPolicy for AllowListPolicy {
    async fn evaluate(&self, request: &ApprovalRequest) -> PolicyDecision {
        if self.is_allowed(&request.server_label, request.tool_name.as_deref()) {
            PolicyDecision::Approved
        } else {
            PolicyDecision::NeedsConfirmation
        }
    }
}

// ── Interactive decisions ───────────────────────────────────────────

/// Asks someone (a terminal user, a UI) to decide one request.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn decide(&self, request: &ApprovalRequest) -> bool;
}

/// Ask `handler` about every request concurrently. Each question is bounded by
/// `timeout` on its own; a timed-out request is answered with a denial and does
/// not affect the others.
pub async fn collect_decisions(
    handler: &dyn ApprovalHandler,
    requests: &[ApprovalRequest],
    timeout: Duration,
) -> Vec<ApprovalResponse> {
    let asks = requests.iter().map(|request| async move {
        match tokio::time::timeout(timeout, handler.decide(request)).await {
            Ok(approve) => ApprovalResponse {
                approval_request_id: request.id.clone(),
                approve,
            },
            Err(_) => {
                tracing::warn!(id = %request.id, ?timeout, "Approval timed out, denying");
                ApprovalResponse::deny(request.id.clone())
            }
        }
    });
    futures::future::join_all(asks).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, server: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: id.to_string(),
            server_label: server.to_string(),
            tool_call_id: None,
            tool_name: Some("search".to_string()),
            arguments: None,
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut gate = ApprovalGate::new();
        gate.open(request("a1", "api-specs")).unwrap();
        assert_eq!(gate.state("a1"), Some(ApprovalState::Pending));

        gate.decide("a1", true, DecisionSource::Caller).unwrap();
        assert_eq!(gate.state("a1"), Some(ApprovalState::Approved));
        assert_eq!(gate.pending_count(), 0);
        assert!(gate.has_unresolved());

        let resolved = gate.resolve();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].approved);
        assert_eq!(gate.state("a1"), Some(ApprovalState::Resolved));
        assert!(!gate.has_unresolved());
    }

    #[test]
    fn test_duplicate_open_rejected_even_after_resolution() {
        let mut gate = ApprovalGate::new();
        gate.open(request("a1", "s")).unwrap();
        assert!(matches!(
            gate.open(request("a1", "s")),
            Err(ConversationError::DuplicateApproval(_))
        ));
        gate.decide("a1", false, DecisionSource::Caller).unwrap();
        gate.resolve();
        assert!(gate.open(request("a1", "s")).is_err());
    }

    #[test]
    fn test_second_decision_rejected() {
        let mut gate = ApprovalGate::new();
        gate.open(request("a1", "s")).unwrap();
        gate.decide("a1", true, DecisionSource::Caller).unwrap();
        assert!(matches!(
            gate.decide("a1", false, DecisionSource::Caller),
            Err(ConversationError::AlreadyResolved(_))
        ));
        gate.resolve();
        assert!(matches!(
            gate.decide("a1", true, DecisionSource::Caller),
            Err(ConversationError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let mut gate = ApprovalGate::new();
        gate.open(request("a1", "s")).unwrap();
        gate.open(request("a2", "s")).unwrap();

        let batch = vec![ApprovalResponse::approve("a1"), ApprovalResponse::approve("zz")];
        assert!(matches!(
            gate.apply(&batch),
            Err(ConversationError::UnknownApproval(ref id)) if id == "zz"
        ));
        assert_eq!(gate.pending_count(), 2);

        let batch = vec![ApprovalResponse::approve("a1"), ApprovalResponse::deny("a1")];
        assert!(matches!(
            gate.apply(&batch),
            Err(ConversationError::DuplicateApproval(_))
        ));
        assert_eq!(gate.pending_count(), 2);
    }

    #[test]
    fn test_deny_pending_marks_timeouts() {
        let mut gate = ApprovalGate::new();
        gate.open(request("a1", "s")).unwrap();
        gate.open(request("a2", "s")).unwrap();
        gate.decide("a1", true, DecisionSource::Caller).unwrap();

        assert_eq!(gate.deny_pending(), vec!["a2".to_string()]);
        let resolved = gate.resolve();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].request.id, "a1");
        assert!(resolved[0].approved);
        assert!(!resolved[1].approved);
        assert_eq!(resolved[1].source, DecisionSource::Timeout);
    }

    #[test]
    fn test_abandon_reserves_ids() {
        let mut gate = ApprovalGate::new();
        gate.open(request("a1", "s")).unwrap();
        assert_eq!(gate.abandon(), 1);
        assert!(gate.pending().is_empty());
        assert!(gate.open(request("a1", "s")).is_err());
    }

    #[test]
    fn test_for_call_derives_id() {
        let call = ToolCallRequest {
            id: "call_7".to_string(),
            server_label: "fx".to_string(),
            tool_name: "get_exchange_rate".to_string(),
            arguments: serde_json::Map::new(),
        };
        let req = ApprovalRequest::for_call(&call);
        assert_eq!(req.id, "approval_call_7");
        assert_eq!(req.tool_call_id.as_deref(), Some("call_7"));
    }

    #[test]
    fn test_allow_list() {
        let policy = AllowListPolicy::new()
            .allow("fx", "get_exchange_rate")
            .allow("docs", "*");
        assert!(policy.is_allowed("fx", Some("get_exchange_rate")));
        assert!(!policy.is_allowed("fx", Some("transfer")));
        assert!(policy.is_allowed("docs", None));
        assert!(!policy.is_allowed("other", Some("get_exchange_rate")));
    }

    #[tokio::test]
    async fn test_policies() {
        let req = request("a1", "api-specs");
        assert_eq!(ManualPolicy.evaluate(&req).await, PolicyDecision::NeedsConfirmation);
        assert_eq!(AutoApprovePolicy.evaluate(&req).await, PolicyDecision::Approved);
        assert!(matches!(DenyAllPolicy.evaluate(&req).await, PolicyDecision::Denied(_)));
    }

    struct SlowForServer(&'static str);

    #[async_trait]
    impl ApprovalHandler for SlowForServer {
        async fn decide(&self, request: &ApprovalRequest) -> bool {
            if request.server_label == self.0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_denies_only_the_slow_request() {
        let requests = vec![request("a1", "slow"), request("a2", "fast")];
        let responses =
            collect_decisions(&SlowForServer("slow"), &requests, Duration::from_secs(5)).await;
        assert_eq!(
            responses,
            vec![ApprovalResponse::deny("a1"), ApprovalResponse::approve("a2")]
        );
    }
}
