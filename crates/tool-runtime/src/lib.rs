pub mod tool;
pub mod registry;
pub mod approval;
pub mod provider;
pub mod conversation;
pub mod stream;
pub mod session;

pub use tool::{
    EchoTool, Tool, ToolCallRequest, ToolCapability, ToolContext, ToolDefinition, ToolError,
    ToolResult,
};
pub use registry::{RegistryError, ToolRegistry};
pub use approval::{
    AllowListPolicy, ApprovalGate, ApprovalHandler, ApprovalPolicy, ApprovalRequest,
    ApprovalResponse, ApprovalState, AutoApprovePolicy, DenyAllPolicy, ManualPolicy,
    PolicyDecision,
};
pub use provider::{EngineError, InputItem, ResponseEngine, ResponseRequest};
pub use conversation::{ConversationError, ConversationState, SessionPhase};
pub use stream::{CollectedResponse, ResponseStream, StreamEvent};
pub use session::{ConversationSession, SessionError, SessionOptions, TurnOutcome, TurnOutput};
