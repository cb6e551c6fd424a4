mod api;
mod event;
mod run;

pub use api::{CreateRunRequest, CreateRunResponse, ResolveApprovalRequest, SendMessageRequest};
pub use event::{EventKind, EventPayload, RunEvent};
pub use run::{
    Approval, ApprovalDecision, ApprovalStatus, Message, MessageRole, RiskTier, Run, RunStatus,
    ToolCall, ToolCallStatus,
};
