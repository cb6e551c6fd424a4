mod approvals;
mod events;
mod lifecycle;
mod session;


pub use approvals::{ApprovalResolver, ResolveOutcome};
pub use events::{EventStreamClient, StreamUpdate};
pub use lifecycle::RunLifecycleClient;
pub use session::RunSession;
