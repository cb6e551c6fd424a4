use crate::types::{Approval, Message, Run, RunStatus, ToolCall, ToolCallStatus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything the client knows about the current run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub current_run_id: Option<String>,
    pub run: Option<Run>,
    pub pending_approvals: Vec<Approval>,
    pub is_streaming: bool,
    pub streaming_content: String,
    /// Run-scoped error slot. Last error wins.
    pub error: Option<String>,
}

/// Sole owner of the run snapshot, pending approvals and streaming buffer.
///
/// Each method is one complete state transition. Callers that share a store
/// across tasks hold it as a [`SharedRunStore`] and take the lock once per
/// transition, so no other writer can observe a half-applied change.
#[derive(Debug, Default)]
pub struct RunStore {
    state: RunState,
}

pub type SharedRunStore = Arc<Mutex<RunStore>>;

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RunState) -> Self {
        let mut store = Self { state };
        store.sync_pending_flag();
        store
    }

    pub fn into_shared(self) -> SharedRunStore {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn snapshot(&self) -> RunState {
        self.state.clone()
    }

    pub fn run(&self) -> Option<&Run> {
        self.state.run.as_ref()
    }

    pub fn current_run_id(&self) -> Option<&str> {
        self.state.current_run_id.as_deref()
    }

    pub fn status(&self) -> Option<RunStatus> {
        self.state.run.as_ref().map(|run| run.status)
    }

    pub fn has_pending_approval(&self) -> bool {
        !self.state.pending_approvals.is_empty()
    }

    pub fn pending_approval(&self, id: &str) -> Option<&Approval> {
        self.state
            .pending_approvals
            .iter()
            .find(|approval| approval.id == id)
    }

    /// Full snapshot replace used by (re)hydration. Approvals that belong to
    /// a different run are dropped.
    pub fn set_run(&mut self, run: Run) {
        self.state.current_run_id = Some(run.run_id.clone());
        self.state
            .pending_approvals
            .retain(|approval| approval.run_id == run.run_id);
        self.state.run = Some(run);
        self.sync_pending_flag();
    }

    /// Returns false when a message with the same id already exists or no
    /// run is loaded.
    pub fn add_message(&mut self, message: Message) -> bool {
        let Some(run) = self.state.run.as_mut() else {
            return false;
        };
        if run.messages.iter().any(|existing| existing.id == message.id) {
            return false;
        }
        run.messages.push(message);
        true
    }

    /// Terminal statuses are final; later transitions are refused and
    /// return false.
    pub fn update_status(&mut self, status: RunStatus) -> bool {
        let Some(run) = self.state.run.as_mut() else {
            return false;
        };
        if run.status.is_terminal() {
            return false;
        }
        run.status = status;
        true
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_some_and(RunStatus::is_terminal)
    }

    pub fn add_tool_call(&mut self, tool_call: ToolCall) -> bool {
        let Some(run) = self.state.run.as_mut() else {
            return false;
        };
        if run.tool_calls.iter().any(|existing| existing.id == tool_call.id) {
            return false;
        }
        run.tool_calls.push(tool_call);
        true
    }

    /// Unknown ids are a no-op.
    pub fn complete_tool_call(
        &mut self,
        id: &str,
        is_success: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        let Some(call) = self
            .state
            .run
            .as_mut()
            .and_then(|run| run.tool_calls.iter_mut().find(|call| call.id == id))
        else {
            return false;
        };
        call.status = if is_success {
            ToolCallStatus::Completed
        } else {
            ToolCallStatus::Failed
        };
        call.result = result;
        call.error = error;
        true
    }

    pub fn add_pending_approval(&mut self, approval: Approval) -> bool {
        let appended = self.pending_approval(&approval.id).is_none();
        if appended {
            self.state.pending_approvals.push(approval);
        }
        self.sync_pending_flag();
        appended
    }

    /// Removing the last pending approval is the only way out of
    /// `WaitingForApproval`; the run falls back to `Running`.
    pub fn remove_pending_approval(&mut self, id: &str) -> bool {
        let before = self.state.pending_approvals.len();
        self.state
            .pending_approvals
            .retain(|approval| approval.id != id);
        let removed = self.state.pending_approvals.len() != before;

        self.sync_pending_flag();
        if removed && self.state.pending_approvals.is_empty() {
            self.leave_approval_wait();
        }
        removed
    }

    /// Bulk replace of the pending set during hydration. Duplicate ids keep
    /// their first occurrence.
    pub fn set_pending_approvals(&mut self, approvals: Vec<Approval>) {
        let mut pending: Vec<Approval> = Vec::with_capacity(approvals.len());
        for approval in approvals {
            if !pending.iter().any(|existing| existing.id == approval.id) {
                pending.push(approval);
            }
        }
        self.state.pending_approvals = pending;
        self.sync_pending_flag();
        if self.state.pending_approvals.is_empty() {
            self.leave_approval_wait();
        }
    }

    /// A delta arriving outside an `LlmStarted` window opens one, so the
    /// buffer is never non-empty while streaming is off.
    pub fn append_streaming_content(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.state.is_streaming = true;
        self.state.streaming_content.push_str(delta);
    }

    pub fn set_is_streaming(&mut self, is_streaming: bool) {
        self.state.is_streaming = is_streaming;
        if !is_streaming {
            self.state.streaming_content.clear();
        }
    }

    /// Starts a fresh streaming window with an empty buffer.
    pub fn begin_streaming(&mut self) {
        self.state.is_streaming = true;
        self.state.streaming_content.clear();
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.state.error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.state.error = None;
    }

    /// Records a terminal failure on the run and in the error slot. A run
    /// that already finished keeps its outcome and false is returned.
    pub fn fail_run(&mut self, error: &str) -> bool {
        if let Some(run) = self.state.run.as_mut() {
            if run.status.is_terminal() {
                return false;
            }
            run.status = RunStatus::Failed;
            run.error = Some(error.to_string());
        }
        self.state.error = Some(error.to_string());
        true
    }

    /// True when `sequence` is newer than anything applied so far. Runs
    /// without a recorded sequence accept every event.
    pub fn is_new_sequence(&self, sequence: u64) -> bool {
        self.state
            .run
            .as_ref()
            .and_then(|run| run.last_sequence)
            .map_or(true, |last| sequence > last)
    }

    pub fn record_sequence(&mut self, sequence: u64) {
        if let Some(run) = self.state.run.as_mut() {
            run.last_sequence = Some(run.last_sequence.map_or(sequence, |last| last.max(sequence)));
        }
    }

    pub fn reset(&mut self) {
        self.state = RunState::default();
    }

    /// `WaitingForApproval` with nothing pending falls back to `Running`.
    fn leave_approval_wait(&mut self) {
        if let Some(run) = self.state.run.as_mut() {
            if run.status == RunStatus::WaitingForApproval {
                run.status = RunStatus::Running;
            }
        }
    }

    fn sync_pending_flag(&mut self) {
        let has_pending = !self.state.pending_approvals.is_empty();
        if let Some(run) = self.state.run.as_mut() {
            run.has_pending_approval = has_pending;
        }
    }
}

/// Locks a shared store, recovering the guard if a previous holder panicked.
pub fn lock_store(store: &SharedRunStore) -> MutexGuard<'_, RunStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}
