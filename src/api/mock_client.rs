use super::backend::{ByteStream, RunBackend};
use crate::error::{Result, RunError};
use crate::types::{
    Approval, CreateRunRequest, CreateRunResponse, Message, MessageRole, ResolveApprovalRequest,
    Run,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Frames one JSON event as an SSE `data:` block.
pub fn sse_frame(event: &serde_json::Value) -> String {
    format!("data: {event}\n\n")
}

struct MockStream {
    frames: Vec<String>,
    keep_open: bool,
}

#[derive(Default)]
struct MockState {
    runs: HashMap<String, Run>,
    pending: Vec<Approval>,
    streams: VecDeque<MockStream>,
    next_run_ids: VecDeque<String>,
    created: Vec<CreateRunRequest>,
    sent_messages: Vec<(String, String)>,
    resolutions: Vec<(String, ResolveApprovalRequest)>,
    stream_requests: Vec<(String, Option<u64>)>,
    request_failure: Option<String>,
    resolve_gate: Option<Arc<Notify>>,
}

/// In-memory [`RunBackend`] that serves canned snapshots and SSE frames and
/// records every request it receives.
#[derive(Clone, Default)]
pub struct MockApiClient {
    state: Arc<Mutex<MockState>>,
}

impl MockApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_run(self, run: Run) -> Self {
        self.state().runs.insert(run.run_id.clone(), run);
        self
    }

    pub fn with_pending_approvals(self, approvals: Vec<Approval>) -> Self {
        self.state().pending = approvals;
        self
    }

    /// Ids handed out by `create_run`, in order.
    pub fn with_created_run_id(self, run_id: impl Into<String>) -> Self {
        self.state().next_run_ids.push_back(run_id.into());
        self
    }

    /// Queues one finite event feed; the next `open_event_stream` serves it
    /// and then ends.
    pub fn push_stream(&self, frames: Vec<String>) {
        self.state().streams.push_back(MockStream {
            frames,
            keep_open: false,
        });
    }

    /// Queues an event feed that stays open after its frames.
    pub fn push_open_stream(&self, frames: Vec<String>) {
        self.state().streams.push_back(MockStream {
            frames,
            keep_open: true,
        });
    }

    /// Makes every REST call fail until cleared with `None`.
    pub fn set_request_failure(&self, message: Option<&str>) {
        self.state().request_failure = message.map(ToOwned::to_owned);
    }

    /// Holds resolve calls until the returned handle is notified.
    pub fn hold_resolutions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state().resolve_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn replace_run(&self, run: Run) {
        self.state().runs.insert(run.run_id.clone(), run);
    }

    pub fn created_runs(&self) -> Vec<CreateRunRequest> {
        self.state().created.clone()
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.state().sent_messages.clone()
    }

    pub fn resolutions(&self) -> Vec<(String, ResolveApprovalRequest)> {
        self.state().resolutions.clone()
    }

    pub fn stream_requests(&self) -> Vec<(String, Option<u64>)> {
        self.state().stream_requests.clone()
    }

    fn check_failure(&self) -> Result<()> {
        match &self.state().request_failure {
            Some(message) => Err(RunError::Request(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RunBackend for MockApiClient {
    async fn create_run(&self, request: &CreateRunRequest) -> Result<CreateRunResponse> {
        self.check_failure()?;
        let mut state = self.state();
        let run_id = state
            .next_run_ids
            .pop_front()
            .unwrap_or_else(|| format!("run_{}", state.created.len() + 1));
        state.created.push(request.clone());

        let mut run = Run::new(run_id.clone());
        run.messages.push(Message {
            id: format!("{run_id}_initial"),
            role: MessageRole::User,
            content: request.initial_message.clone(),
            timestamp: chrono::Utc::now(),
        });
        state.runs.insert(run_id.clone(), run);
        Ok(CreateRunResponse { run_id })
    }

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        self.check_failure()?;
        self.state()
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| RunError::Api {
                endpoint: format!("mock://runs/{run_id}"),
                status: 404,
                message: "run not found".to_string(),
            })
    }

    async fn send_message(&self, run_id: &str, content: &str) -> Result<()> {
        self.check_failure()?;
        self.state()
            .sent_messages
            .push((run_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn pending_approvals(&self) -> Result<Vec<Approval>> {
        self.check_failure()?;
        Ok(self.state().pending.clone())
    }

    async fn resolve_approval(
        &self,
        approval_id: &str,
        request: &ResolveApprovalRequest,
    ) -> Result<()> {
        let gate = self.state().resolve_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check_failure()?;

        let mut state = self.state();
        state
            .resolutions
            .push((approval_id.to_string(), request.clone()));
        state.pending.retain(|approval| approval.id != approval_id);
        Ok(())
    }

    async fn open_event_stream(
        &self,
        run_id: &str,
        after_sequence: Option<u64>,
    ) -> Result<ByteStream> {
        let mut state = self.state();
        state
            .stream_requests
            .push((run_id.to_string(), after_sequence));
        let Some(feed) = state.streams.pop_front() else {
            return Err(RunError::Transport(
                "MockApiClient: no more event streams configured".to_string(),
            ));
        };

        let chunks: Vec<Result<Bytes>> = feed
            .frames
            .into_iter()
            .map(|frame| {
                let framed = if frame.ends_with("\n\n") {
                    frame
                } else {
                    format!("{frame}\n\n")
                };
                Ok(Bytes::from(framed))
            })
            .collect();

        let frames = stream::iter(chunks);
        if feed.keep_open {
            Ok(Box::pin(frames.chain(stream::pending())))
        } else {
            Ok(Box::pin(frames))
        }
    }
}
