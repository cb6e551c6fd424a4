use crate::error::Result;
use crate::types::{
    Approval, CreateRunRequest, CreateRunResponse, ResolveApprovalRequest, Run,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Remote surface the run client depends on.
///
/// [`ApiClient`](super::ApiClient) talks to the real service;
/// [`MockApiClient`](super::mock_client::MockApiClient) serves canned data.
#[async_trait]
pub trait RunBackend: Send + Sync {
    async fn create_run(&self, request: &CreateRunRequest) -> Result<CreateRunResponse>;

    async fn get_run(&self, run_id: &str) -> Result<Run>;

    async fn send_message(&self, run_id: &str, content: &str) -> Result<()>;

    /// Every pending approval across all runs.
    async fn pending_approvals(&self) -> Result<Vec<Approval>>;

    async fn resolve_approval(
        &self,
        approval_id: &str,
        request: &ResolveApprovalRequest,
    ) -> Result<()>;

    /// Opens the push-event feed for one run as raw SSE bytes.
    async fn open_event_stream(
        &self,
        run_id: &str,
        after_sequence: Option<u64>,
    ) -> Result<ByteStream>;
}
