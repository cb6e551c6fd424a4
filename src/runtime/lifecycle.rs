use crate::api::RunBackend;
use crate::error::{Result, RunError};
use crate::state::{lock_store, SharedRunStore};
use crate::types::{CreateRunRequest, Run, RunStatus};
use std::sync::Arc;

/// REST side of a run: creation, snapshot hydration and follow-up input.
#[derive(Clone)]
pub struct RunLifecycleClient {
    backend: Arc<dyn RunBackend>,
    store: SharedRunStore,
}

impl RunLifecycleClient {
    pub fn new(backend: Arc<dyn RunBackend>, store: SharedRunStore) -> Self {
        Self { backend, store }
    }

    /// Creates a run and hydrates the store with its first snapshot.
    pub async fn create_run(&self, initial_message: &str, assistant_type: &str) -> Result<String> {
        let request = CreateRunRequest {
            initial_message: initial_message.to_string(),
            assistant_type: assistant_type.to_string(),
        };
        let created = self
            .backend
            .create_run(&request)
            .await
            .inspect_err(|error| self.record_error(error))?;
        tracing::info!(run_id = %created.run_id, assistant_type, "run created");

        self.hydrate(&created.run_id).await?;
        Ok(created.run_id)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run> {
        self.backend
            .get_run(run_id)
            .await
            .inspect_err(|error| self.record_error(error))
    }

    /// Replaces the store's run with the server snapshot and seeds the
    /// pending set from the approvals that belong to it.
    pub async fn hydrate(&self, run_id: &str) -> Result<()> {
        let mut run = self.get_run(run_id).await?;
        let approvals = self
            .backend
            .pending_approvals()
            .await
            .inspect_err(|error| self.record_error(error))?;
        let pending: Vec<_> = approvals
            .into_iter()
            .filter(|approval| approval.run_id == run_id)
            .collect();

        let mut store = lock_store(&self.store);
        // A snapshot without a sequence must not rewind the resume point.
        let applied = store
            .run()
            .filter(|current| current.run_id == run.run_id)
            .and_then(|current| current.last_sequence);
        run.last_sequence = run.last_sequence.max(applied);
        tracing::debug!(
            run_id,
            status = ?run.status,
            messages = run.messages.len(),
            pending = pending.len(),
            "hydrated run"
        );
        let run_error = run.error.clone();
        store.set_run(run);
        store.set_pending_approvals(pending);
        store.set_is_streaming(false);
        match run_error {
            Some(error) => store.set_error(error),
            None => store.clear_error(),
        }
        Ok(())
    }

    /// Posts a follow-up user message. A failed run only accepts a new run.
    pub async fn send_message(&self, content: &str) -> Result<()> {
        let run_id = {
            let store = lock_store(&self.store);
            let run = store.run().ok_or(RunError::NoActiveRun)?;
            if run.status == RunStatus::Failed {
                return Err(RunError::Application(format!(
                    "run {} has failed; start a new run",
                    run.run_id
                )));
            }
            run.run_id.clone()
        };

        self.backend
            .send_message(&run_id, content)
            .await
            .inspect_err(|error| self.record_error(error))?;
        tracing::debug!(run_id = %run_id, chars = content.len(), "message sent");
        Ok(())
    }

    /// Drops all local state and loads `run_id` in its place.
    pub async fn switch_run(&self, run_id: &str) -> Result<()> {
        lock_store(&self.store).reset();
        self.hydrate(run_id).await
    }

    fn record_error(&self, error: &RunError) {
        tracing::warn!(%error, kind = ?error.kind(), "run request failed");
        if error.is_run_scoped() {
            lock_store(&self.store).set_error(error.to_string());
        }
    }
}
