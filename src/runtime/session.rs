use super::approvals::{ApprovalResolver, ResolveOutcome};
use super::events::{EventStreamClient, StreamUpdate};
use super::lifecycle::RunLifecycleClient;
use crate::api::RunBackend;
use crate::error::{Result, RunError};
use crate::state::{lock_store, reduce, Reduction, RunState, RunStore, SharedRunStore};
use crate::types::ApprovalDecision;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One client-side view of one run at a time.
///
/// Every entry point that changes runs tears the subscription down first,
/// so a late event from the previous run never reaches the new one.
pub struct RunSession {
    store: SharedRunStore,
    lifecycle: RunLifecycleClient,
    resolver: ApprovalResolver,
    stream: EventStreamClient,
    assistant_type: String,
    observer: Option<mpsc::UnboundedSender<StreamUpdate>>,
}

impl RunSession {
    pub fn new(backend: Arc<dyn RunBackend>, assistant_type: impl Into<String>) -> Self {
        Self::with_store(backend, RunStore::new(), assistant_type)
    }

    pub fn with_store(
        backend: Arc<dyn RunBackend>,
        store: RunStore,
        assistant_type: impl Into<String>,
    ) -> Self {
        let store = store.into_shared();
        Self {
            lifecycle: RunLifecycleClient::new(Arc::clone(&backend), Arc::clone(&store)),
            resolver: ApprovalResolver::new(Arc::clone(&backend), Arc::clone(&store)),
            stream: EventStreamClient::new(backend),
            store,
            assistant_type: assistant_type.into(),
            observer: None,
        }
    }

    /// Returns a channel that receives every applied event plus feed errors
    /// and end-of-feed markers. Takes effect from the next subscription.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<StreamUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        rx
    }

    pub fn store(&self) -> SharedRunStore {
        Arc::clone(&self.store)
    }

    pub fn snapshot(&self) -> RunState {
        lock_store(&self.store).snapshot()
    }

    pub fn run_id(&self) -> Option<String> {
        lock_store(&self.store).current_run_id().map(ToOwned::to_owned)
    }

    pub fn lifecycle(&self) -> &RunLifecycleClient {
        &self.lifecycle
    }

    pub fn resolver(&self) -> &ApprovalResolver {
        &self.resolver
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    /// Creates a new run and subscribes to its events.
    pub async fn start(&mut self, initial_message: &str) -> Result<String> {
        self.stream.disconnect().await;
        lock_store(&self.store).reset();

        let run_id = self
            .lifecycle
            .create_run(initial_message, &self.assistant_type)
            .await?;
        self.subscribe(&run_id).await?;
        Ok(run_id)
    }

    /// Switches to an existing run.
    pub async fn open(&mut self, run_id: &str) -> Result<()> {
        self.stream.disconnect().await;
        self.lifecycle.switch_run(run_id).await?;
        self.subscribe(run_id).await
    }

    /// Recovers from a broken feed: rehydrate, then resume after the last
    /// applied sequence.
    pub async fn reconnect(&mut self) -> Result<()> {
        let run_id = self.run_id().ok_or(RunError::NoActiveRun)?;
        self.stream.disconnect().await;
        self.lifecycle.hydrate(&run_id).await?;
        self.subscribe(&run_id).await
    }

    pub async fn close(&mut self) {
        self.stream.disconnect().await;
        lock_store(&self.store).reset();
    }

    pub async fn send_message(&self, content: &str) -> Result<()> {
        self.lifecycle.send_message(content).await
    }

    pub async fn resolve_approval(
        &self,
        approval_id: &str,
        decision: ApprovalDecision,
        edited_arguments: Option<serde_json::Value>,
        reason: Option<String>,
    ) -> Result<ResolveOutcome> {
        self.resolver
            .resolve(approval_id, decision, edited_arguments, reason)
            .await
    }

    async fn subscribe(&mut self, run_id: &str) -> Result<()> {
        let after_sequence = lock_store(&self.store)
            .run()
            .and_then(|run| run.last_sequence);
        let handler = event_handler(Arc::clone(&self.store), self.observer.clone());

        let store = &self.store;
        self.stream
            .connect_after(run_id, after_sequence, handler)
            .await
            .inspect_err(|error| lock_store(store).set_error(error.to_string()))
    }
}

fn event_handler(
    store: SharedRunStore,
    observer: Option<mpsc::UnboundedSender<StreamUpdate>>,
) -> impl FnMut(StreamUpdate) + Send + 'static {
    move |update| {
        match &update {
            StreamUpdate::Event(event) => {
                if let Reduction::Ignored(reason) = reduce(&mut lock_store(&store), event) {
                    tracing::trace!(?reason, kind = ?event.kind(), "event not forwarded");
                    return;
                }
            }
            StreamUpdate::Error(error) => lock_store(&store).set_error(error.to_string()),
            StreamUpdate::Ended => {}
        }

        if let Some(observer) = &observer {
            // A dropped receiver just means nobody is watching.
            let _ = observer.send(update);
        }
    }
}
