use crate::api::RunBackend;
use crate::error::{Result, RunError};
use crate::state::{lock_store, SharedRunStore};
use crate::types::{ApprovalDecision, ResolveApprovalRequest};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The approval was removed from the pending set by this call.
    Removed,
    /// An `ApprovalResolved` event removed it first.
    AlreadyConfirmed,
    /// The store moved to another run while the request was in flight.
    Stale,
}

type ResolvingSet = Arc<Mutex<HashSet<String>>>;

/// Submits human decisions for pending approvals.
///
/// Resolution is two-phase: the id is marked resolving, the request is
/// awaited, and only a successful response removes the approval. A later
/// `ApprovalResolved` event removes it again as an idempotent no-op.
#[derive(Clone)]
pub struct ApprovalResolver {
    backend: Arc<dyn RunBackend>,
    store: SharedRunStore,
    resolving: ResolvingSet,
}

impl ApprovalResolver {
    pub fn new(backend: Arc<dyn RunBackend>, store: SharedRunStore) -> Self {
        Self {
            backend,
            store,
            resolving: Arc::default(),
        }
    }

    pub fn is_resolving(&self, approval_id: &str) -> bool {
        lock_set(&self.resolving).contains(approval_id)
    }

    pub fn resolving_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_set(&self.resolving).iter().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn resolve(
        &self,
        approval_id: &str,
        decision: ApprovalDecision,
        edited_arguments: Option<serde_json::Value>,
        reason: Option<String>,
    ) -> Result<ResolveOutcome> {
        if decision == ApprovalDecision::EditedAndApproved && edited_arguments.is_none() {
            return Err(RunError::MissingEditedArguments);
        }

        let run_id = lock_store(&self.store)
            .current_run_id()
            .map(ToOwned::to_owned)
            .ok_or(RunError::NoActiveRun)?;

        let _resolving = ResolvingGuard::acquire(&self.resolving, approval_id)?;
        let request = ResolveApprovalRequest {
            run_id: run_id.clone(),
            decision,
            edited_arguments,
            reason,
        };

        let response = self.backend.resolve_approval(approval_id, &request).await;

        let mut store = lock_store(&self.store);
        let still_current = store.current_run_id() == Some(run_id.as_str());
        match response {
            Ok(()) if !still_current => {
                tracing::debug!(approval_id, run_id = %run_id, "resolve finished after run switch");
                Ok(ResolveOutcome::Stale)
            }
            Ok(()) => {
                let removed = store.remove_pending_approval(approval_id);
                tracing::info!(approval_id, ?decision, removed, "approval resolved");
                Ok(if removed {
                    ResolveOutcome::Removed
                } else {
                    ResolveOutcome::AlreadyConfirmed
                })
            }
            Err(error) => {
                if still_current {
                    store.set_error(error.to_string());
                }
                tracing::warn!(approval_id, %error, "approval resolve failed");
                Err(error)
            }
        }
    }
}

/// Holds an approval id in the resolving set until dropped, including when
/// the resolve future itself is dropped mid-flight.
struct ResolvingGuard {
    set: ResolvingSet,
    approval_id: String,
}

impl ResolvingGuard {
    fn acquire(set: &ResolvingSet, approval_id: &str) -> Result<Self> {
        if !lock_set(set).insert(approval_id.to_string()) {
            return Err(RunError::AlreadyResolving(approval_id.to_string()));
        }
        Ok(Self {
            set: Arc::clone(set),
            approval_id: approval_id.to_string(),
        })
    }
}

impl Drop for ResolvingGuard {
    fn drop(&mut self) {
        lock_set(&self.set).remove(&self.approval_id);
    }
}

fn lock_set(set: &ResolvingSet) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}
