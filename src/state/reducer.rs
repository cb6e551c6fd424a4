use super::store::RunStore;
use crate::types::{
    Approval, ApprovalStatus, EventPayload, Message, MessageRole, RunEvent, RunStatus, ToolCall,
    ToolCallStatus,
};

/// What a single reduction did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Applied,
    /// Recognized and accepted, but the transition has no effect.
    NoChange,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Event carries a run id other than the store's current run.
    ForeignRun,
    /// Event sequence is not newer than the last applied one.
    StaleSequence,
    Unrecognized,
}

/// Applies one event to the store. Every event is handled to completion
/// before the next; the caller holds the store lock for the whole call.
pub fn reduce(store: &mut RunStore, event: &RunEvent) -> Reduction {
    if let (Some(event_run), Some(current)) = (event.run_id.as_deref(), store.current_run_id()) {
        if event_run != current {
            tracing::debug!(
                event_run,
                current_run = current,
                kind = ?event.kind(),
                "ignoring event for a different run"
            );
            return Reduction::Ignored(IgnoreReason::ForeignRun);
        }
    }

    if let Some(sequence) = event.sequence {
        if !store.is_new_sequence(sequence) {
            tracing::debug!(sequence, kind = ?event.kind(), "dropping already applied event");
            return Reduction::Ignored(IgnoreReason::StaleSequence);
        }
    }

    let reduction = apply_payload(store, event);

    if let (Some(sequence), false) = (event.sequence, matches!(reduction, Reduction::Ignored(_))) {
        store.record_sequence(sequence);
    }
    reduction
}

fn apply_payload(store: &mut RunStore, event: &RunEvent) -> Reduction {
    match &event.payload {
        EventPayload::RunStarted => changed(store.update_status(RunStatus::Running)),
        EventPayload::LlmStarted => {
            store.begin_streaming();
            Reduction::Applied
        }
        EventPayload::LlmDelta { delta } => {
            store.append_streaming_content(delta);
            Reduction::Applied
        }
        EventPayload::LlmCompleted => Reduction::NoChange,
        EventPayload::MessageUserCreated { id, content } => changed(store.add_message(Message {
            id: id.clone(),
            role: MessageRole::User,
            content: content.clone(),
            timestamp: event.timestamp,
        })),
        EventPayload::MessageAssistantCreated { id, content } => {
            store.add_message(Message {
                id: id.clone(),
                role: MessageRole::Assistant,
                content: content.clone(),
                timestamp: event.timestamp,
            });
            store.set_is_streaming(false);
            Reduction::Applied
        }
        EventPayload::ToolCallRequested {
            id,
            tool_name,
            args,
            risk_tier,
            requires_approval,
        } => changed(store.add_tool_call(ToolCall {
            id: id.clone(),
            tool_name: tool_name.clone(),
            args: args.clone(),
            risk_tier: *risk_tier,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            requires_approval: *requires_approval,
            started_at: event.timestamp,
        })),
        EventPayload::ToolCallStarted => Reduction::NoChange,
        EventPayload::ToolCallCompleted {
            id,
            is_success,
            result,
            error,
        } => {
            let updated = store.complete_tool_call(id, *is_success, result.clone(), error.clone());
            if !updated {
                tracing::debug!(tool_call_id = %id, "completion for unknown tool call");
            }
            changed(updated)
        }
        EventPayload::ApprovalRequested {
            id,
            tool_call_id,
            tool_name,
            args,
            risk_tier,
            step_id,
        } => {
            if store.is_finished() {
                tracing::debug!(approval_id = %id, "approval requested for a finished run");
                return Reduction::NoChange;
            }
            let run_id = event
                .run_id
                .clone()
                .or_else(|| store.current_run_id().map(ToOwned::to_owned))
                .unwrap_or_default();
            store.add_pending_approval(Approval {
                id: id.clone(),
                run_id,
                step_id: step_id.clone(),
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                original_args: args.clone(),
                risk_tier: *risk_tier,
                status: ApprovalStatus::Pending,
            });
            store.update_status(RunStatus::WaitingForApproval);
            Reduction::Applied
        }
        EventPayload::ApprovalResolved { id } => changed(store.remove_pending_approval(id)),
        EventPayload::RunCompleted => finish(store, RunStatus::Completed),
        EventPayload::RunWaitingInput => finish(store, RunStatus::WaitingInput),
        EventPayload::RunCancelled => finish(store, RunStatus::Cancelled),
        EventPayload::RunFailed { error } => {
            store.set_is_streaming(false);
            if !store.fail_run(error) {
                tracing::debug!(error = %error, "failure reported for a finished run");
                return Reduction::NoChange;
            }
            tracing::warn!(error = %error, "run failed");
            Reduction::Applied
        }
        // No transition is defined for artifacts yet.
        EventPayload::ArtifactCreated => Reduction::NoChange,
        EventPayload::Unknown { event_type } => {
            tracing::warn!(event_type = %event_type, "ignoring unrecognized run event");
            Reduction::Ignored(IgnoreReason::Unrecognized)
        }
    }
}

fn finish(store: &mut RunStore, status: RunStatus) -> Reduction {
    store.set_is_streaming(false);
    changed(store.update_status(status))
}

fn changed(mutated: bool) -> Reduction {
    if mutated {
        Reduction::Applied
    } else {
        Reduction::NoChange
    }
}
