use agentrun::api::mock_client::{sse_frame, MockApiClient};
use agentrun::config::Config;
use agentrun::runtime::{ResolveOutcome, RunSession, StreamUpdate};
use agentrun::types::{ApprovalDecision, RunStatus, ToolCallStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[test]
fn test_config_validation_requires_token_for_remote_api() {
    let config = Config {
        api_url: "https://runs.example.com/api".to_string(),
        ..Config::default()
    };

    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_allows_local_endpoint_without_token() {
    let config = Config {
        api_url: "http://localhost:8080/api".to_string(),
        api_token: None,
        ..Config::default()
    };

    assert!(config.validate().is_ok());
}

async fn next_update(updates: &mut UnboundedReceiver<StreamUpdate>) -> StreamUpdate {
    tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("update before timeout")
        .expect("observer channel open")
}

#[tokio::test]
async fn test_approval_gated_tool_call_end_to_end() {
    let run = "run_7";
    let mock = MockApiClient::new().with_created_run_id(run);
    mock.push_open_stream(vec![
        sse_frame(&json!({"eventType": "run.started", "runId": run, "sequence": 1})),
        sse_frame(&json!({
            "eventType": "tool.call.requested",
            "runId": run,
            "sequence": 2,
            "id": "tc1",
            "toolName": "delete_branch",
            "args": {"name": "feature/old"},
            "riskTier": "High",
            "requiresApproval": true
        })),
        sse_frame(&json!({
            "eventType": "approval.requested",
            "runId": run,
            "sequence": 3,
            "id": "ap1",
            "toolCallId": "tc1",
            "toolName": "delete_branch",
            "args": {"name": "feature/old"},
            "riskTier": "High"
        })),
    ]);

    let mut session = RunSession::new(Arc::new(mock.clone()), "git");
    let mut updates = session.observe();
    session.start("clean up branches").await.unwrap();

    for _ in 0..3 {
        assert!(matches!(
            next_update(&mut updates).await,
            StreamUpdate::Event(_)
        ));
    }

    let state = session.snapshot();
    assert_eq!(state.pending_approvals.len(), 1);
    assert_eq!(
        state.run.as_ref().map(|run| run.status),
        Some(RunStatus::WaitingForApproval)
    );
    assert_eq!(
        state.run.as_ref().and_then(|run| run.tool_call("tc1")).map(|call| call.status),
        Some(ToolCallStatus::Pending)
    );

    let outcome = session
        .resolve_approval(
            "ap1",
            ApprovalDecision::EditedAndApproved,
            Some(json!({"name": "feature/older"})),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome, ResolveOutcome::Removed);

    let state = session.snapshot();
    assert!(state.pending_approvals.is_empty());
    assert_eq!(
        state.run.as_ref().map(|run| run.status),
        Some(RunStatus::Running)
    );

    let resolutions = mock.resolutions();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].1.run_id, run);
    assert_eq!(
        resolutions[0].1.edited_arguments,
        Some(json!({"name": "feature/older"}))
    );

    session.close().await;
    assert!(session.snapshot().run.is_none());
}

#[tokio::test]
async fn test_run_failure_blocks_further_input() {
    let run = "run_9";
    let mock = MockApiClient::new().with_created_run_id(run);
    mock.push_stream(vec![
        sse_frame(&json!({"eventType": "run.started", "runId": run})),
        sse_frame(&json!({"eventType": "run.failed", "runId": run, "error": "tool crashed"})),
    ]);

    let mut session = RunSession::new(Arc::new(mock.clone()), "general");
    let mut updates = session.observe();
    session.start("do the thing").await.unwrap();

    loop {
        if matches!(next_update(&mut updates).await, StreamUpdate::Ended) {
            break;
        }
    }

    let state = session.snapshot();
    assert_eq!(state.error.as_deref(), Some("tool crashed"));
    assert_eq!(state.run.map(|run| run.status), Some(RunStatus::Failed));

    assert!(session.send_message("again").await.is_err());
    assert!(mock.sent_messages().is_empty());
}
