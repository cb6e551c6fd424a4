use agentrun::api::stream::StreamParser;
use agentrun::types::{EventKind, EventPayload, RiskTier};

#[test]
fn test_fragmented_events() {
    let mut parser = StreamParser::new();

    let chunk1 = b"event: llm.delta\ndata: {\"runId\":\"run_1\",\"del";
    let events1 = parser.process(chunk1);
    assert_eq!(events1.len(), 0);

    let chunk2 = b"ta\":\"Hi\",\"sequence\":4}\n\n";
    let events2 = parser.process(chunk2);
    assert_eq!(events2.len(), 1);
    assert_eq!(events2[0].run_id.as_deref(), Some("run_1"));
    assert_eq!(events2[0].sequence, Some(4));
}

#[test]
fn test_parse_error_handling() {
    let mut parser = StreamParser::new();

    let chunk = b"event: run.started\ndata: {invalid json}\n\n";
    let events = parser.process(chunk);
    assert_eq!(events.len(), 0);
}

#[test]
fn test_tool_call_request_is_parsed() {
    let mut parser = StreamParser::new();

    let chunk = b"data: {\"eventType\":\"tool.call.requested\",\"runId\":\"run_1\",\"id\":\"tc1\",\"toolName\":\"read_file\",\"args\":{\"path\":\"src/\"},\"riskTier\":\"Medium\",\"requiresApproval\":false}\n\n";
    let events = parser.process(chunk);
    assert_eq!(events.len(), 1);

    match &events[0].payload {
        EventPayload::ToolCallRequested {
            id,
            tool_name,
            args,
            risk_tier,
            requires_approval,
        } => {
            assert_eq!(id, "tc1");
            assert_eq!(tool_name, "read_file");
            assert_eq!(args["path"], "src/");
            assert_eq!(*risk_tier, RiskTier::Medium);
            assert!(!requires_approval);
        }
        other => panic!("expected ToolCallRequested, got {other:?}"),
    }
}

#[test]
fn test_unknown_event_types_pass_through() {
    let mut parser = StreamParser::new();

    let chunk = b"data: {\"eventType\":\"run.heartbeat\",\"runId\":\"run_1\"}\n\n";
    let events = parser.process(chunk);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), EventKind::Unknown);
}

#[test]
fn test_several_frames_in_one_chunk_keep_order() {
    let mut parser = StreamParser::new();

    let chunk = concat!(
        ": keepalive\n\n",
        "data: {\"eventType\":\"llm.started\",\"runId\":\"run_1\"}\n\n",
        "data: {\"eventType\":\"llm.delta\",\"runId\":\"run_1\",\"delta\":\"a\"}\n\n",
        "data: {\"eventType\":\"llm.completed\",\"runId\":\"run_1\"}\n\n",
        "data: {\"eventType\":\"run.wait"
    );
    let kinds: Vec<_> = parser
        .process(chunk.as_bytes())
        .iter()
        .map(|event| event.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::LlmStarted,
            EventKind::LlmDelta,
            EventKind::LlmCompleted
        ]
    );
    assert_eq!(parser.flush(), "data: {\"eventType\":\"run.wait");
}
