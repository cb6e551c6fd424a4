use super::run::RiskTier;
use crate::error::{Result, RunError};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Internal event discriminant. Wire tags are folded onto these at the
/// transport boundary; nothing past the parser looks at raw tag strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RunStarted,
    LlmStarted,
    LlmDelta,
    LlmCompleted,
    MessageUserCreated,
    MessageAssistantCreated,
    ToolCallRequested,
    ToolCallStarted,
    ToolCallCompleted,
    ApprovalRequested,
    ApprovalResolved,
    RunCompleted,
    RunFailed,
    RunWaitingInput,
    RunCancelled,
    ArtifactCreated,
    Unknown,
}

impl EventKind {
    /// Accepts any casing and punctuation: `run.started`, `RUN_STARTED` and
    /// `RunStarted` all map to [`EventKind::RunStarted`].
    pub fn from_wire(tag: &str) -> Self {
        match normalize_tag(tag).as_str() {
            "runstarted" => Self::RunStarted,
            "llmstarted" => Self::LlmStarted,
            "llmdelta" => Self::LlmDelta,
            "llmcompleted" => Self::LlmCompleted,
            "messageusercreated" => Self::MessageUserCreated,
            "messageassistantcreated" => Self::MessageAssistantCreated,
            "toolcallrequested" => Self::ToolCallRequested,
            "toolcallstarted" => Self::ToolCallStarted,
            "toolcallcompleted" => Self::ToolCallCompleted,
            "approvalrequested" => Self::ApprovalRequested,
            "approvalresolved" => Self::ApprovalResolved,
            "runcompleted" => Self::RunCompleted,
            "runfailed" => Self::RunFailed,
            "runwaitinginput" | "runwaitingforinput" => Self::RunWaitingInput,
            "runcancelled" | "runcanceled" => Self::RunCancelled,
            "artifactcreated" => Self::ArtifactCreated,
            _ => Self::Unknown,
        }
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    RunStarted,
    LlmStarted,
    LlmDelta {
        delta: String,
    },
    LlmCompleted,
    MessageUserCreated {
        id: String,
        content: String,
    },
    MessageAssistantCreated {
        id: String,
        content: String,
    },
    ToolCallRequested {
        id: String,
        tool_name: String,
        args: Value,
        risk_tier: RiskTier,
        requires_approval: bool,
    },
    ToolCallStarted,
    ToolCallCompleted {
        id: String,
        is_success: bool,
        result: Option<Value>,
        error: Option<String>,
    },
    ApprovalRequested {
        id: String,
        tool_call_id: String,
        tool_name: String,
        args: Value,
        risk_tier: RiskTier,
        step_id: Option<String>,
    },
    ApprovalResolved {
        id: String,
    },
    RunCompleted,
    RunFailed {
        error: String,
    },
    RunWaitingInput,
    RunCancelled,
    ArtifactCreated,
    /// Forward-compatibility escape hatch. Carries the raw tag for logging.
    Unknown {
        event_type: String,
    },
}

/// One normalized push event.
#[derive(Debug, Clone, PartialEq)]
pub struct RunEvent {
    pub run_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sequence: Option<u64>,
    pub payload: EventPayload,
}

impl RunEvent {
    pub fn new(run_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            run_id: Some(run_id.into()),
            timestamp: Utc::now(),
            sequence: None,
            payload,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::RunStarted => EventKind::RunStarted,
            EventPayload::LlmStarted => EventKind::LlmStarted,
            EventPayload::LlmDelta { .. } => EventKind::LlmDelta,
            EventPayload::LlmCompleted => EventKind::LlmCompleted,
            EventPayload::MessageUserCreated { .. } => EventKind::MessageUserCreated,
            EventPayload::MessageAssistantCreated { .. } => EventKind::MessageAssistantCreated,
            EventPayload::ToolCallRequested { .. } => EventKind::ToolCallRequested,
            EventPayload::ToolCallStarted => EventKind::ToolCallStarted,
            EventPayload::ToolCallCompleted { .. } => EventKind::ToolCallCompleted,
            EventPayload::ApprovalRequested { .. } => EventKind::ApprovalRequested,
            EventPayload::ApprovalResolved { .. } => EventKind::ApprovalResolved,
            EventPayload::RunCompleted => EventKind::RunCompleted,
            EventPayload::RunFailed { .. } => EventKind::RunFailed,
            EventPayload::RunWaitingInput => EventKind::RunWaitingInput,
            EventPayload::RunCancelled => EventKind::RunCancelled,
            EventPayload::ArtifactCreated => EventKind::ArtifactCreated,
            EventPayload::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// Decodes one wire object. `fallback_tag` is the SSE `event:` name and
    /// is used only when the object has no `eventType`.
    ///
    /// Unrecognized tags decode to [`EventPayload::Unknown`]; a recognized
    /// tag missing its required fields is a [`RunError::Data`].
    pub fn decode(value: Value, fallback_tag: Option<&str>) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(value.clone())
            .map_err(|error| RunError::Data(format!("invalid event envelope: {error}")))?;
        let event_type = envelope
            .event_type
            .or_else(|| fallback_tag.map(ToOwned::to_owned))
            .ok_or_else(|| RunError::Data("event has no eventType".to_string()))?;

        let kind = EventKind::from_wire(&event_type);
        let payload = match kind {
            EventKind::RunStarted => EventPayload::RunStarted,
            EventKind::LlmStarted => EventPayload::LlmStarted,
            EventKind::LlmDelta => {
                let fields: DeltaFields = decode_fields(value, &event_type)?;
                EventPayload::LlmDelta {
                    delta: fields.delta,
                }
            }
            EventKind::LlmCompleted => EventPayload::LlmCompleted,
            EventKind::MessageUserCreated => {
                let fields: MessageFields = decode_fields(value, &event_type)?;
                EventPayload::MessageUserCreated {
                    id: fields.id,
                    content: fields.content,
                }
            }
            EventKind::MessageAssistantCreated => {
                let fields: MessageFields = decode_fields(value, &event_type)?;
                EventPayload::MessageAssistantCreated {
                    id: fields.id,
                    content: fields.content,
                }
            }
            EventKind::ToolCallRequested => {
                let fields: ToolRequestFields = decode_fields(value, &event_type)?;
                EventPayload::ToolCallRequested {
                    id: fields.id,
                    tool_name: fields.tool_name,
                    args: fields.args,
                    risk_tier: fields.risk_tier,
                    requires_approval: fields.requires_approval,
                }
            }
            EventKind::ToolCallStarted => EventPayload::ToolCallStarted,
            EventKind::ToolCallCompleted => {
                let fields: ToolCompletedFields = decode_fields(value, &event_type)?;
                let is_success = fields.is_success.unwrap_or(fields.error.is_none());
                EventPayload::ToolCallCompleted {
                    id: fields.id,
                    is_success,
                    result: fields.result,
                    error: fields.error,
                }
            }
            EventKind::ApprovalRequested => {
                let fields: ApprovalFields = decode_fields(value, &event_type)?;
                EventPayload::ApprovalRequested {
                    id: fields.id,
                    tool_call_id: fields.tool_call_id,
                    tool_name: fields.tool_name,
                    args: fields.args,
                    risk_tier: fields.risk_tier,
                    step_id: fields.step_id,
                }
            }
            EventKind::ApprovalResolved => {
                let fields: IdFields = decode_fields(value, &event_type)?;
                EventPayload::ApprovalResolved { id: fields.id }
            }
            EventKind::RunCompleted => EventPayload::RunCompleted,
            EventKind::RunFailed => {
                let fields: FailedFields = decode_fields(value, &event_type)?;
                EventPayload::RunFailed {
                    error: fields
                        .error
                        .filter(|error| !error.trim().is_empty())
                        .unwrap_or_else(|| "run failed".to_string()),
                }
            }
            EventKind::RunWaitingInput => EventPayload::RunWaitingInput,
            EventKind::RunCancelled => EventPayload::RunCancelled,
            EventKind::ArtifactCreated => EventPayload::ArtifactCreated,
            EventKind::Unknown => EventPayload::Unknown { event_type },
        };

        Ok(Self {
            run_id: envelope.run_id,
            timestamp: envelope
                .timestamp
                .as_ref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            sequence: envelope.sequence,
            payload,
        })
    }
}

fn decode_fields<T: DeserializeOwned>(value: Value, event_type: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|error| RunError::Data(format!("{event_type}: {error}")))
}

/// RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc)),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default, alias = "event_type")]
    event_type: Option<String>,
    #[serde(default, alias = "run_id")]
    run_id: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default, alias = "seq")]
    sequence: Option<u64>,
}

#[derive(Deserialize)]
struct DeltaFields {
    delta: String,
}

#[derive(Deserialize)]
struct MessageFields {
    id: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolRequestFields {
    id: String,
    tool_name: String,
    #[serde(default, alias = "arguments")]
    args: Value,
    #[serde(default)]
    risk_tier: RiskTier,
    #[serde(default)]
    requires_approval: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCompletedFields {
    id: String,
    #[serde(default)]
    is_success: Option<bool>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalFields {
    id: String,
    tool_call_id: String,
    tool_name: String,
    #[serde(default, alias = "originalArgs")]
    args: Value,
    #[serde(default)]
    risk_tier: RiskTier,
    #[serde(default)]
    step_id: Option<String>,
}

#[derive(Deserialize)]
struct IdFields {
    id: String,
}

#[derive(Deserialize)]
struct FailedFields {
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_normalization_ignores_case_and_punctuation() {
        for tag in ["run.started", "RunStarted", "RUN_STARTED", "run-started"] {
            assert_eq!(EventKind::from_wire(tag), EventKind::RunStarted, "{tag}");
        }
        assert_eq!(
            EventKind::from_wire("message.assistant.created"),
            EventKind::MessageAssistantCreated
        );
        assert_eq!(
            EventKind::from_wire("run.waiting_input"),
            EventKind::RunWaitingInput
        );
        assert_eq!(EventKind::from_wire("some.future.event"), EventKind::Unknown);
    }

    #[test]
    fn test_decode_tool_call_requested() {
        let event = RunEvent::decode(
            json!({
                "eventType": "tool_call.requested",
                "runId": "run_1",
                "timestamp": "2026-01-02T03:04:05Z",
                "sequence": 7,
                "id": "t1",
                "toolName": "write_file",
                "args": {"path": "a.txt"},
                "riskTier": "High",
                "requiresApproval": true
            }),
            None,
        )
        .unwrap();

        assert_eq!(event.run_id.as_deref(), Some("run_1"));
        assert_eq!(event.sequence, Some(7));
        assert_eq!(event.timestamp.to_rfc3339(), "2026-01-02T03:04:05+00:00");
        assert_eq!(
            event.payload,
            EventPayload::ToolCallRequested {
                id: "t1".to_string(),
                tool_name: "write_file".to_string(),
                args: json!({"path": "a.txt"}),
                risk_tier: RiskTier::High,
                requires_approval: true,
            }
        );
    }

    #[test]
    fn test_decode_uses_sse_event_name_when_tag_missing() {
        let event = RunEvent::decode(json!({"runId": "r", "delta": "Hi"}), Some("llm.delta"))
            .unwrap();
        assert_eq!(
            event.payload,
            EventPayload::LlmDelta {
                delta: "Hi".to_string()
            }
        );
    }

    #[test]
    fn test_decode_unknown_tag_is_not_an_error() {
        let event = RunEvent::decode(json!({"eventType": "some.future.event"}), None).unwrap();
        assert_eq!(event.kind(), EventKind::Unknown);
        assert!(event.run_id.is_none());
    }

    #[test]
    fn test_decode_missing_required_field_is_data_error() {
        let error = RunEvent::decode(json!({"eventType": "approval.resolved"}), None)
            .unwrap_err();
        assert!(matches!(error, RunError::Data(_)));

        let error = RunEvent::decode(json!({"runId": "r"}), None).unwrap_err();
        assert!(matches!(error, RunError::Data(_)));
    }

    #[test]
    fn test_tool_completion_success_defaults_from_error_presence() {
        let event = RunEvent::decode(
            json!({"eventType": "ToolCallCompleted", "id": "t1", "error": "boom"}),
            None,
        )
        .unwrap();
        match event.payload {
            EventPayload::ToolCallCompleted { is_success, error, .. } => {
                assert!(!is_success);
                assert_eq!(error.as_deref(), Some("boom"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_epoch_millis_timestamp() {
        let event = RunEvent::decode(
            json!({"eventType": "run.started", "timestamp": 1_700_000_000_000_i64}),
            None,
        )
        .unwrap();
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
    }
}
