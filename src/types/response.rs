use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{DefaultOnNull, serde_as};

use crate::Result;
use crate::events::Event;
use crate::serde_helpers::StringFromAny;
use crate::ws::WsError;

/// Top-level inbound frame wrapper.
///
/// Every text frame received from the server is deserialized into this struct first;
/// `data` is then interpreted according to `type`.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    /// The frame type (e.g. `status_update`, `heartbeat`)
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Type-specific payload
    #[serde(default)]
    pub data: Value,
    /// Server timestamp exactly as sent. Its shape varies by server build and never
    /// affects delivery; see [`InboundMessage::sent_at`].
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl InboundMessage {
    /// Best-effort reading of `timestamp`.
    ///
    /// Accepts RFC 3339, a zone-less ISO-8601 local date-time (taken as UTC) and Unix
    /// milliseconds. Anything else yields `None`.
    #[must_use]
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match self.timestamp.as_ref()? {
            Value::String(text) => DateTime::parse_from_rfc3339(text)
                .map(|at| at.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|at| at.and_utc())
                }),
            Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        }
    }
}

/// Status change of a study or one of its entities.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde_as(as = "Option<StringFromAny>")]
    pub study_id: Option<String>,
    /// Kind of entity whose status changed (study, site, form, ...)
    pub entity_type: Option<String>,
    #[serde_as(as = "Option<StringFromAny>")]
    pub entity_id: Option<String>,
    pub status: Option<String>,
    pub previous_status: Option<String>,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A study entity was modified.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyUpdate {
    #[serde_as(as = "Option<StringFromAny>")]
    pub study_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A protocol version of a study was created or changed state.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionUpdate {
    #[serde_as(as = "Option<StringFromAny>")]
    pub study_id: Option<String>,
    #[serde_as(as = "Option<StringFromAny>")]
    pub version_id: Option<String>,
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A long-running server computation finished.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputationComplete {
    #[serde_as(as = "Option<StringFromAny>")]
    pub study_id: Option<String>,
    pub computation_type: Option<String>,
    /// Computed result, shape depends on `computation_type`
    pub result: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of a server-side validation run.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    #[serde_as(as = "Option<StringFromAny>")]
    pub study_id: Option<String>,
    #[serde(alias = "valid")]
    pub is_valid: Option<bool>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub errors: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Application error reported by the server (`type: "error"`). The connection stays open.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub message: Option<String>,
    #[serde_as(as = "Option<StringFromAny>")]
    pub code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of routing one inbound frame by its declared type.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Application event to deliver to listeners
    Event(Event),
    /// Server-initiated keep-alive, answered with `heartbeat_ack`
    Heartbeat,
    /// Server acknowledged one of our heartbeats
    HeartbeatAck,
    /// Informational acknowledgement of a `subscribe` frame
    SubscriptionConfirmed {
        topic: Option<String>,
    },
    /// Frame type this client does not recognise
    Unknown {
        msg_type: String,
    },
}

fn payload<T: DeserializeOwned + Default>(data: Value) -> Result<T> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data).map_err(|e| WsError::MessageParse(Arc::new(e)).into())
}

/// Parse one inbound text frame and map it to its semantic meaning.
///
/// Fails only when the frame is not a JSON object with a string `type`, or when the
/// `data` of a recognised type has the wrong shape. Unknown types are not errors.
pub fn parse_frame(bytes: &[u8]) -> Result<InboundFrame> {
    let message: InboundMessage =
        serde_json::from_slice(bytes).map_err(|e| WsError::MessageParse(Arc::new(e)))?;

    let frame = match message.msg_type.as_str() {
        "status_update" => InboundFrame::Event(Event::StatusUpdate(payload(message.data)?)),
        "study_update" => InboundFrame::Event(Event::StudyUpdate(payload(message.data)?)),
        "version_update" => InboundFrame::Event(Event::VersionUpdate(payload(message.data)?)),
        "computation_complete" => {
            InboundFrame::Event(Event::ComputationComplete(payload(message.data)?))
        }
        "validation_result" => {
            InboundFrame::Event(Event::ValidationResult(payload(message.data)?))
        }
        "error" => InboundFrame::Event(Event::ServerError(payload(message.data)?)),
        "heartbeat" => InboundFrame::Heartbeat,
        "heartbeat_ack" => InboundFrame::HeartbeatAck,
        "subscription_confirmed" => InboundFrame::SubscriptionConfirmed {
            topic: message
                .data
                .get("topic")
                .and_then(Value::as_str)
                .map(str::to_owned),
        },
        _ => InboundFrame::Unknown {
            msg_type: message.msg_type,
        },
    };

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Kind;

    fn parse(value: &Value) -> Result<InboundFrame> {
        parse_frame(value.to_string().as_bytes())
    }

    #[test]
    fn parses_status_update_with_numeric_study_id() {
        let frame = parse(&json!({
            "type": "status_update",
            "timestamp": "2025-01-01T00:00:00Z",
            "data": { "studyId": 42, "status": "ACTIVE", "previousStatus": "PLANNING", "changedBy": "ops" }
        }))
        .unwrap();

        let InboundFrame::Event(Event::StatusUpdate(update)) = frame else {
            panic!("expected status update");
        };
        assert_eq!(update.study_id.as_deref(), Some("42"));
        assert_eq!(update.status.as_deref(), Some("ACTIVE"));
        assert_eq!(update.previous_status.as_deref(), Some("PLANNING"));
        assert_eq!(update.extra.get("changedBy"), Some(&json!("ops")));
    }

    #[test]
    fn parses_computation_complete_result() {
        let frame = parse(&json!({
            "type": "computation_complete",
            "timestamp": 1_735_689_600_000_i64,
            "data": { "studyId": "7", "computationType": "STATUS", "result": { "status": "LOCKED" } }
        }))
        .unwrap();

        let InboundFrame::Event(Event::ComputationComplete(done)) = frame else {
            panic!("expected computation complete");
        };
        assert_eq!(done.computation_type.as_deref(), Some("STATUS"));
        assert_eq!(done.result, Some(json!({ "status": "LOCKED" })));
    }

    #[test]
    fn sent_at_reads_known_timestamp_shapes() {
        let read = |timestamp: Value| {
            serde_json::from_value::<InboundMessage>(json!({ "type": "x", "timestamp": timestamp }))
                .unwrap()
                .sent_at()
        };
        let expected = DateTime::from_timestamp_millis(1_735_732_800_123);

        assert_eq!(read(json!("2025-01-01T12:00:00.123Z")), expected);
        assert_eq!(read(json!("2025-01-01T12:00:00.123")), expected);
        assert_eq!(read(json!(1_735_732_800_123_i64)), expected);
        assert_eq!(read(json!([2025, 1, 1, 12, 0, 0])), None);
        assert_eq!(read(json!(1_735_732_800.123)), None);

        let missing: InboundMessage = serde_json::from_value(json!({ "type": "x" })).unwrap();
        assert!(missing.sent_at().is_none());
        assert!(missing.data.is_null());
    }

    #[test]
    fn any_timestamp_shape_still_delivers_the_event() {
        let shapes = [
            json!("2025-01-01T12:00:00.123"),
            json!(1_735_689_600.123),
            json!([2025, 1, 1, 12, 0, 0]),
            json!({ "epochSecond": 1_735_689_600 }),
            Value::Null,
        ];

        for timestamp in shapes {
            let frame = parse(&json!({
                "type": "status_update",
                "timestamp": timestamp.clone(),
                "data": { "studyId": 1 }
            }))
            .unwrap();

            let InboundFrame::Event(Event::StatusUpdate(update)) = frame else {
                panic!("expected status update for timestamp {timestamp}");
            };
            assert_eq!(update.study_id.as_deref(), Some("1"));
        }
    }

    #[test]
    fn validation_result_accepts_null_errors() {
        let frame = parse(&json!({
            "type": "validation_result",
            "data": { "studyId": "3", "isValid": true, "errors": null }
        }))
        .unwrap();

        let InboundFrame::Event(Event::ValidationResult(result)) = frame else {
            panic!("expected validation result");
        };
        assert_eq!(result.is_valid, Some(true));
        assert!(result.errors.is_empty());
    }

    #[test]
    fn validation_result_accepts_valid_alias() {
        let frame = parse(&json!({
            "type": "validation_result",
            "data": { "studyId": "3", "valid": false, "errors": ["missing visit"] }
        }))
        .unwrap();

        let InboundFrame::Event(Event::ValidationResult(result)) = frame else {
            panic!("expected validation result");
        };
        assert_eq!(result.is_valid, Some(false));
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn server_error_is_an_event() {
        let frame = parse(&json!({
            "type": "error",
            "data": { "message": "forbidden topic", "code": 403 }
        }))
        .unwrap();

        let InboundFrame::Event(Event::ServerError(error)) = frame else {
            panic!("expected server error");
        };
        assert_eq!(error.message.as_deref(), Some("forbidden topic"));
        assert_eq!(error.code.as_deref(), Some("403"));
    }

    #[test]
    fn missing_data_yields_empty_payload() {
        let frame = parse(&json!({ "type": "study_update" })).unwrap();

        assert!(matches!(
            frame,
            InboundFrame::Event(Event::StudyUpdate(ref update)) if *update == StudyUpdate::default()
        ));
    }

    #[test]
    fn keep_alive_and_confirmation_frames() {
        assert!(matches!(
            parse(&json!({ "type": "heartbeat" })).unwrap(),
            InboundFrame::Heartbeat
        ));
        assert!(matches!(
            parse(&json!({ "type": "heartbeat_ack" })).unwrap(),
            InboundFrame::HeartbeatAck
        ));

        let confirmed = parse(&json!({
            "type": "subscription_confirmed",
            "data": { "topic": "study.42" }
        }))
        .unwrap();
        assert!(matches!(
            confirmed,
            InboundFrame::SubscriptionConfirmed { topic: Some(ref t) } if t == "study.42"
        ));
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let frame = parse(&json!({ "type": "site_update", "data": {} })).unwrap();

        assert!(matches!(
            frame,
            InboundFrame::Unknown { ref msg_type } if msg_type == "site_update"
        ));
    }

    #[test]
    fn malformed_frames_are_websocket_errors() {
        for raw in [&b"not json"[..], &b"{\"data\":{}}"[..], &b"[1,2,3]"[..]] {
            let error = parse_frame(raw).unwrap_err();
            assert_eq!(error.kind(), Kind::WebSocket);
        }

        let wrong_shape = parse(&json!({ "type": "status_update", "data": "oops" })).unwrap_err();
        assert!(matches!(
            wrong_shape.downcast_ref::<WsError>(),
            Some(WsError::MessageParse(_))
        ));
    }
}
