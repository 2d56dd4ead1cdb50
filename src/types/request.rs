use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Outbound frame type.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutboundType {
    /// Forward the current credential; sent first on every successful open
    Authenticate,
    /// Start receiving events for a topic
    Subscribe,
    /// Stop receiving events for a topic
    Unsubscribe,
    /// Client-initiated keep-alive
    Heartbeat,
    /// Reply to a server-initiated keep-alive
    HeartbeatAck,
    /// Ask the server to recompute a study's status now
    RequestStatusComputation,
    /// Ask the server to report its health
    HealthCheck,
}

/// One frame written to the socket: `{ "type": ..., "timestamp": ..., ...fields }`.
///
/// # Security
///
/// An [`OutboundType::Authenticate`] frame carries the bearer token in plaintext once
/// serialized. Only send it over `wss://` and never log the serialized form.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct OutboundMessage {
    /// Frame type. Custom frames sent through [`crate::Client::send`] may use any string.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Time the frame was constructed
    pub timestamp: DateTime<Utc>,
    /// Additional, type-specific fields flattened into the frame
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OutboundMessage {
    /// Create a frame of arbitrary type.
    ///
    /// `data` is flattened into the frame when it is a JSON object. Any other value is
    /// carried under a `data` key. `type` and `timestamp` keys in `data` are discarded.
    #[must_use]
    pub fn new<T: Into<String>>(msg_type: T, data: Value) -> Self {
        let mut fields = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_owned(), other);
                map
            }
        };
        // The frame's own envelope keys always win over caller data.
        fields.remove("type");
        fields.remove("timestamp");

        Self {
            msg_type: msg_type.into(),
            timestamp: Utc::now(),
            fields,
        }
    }

    fn typed(msg_type: OutboundType, data: Value) -> Self {
        Self::new(msg_type.to_string(), data)
    }

    #[must_use]
    pub fn authenticate(token: &SecretString) -> Self {
        Self::typed(
            OutboundType::Authenticate,
            json!({ "token": token.expose_secret() }),
        )
    }

    #[must_use]
    pub fn subscribe(topic: &str) -> Self {
        Self::typed(OutboundType::Subscribe, json!({ "topic": topic }))
    }

    #[must_use]
    pub fn unsubscribe(topic: &str) -> Self {
        Self::typed(OutboundType::Unsubscribe, json!({ "topic": topic }))
    }

    #[must_use]
    pub fn heartbeat() -> Self {
        Self::typed(OutboundType::Heartbeat, Value::Null)
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::typed(OutboundType::HeartbeatAck, Value::Null)
    }

    #[must_use]
    pub fn request_status_computation(study_id: &str) -> Self {
        Self::typed(
            OutboundType::RequestStatusComputation,
            json!({ "studyId": study_id }),
        )
    }

    #[must_use]
    pub fn health_check() -> Self {
        Self::typed(OutboundType::HealthCheck, Value::Null)
    }

    /// Serialize to the JSON text written to the socket.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_value(message: &OutboundMessage) -> Value {
        serde_json::from_str(&message.to_json().unwrap()).unwrap()
    }

    #[test]
    fn subscribe_frame_shape() {
        let value = as_value(&OutboundMessage::subscribe("study.42.status"));

        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["topic"], "study.42.status");
        assert!(value["timestamp"].is_string(), "timestamp must be present");
    }

    #[test]
    fn authenticate_frame_exposes_token() {
        let token = SecretString::from("secret-token");
        let value = as_value(&OutboundMessage::authenticate(&token));

        assert_eq!(value["type"], "authenticate");
        assert_eq!(value["token"], "secret-token");
    }

    #[test]
    fn keep_alive_frames_carry_only_type_and_timestamp() {
        for (message, expected) in [
            (OutboundMessage::heartbeat(), "heartbeat"),
            (OutboundMessage::heartbeat_ack(), "heartbeat_ack"),
            (OutboundMessage::health_check(), "health_check"),
        ] {
            let value = as_value(&message);
            let object = value.as_object().unwrap();

            assert_eq!(value["type"], expected);
            assert_eq!(object.len(), 2, "unexpected fields in {expected}");
        }
    }

    #[test]
    fn request_status_computation_uses_camel_case_study_id() {
        let value = as_value(&OutboundMessage::request_status_computation("7"));

        assert_eq!(value["type"], "request_status_computation");
        assert_eq!(value["studyId"], "7");
    }

    #[test]
    fn custom_frame_flattens_object_and_wraps_scalars() {
        let object = as_value(&OutboundMessage::new("custom", json!({ "a": 1 })));
        let scalar = as_value(&OutboundMessage::new("custom", json!(5)));

        assert_eq!(object["a"], 1);
        assert_eq!(scalar["data"], 5);
    }

    #[test]
    fn custom_frame_cannot_override_envelope() {
        let value = as_value(&OutboundMessage::new(
            "custom",
            json!({ "type": "spoofed", "timestamp": 0 }),
        ));

        assert_eq!(value["type"], "custom");
        assert!(value["timestamp"].is_string(), "timestamp must be the frame's own");
    }

    #[test]
    fn outbound_type_display_matches_wire_name() {
        assert_eq!(
            OutboundType::RequestStatusComputation.to_string(),
            "request_status_computation"
        );
    }
}
