//! JSON wire protocol for the document channel.
//!
//! Every frame is a UTF-8 JSON object tagged by `type`:
//! ```text
//! client → server   {"type":"heartbeat"}
//! client → server   {"type":"updateNote","payload":"<content>","version":<n>}
//! server → client   {"type":"updateNotification","payload":"<content>","version":<n>}
//! ```
//!
//! Anything that is not valid JSON, or whose `type` is not known to the
//! receiving side, decodes to a [`ProtocolError`] and is dropped by callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Messages a client sends on the document channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Keepalive
    Heartbeat,
    /// Whole-document replacement tagged with the sender's version
    UpdateNote { payload: String, version: u64 },
}

/// Messages the server relays to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Another participant's accepted content
    UpdateNotification { payload: String, version: u64 },
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl ClientMessage {
    pub fn update(payload: impl Into<String>, version: u64) -> Self {
        Self::UpdateNote {
            payload: payload.into(),
            version,
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a text frame received from a client.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode_tagged(text, &["heartbeat", "updateNote"])
    }
}

impl ServerMessage {
    pub fn notification(payload: impl Into<String>, version: u64) -> Self {
        Self::UpdateNotification {
            payload: payload.into(),
            version,
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a text frame received from the server.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode_tagged(text, &["updateNotification"])
    }
}

/// Two-step decode so that unknown-but-well-formed messages can be told apart
/// from garbage.
fn decode_tagged<T>(text: &str, known: &[&str]) -> Result<T, ProtocolError>
where
    T: serde::de::DeserializeOwned,
{
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let msg_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing `type` field".to_string()))?;

    if !known.contains(&msg_type) {
        return Err(ProtocolError::UnknownType(msg_type.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_wire_format() {
        assert_eq!(
            ClientMessage::Heartbeat.encode().unwrap(),
            r#"{"type":"heartbeat"}"#
        );
    }

    #[test]
    fn test_update_note_wire_format() {
        let msg = ClientMessage::update("abc", 1);
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"type":"updateNote","payload":"abc","version":1}"#
        );
    }

    #[test]
    fn test_update_notification_wire_format() {
        let msg = ServerMessage::notification("hello", 7);
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"type":"updateNotification","payload":"hello","version":7}"#
        );
    }

    #[test]
    fn test_decode_notification_with_extra_fields() {
        let text = r#"{"version":4,"payload":"x","type":"updateNotification","sender":"srv"}"#;
        assert_eq!(
            ServerMessage::decode(text).unwrap(),
            ServerMessage::notification("x", 4)
        );
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(
            ServerMessage::decode("not json at all"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_missing_type() {
        assert!(matches!(
            ServerMessage::decode(r#"{"payload":"x","version":1}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            ServerMessage::decode(r#"{"type":"presence","who":"bob"}"#),
            Err(ProtocolError::UnknownType("presence".to_string()))
        );
    }

    #[test]
    fn test_decode_known_type_bad_fields() {
        // Version must be a non-negative integer.
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"updateNotification","payload":"x","version":"one"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"updateNotification","version":2}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_server_does_not_accept_client_messages() {
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"heartbeat"}"#),
            Err(ProtocolError::UnknownType(_))
        ));
    }

    #[test]
    fn test_client_decode() {
        assert_eq!(
            ClientMessage::decode(r#"{"type":"heartbeat"}"#).unwrap(),
            ClientMessage::Heartbeat
        );
        assert_eq!(
            ClientMessage::decode(r#"{"type":"updateNote","payload":"","version":3}"#).unwrap(),
            ClientMessage::update("", 3)
        );
    }

    #[test]
    fn test_payload_escaping() {
        let content = "line one\n\"quoted\" \u{1F600}";
        let encoded = ClientMessage::update(content, 2).encode().unwrap();
        assert_eq!(
            ClientMessage::decode(&encoded).unwrap(),
            ClientMessage::update(content, 2)
        );
    }
}
