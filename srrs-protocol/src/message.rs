//! Message envelope exchanged between TRC and SRRS.

use crate::error::ValidationError;
use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Message types.
///
/// Unrecognized type strings are kept as [`MessageType::Unknown`] so a receiver
/// can tell a well-formed message of an unsupported type from a malformed one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Handshake,
    Ping,
    State,
    Unknown(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Handshake => "handshake",
            MessageType::Ping => "ping",
            MessageType::State => "state",
            MessageType::Unknown(s) => s,
        }
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "handshake" => MessageType::Handshake,
            "ping" => MessageType::Ping,
            "state" => MessageType::State,
            _ => MessageType::Unknown(s),
        }
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Unknown(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique message identifier.
///
/// Opaque on the wire; identifiers generated locally are UUIDv7 strings, which
/// sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MessageType,

    pub message_id: MessageId,

    /// Id of the message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_payload"
    )]
    pub payload: Option<Value>,
}

/// Maps an explicit `null` payload to `None`.
fn deserialize_payload<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        v => Some(v),
    })
}

impl Message {
    /// Creates a message with a freshly generated id.
    pub fn new(msg_type: MessageType, payload: Option<Value>, parent_id: Option<MessageId>) -> Self {
        Self {
            msg_type,
            message_id: MessageId::generate(),
            parent_id,
            payload,
        }
    }

    /// Creates an initiating message (no parent).
    pub fn request(msg_type: MessageType, payload: Option<Value>) -> Self {
        Self::new(msg_type, payload, None)
    }

    /// Creates a reply to `parent` of the same type.
    pub fn reply_to(parent: &Message, payload: Option<Value>) -> Self {
        Self::new(
            parent.msg_type.clone(),
            payload,
            Some(parent.message_id.clone()),
        )
    }

    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// Handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub version: ProtocolVersion,

    /// Opaque session token supplied by TRC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Optional validation capability of request payloads.
///
/// The default implementation accepts everything, so payload types without
/// constraints only need an empty `impl`.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl Validate for () {}

impl Validate for Value {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization() {
        let msg = Message::request(MessageType::Ping, None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"ping""#));
        assert!(!json.contains("parent_id"));
        assert!(!json.contains("payload"));
    }

    #[test]
    fn test_message_roundtrip() {
        let parent = Message::request(MessageType::State, Some(json!({"command": "start"})));
        let reply = Message::reply_to(&parent, Some(json!({"turtles": {"T1": {}}})));

        let json = serde_json::to_string(&reply).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(decoded.parent_id.as_ref(), Some(&parent.message_id));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let raw = r#"{"type":"ping","message_id":"a","extra":1}"#;
        assert!(serde_json::from_str::<Message>(raw).is_err());
    }

    #[test]
    fn test_unknown_type_preserved() {
        let raw = r#"{"type":"teleport","message_id":"a"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.msg_type, MessageType::Unknown("teleport".to_string()));
        assert_eq!(msg.msg_type.to_string(), "teleport");
    }

    #[test]
    fn test_null_payload_is_absent() {
        let raw = r#"{"type":"ping","message_id":"a","payload":null}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert!(msg.payload.is_none());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| MessageId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_handshake_payload() {
        let hs: Handshake =
            serde_json::from_value(json!({"version": "1.3.0", "token": "secret"})).unwrap();
        assert_eq!(hs.version, ProtocolVersion::new(1, 3, 0));
        assert_eq!(hs.token.as_deref(), Some("secret"));

        let reply = Handshake {
            version: ProtocolVersion::new(1, 0, 0),
            token: None,
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"version": "1.0.0"})
        );
    }
}
