//! Wire envelope exchanged over the stream socket
//!
//! Every message in both directions is a JSON object
//! `{type, state, info?, data?}`. The `state` field carries the correlation
//! id for request/acknowledgement pairs and is the empty string on
//! server-initiated pushes.

use serde::{Deserialize, Serialize};

/// Message type discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Subscribe to topics (client request)
    Sub,
    /// Unsubscribe from topics (client request)
    Unsub,
    /// Server greeting after open
    Hello,
    /// Server-initiated graceful close
    Goodbye,
    /// Acknowledgement of a correlated request
    Ack,
    /// Pushed stream data
    Event,
    /// Any type this client does not recognize
    Unknown,
}

impl EnvelopeKind {
    /// The wire name of this message type
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Sub => "sub",
            EnvelopeKind::Unsub => "unsub",
            EnvelopeKind::Hello => "hello",
            EnvelopeKind::Goodbye => "goodbye",
            EnvelopeKind::Ack => "ack",
            EnvelopeKind::Event => "event",
            EnvelopeKind::Unknown => "unknown",
        }
    }

    fn from_wire(name: &str) -> Self {
        match name {
            "sub" => EnvelopeKind::Sub,
            "unsub" => EnvelopeKind::Unsub,
            "hello" => EnvelopeKind::Hello,
            "goodbye" => EnvelopeKind::Goodbye,
            "ack" => EnvelopeKind::Ack,
            "event" => EnvelopeKind::Event,
            _ => EnvelopeKind::Unknown,
        }
    }
}

impl Serialize for EnvelopeKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnvelopeKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EnvelopeKind::from_wire(&name))
    }
}

/// Topic and reference details carried by an envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeInfo {
    /// Opaque reference supplied by the server
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Topics affected by a subscription change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
}

/// The JSON message unit exchanged over the socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Correlation id, empty when the message is not a correlated request
    #[serde(default)]
    pub state: String,
    /// Topic/reference details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<EnvelopeInfo>,
    /// Message payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    /// Create an envelope with no correlation id or payload
    pub fn new(kind: EnvelopeKind) -> Self {
        Self {
            kind,
            state: String::new(),
            info: None,
            data: None,
        }
    }

    /// Build a subscribe request for the given topics
    pub fn sub(topics: Vec<String>) -> Self {
        Self {
            info: Some(EnvelopeInfo {
                reference: None,
                topics: Some(topics),
            }),
            ..Self::new(EnvelopeKind::Sub)
        }
    }

    /// Build an unsubscribe request for the given topics
    pub fn unsub(topics: Vec<String>) -> Self {
        Self {
            info: Some(EnvelopeInfo {
                reference: None,
                topics: Some(topics),
            }),
            ..Self::new(EnvelopeKind::Unsub)
        }
    }

    /// Whether this envelope carries a correlation id
    pub fn is_correlated(&self) -> bool {
        !self.state.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_envelope_shape() {
        let mut envelope = Envelope::sub(vec!["alerts".to_string(), "ticks".to_string()]);
        envelope.state = "7".to_string();
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"type\":\"sub\""));
        assert!(json.contains("\"state\":\"7\""));
        assert!(json.contains("\"topics\":[\"alerts\",\"ticks\"]"));
        assert!(!json.contains("\"data\""));
        assert!(!json.contains("\"ref\""));
    }

    #[test]
    fn test_unsub_envelope_kind() {
        let envelope = Envelope::unsub(vec!["alerts".to_string()]);
        assert_eq!(envelope.kind, EnvelopeKind::Unsub);
        assert!(!envelope.is_correlated());
    }

    #[test]
    fn test_inbound_event_parse() {
        let json = r#"{"type":"event","state":"","info":{"ref":"r1","topics":["ticks"]},"data":{"price":42}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Event);
        assert!(!envelope.is_correlated());
        let info = envelope.info.unwrap();
        assert_eq!(info.reference.as_deref(), Some("r1"));
        assert_eq!(info.topics.unwrap(), vec!["ticks".to_string()]);
        assert_eq!(envelope.data.unwrap()["price"], 42);
    }

    #[test]
    fn test_missing_state_defaults_to_empty() {
        let json = r#"{"type":"hello"}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Hello);
        assert_eq!(envelope.state, "");
        assert!(envelope.info.is_none());
    }

    #[test]
    fn test_unrecognized_type_maps_to_unknown() {
        let json = r#"{"type":"telemetry","state":""}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Unknown);
    }

    #[test]
    fn test_ack_parse() {
        let json = r#"{"type":"ack","state":"12"}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Ack);
        assert!(envelope.is_correlated());
        assert_eq!(envelope.state, "12");
    }
}
