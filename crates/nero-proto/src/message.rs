//! Peer RPC envelope and message bodies.
//!
//! Every peer message is a JSON object with top-level fields `version`,
//! `type`, `id`, `sender` and `body`, carried in a length-prefixed frame
//! by the transport layer. Request and response share the envelope; the
//! `id` correlates them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use nero_core::{NodeId, RecordKey, PROTOCOL_VERSION};

use crate::record::Record;

/// Errors decoding a peer message.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame was not a valid message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The peer speaks a different protocol version.
    #[error("unsupported protocol version {0}")]
    Version(u8),
}

/// Identity of the message sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Sender node id.
    pub id: NodeId,
    /// Sender endpoint as the overlay names it.
    pub endpoint: String,
}

/// A routable peer, as carried in FIND_NODE / FIND_VALUE responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Node id.
    pub id: NodeId,
    /// Opaque endpoint string accepted by the transport.
    pub endpoint: String,
}

/// Message bodies, tagged by the top-level `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Payload {
    /// Liveness probe.
    Ping {},
    /// Liveness reply.
    Pong {},
    /// Request the k closest contacts to a target id.
    FindNode {
        /// Routing target.
        target: NodeId,
    },
    /// Closest-contacts reply to FIND_NODE, and to FIND_VALUE misses.
    Nodes {
        /// Contacts ordered by distance to the requested target.
        contacts: Vec<ContactInfo>,
    },
    /// Request a record by key.
    FindValue {
        /// Record key.
        key: RecordKey,
    },
    /// Value hit reply to FIND_VALUE.
    Value {
        /// The requested record.
        record: Record,
    },
    /// Ask the receiver to store a record.
    Store {
        /// The record to store.
        record: Record,
    },
    /// Reply to STORE.
    StoreResult {
        /// Whether the record was accepted.
        accepted: bool,
        /// Rejection reason when not accepted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Hint to add a local search mapping. May be rate-limited or ignored.
    Map {
        /// Search term to index under.
        search_term: String,
        /// Record key the term maps to.
        key: RecordKey,
        /// Content tag of the record.
        content: String,
    },
    /// Reply to MAP.
    MapResult {
        /// Whether the mapping was recorded.
        accepted: bool,
    },
}

impl Payload {
    /// Returns the wire name of this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Ping {} => "ping",
            Payload::Pong {} => "pong",
            Payload::FindNode { .. } => "find_node",
            Payload::Nodes { .. } => "nodes",
            Payload::FindValue { .. } => "find_value",
            Payload::Value { .. } => "value",
            Payload::Store { .. } => "store",
            Payload::StoreResult { .. } => "store_result",
            Payload::Map { .. } => "map",
            Payload::MapResult { .. } => "map_result",
        }
    }
}

/// The peer message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version, currently 1.
    pub version: u8,
    /// Request id; responses echo the request's id.
    pub id: u64,
    /// Sender identity and endpoint.
    pub sender: Sender,
    /// The message body.
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// Creates an envelope for the current protocol version.
    pub fn new(id: u64, sender: Sender, payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id,
            sender,
            payload,
        }
    }

    /// Creates the response envelope for this request.
    pub fn reply(&self, sender: Sender, payload: Payload) -> Self {
        Self::new(self.id, sender, payload)
    }

    /// Serializes to the JSON frame payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serialization of these types cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parses a frame payload, checking the protocol version.
    pub fn from_slice(data: &[u8]) -> Result<Self, WireError> {
        let envelope: Envelope = serde_json::from_slice(data)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(WireError::Version(envelope.version));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Sender {
        Sender {
            id: NodeId::from_identity("peer.onion:38081"),
            endpoint: "peer.onion:38081".to_string(),
        }
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope::new(42, sender(), Payload::Ping {});
        let bytes = envelope.to_bytes();
        let back = Envelope::from_slice(&bytes).unwrap();

        assert_eq!(back.id, 42);
        assert_eq!(back.sender, envelope.sender);
        assert!(matches!(back.payload, Payload::Ping {}));
    }

    #[test]
    fn test_wire_shape() {
        let envelope = Envelope::new(
            7,
            sender(),
            Payload::FindNode {
                target: NodeId::zero(),
            },
        );
        let json: serde_json::Value = serde_json::from_slice(&envelope.to_bytes()).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["id"], 7);
        assert_eq!(json["type"], "find_node");
        assert!(json["body"].is_object());
        assert!(json["sender"]["id"].is_string());
        assert!(json["sender"]["endpoint"].is_string());
    }

    #[test]
    fn test_ping_has_empty_body_object() {
        let envelope = Envelope::new(1, sender(), Payload::Ping {});
        let json: serde_json::Value = serde_json::from_slice(&envelope.to_bytes()).unwrap();
        assert_eq!(json["body"], serde_json::json!({}));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut envelope = Envelope::new(1, sender(), Payload::Pong {});
        envelope.version = 2;
        let bytes = serde_json::to_vec(&envelope).unwrap();

        assert!(matches!(
            Envelope::from_slice(&bytes),
            Err(WireError::Version(2))
        ));
    }

    #[test]
    fn test_store_roundtrip() {
        let record = Record::new("{\"metadata\":\"message\"}".to_string(), 3600, None);
        let envelope = Envelope::new(9, sender(), Payload::Store { record: record.clone() });
        let back = Envelope::from_slice(&envelope.to_bytes()).unwrap();

        match back.payload {
            Payload::Store { record: got } => assert_eq!(got, record),
            other => panic!("expected store, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_garbage_frame_is_malformed() {
        assert!(matches!(
            Envelope::from_slice(b"not json"),
            Err(WireError::Malformed(_))
        ));
    }
}
