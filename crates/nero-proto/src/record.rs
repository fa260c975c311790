//! Stored record shape and content-addressing rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nero_core::{NodeId, RecordKey};

/// A content-addressed record as it travels on the wire and sits in the
/// content store.
///
/// Records are immutable in value: the key is the SHA3-256 of the value
/// bytes, so a STORE for an existing key must carry identical bytes or
/// be rejected. The value is opaque to routing; storage requires it to
/// parse as a UTF-8 JSON document with a `metadata` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Content hash identifying this record.
    pub key: RecordKey,
    /// The record value (a UTF-8 JSON document).
    pub value: String,
    /// Creation time (wall clock, ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Time to live in seconds from `timestamp`.
    pub ttl: u64,
    /// Node that published the record. Informational, not authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<NodeId>,
}

impl Record {
    /// Creates a record for a value, deriving its content key.
    pub fn new(value: String, ttl: u64, origin: Option<NodeId>) -> Self {
        let key = RecordKey::from_value(value.as_bytes());
        Self {
            key,
            value,
            timestamp: Utc::now(),
            ttl,
            origin,
        }
    }

    /// Returns true if the key matches the value's content hash.
    pub fn key_matches_value(&self) -> bool {
        self.key == RecordKey::from_value(self.value.as_bytes())
    }

    /// Returns the 160-bit routing key for this record.
    pub fn routing_id(&self) -> NodeId {
        self.key.routing_id()
    }

    /// Returns the value size in bytes.
    pub fn size(&self) -> usize {
        self.value.len()
    }
}
