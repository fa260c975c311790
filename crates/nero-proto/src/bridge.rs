//! Client bridge request/response types.
//!
//! Clients speak newline-delimited JSON to the daemon over a local
//! stream socket: one request object per line, one response object per
//! line, correlated by `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nero_core::NodeId;

/// A bridge request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Client-chosen correlation id.
    pub id: u64,
    /// Method name: put, get, remove, map, search, status or clear.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// A bridge response: either `response` or `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResponse {
    /// Echo of the request id.
    pub id: u64,
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BridgeError>,
}

impl BridgeResponse {
    /// Builds a success response.
    pub fn ok(id: u64, response: Value) -> Self {
        Self {
            id,
            response: Some(response),
            error: None,
        }
    }

    /// Builds an error response.
    pub fn err(id: u64, code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            response: None,
            error: Some(BridgeError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Structured bridge error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeError {
    /// Machine-readable error kind.
    pub code: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

/// Error kinds surfaced across the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Key absent after exhaustive lookup.
    NotFound,
    /// Record fails validation (hash, schema, signature).
    Invalid,
    /// TTL passed.
    Expired,
    /// Worker pool saturated; retry with backoff.
    Busy,
    /// Deadline exceeded.
    Timeout,
    /// Endpoint unreachable.
    Transport,
    /// Local disk or index failure.
    Storage,
}

/// Daemon status summary, returned by the `status` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Contacts currently held in the routing table.
    pub connected_peers: usize,
    /// Contacts seen within the activity window.
    pub active_peers: usize,
    /// Contacts idle past the activity window.
    pub idle_peers: usize,
    /// Records in the content store.
    pub data_count: usize,
    /// Bytes of record values held in memory.
    pub data_ram_usage: usize,
    /// The daemon's own overlay endpoint.
    pub host: String,
    /// Per-peer detail, ordered by distance to self.
    pub peers: Vec<PeerStatusInfo>,
}

/// Per-peer entry in the status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatusInfo {
    /// Peer node id.
    pub id: NodeId,
    /// Peer endpoint.
    pub endpoint: String,
    /// Contact state code: 0 probing, 1 active, 2 inactive, 3 dead.
    /// Dead contacts are evicted before reporting, so they do not
    /// normally appear.
    pub status: u8,
    /// Bucket index of the peer relative to self.
    pub distance: u32,
}
