//! Nero Core - Identifier types and key derivation for the neromon DHT.
//!
//! This crate provides:
//! - `NodeId` - 160-bit routing identity derived from an overlay address
//! - `RecordKey` - 256-bit content hash identifying a stored record
//! - XOR distance metric and k-bucket indexing
//! - Shared protocol constants

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod id;

pub use id::{IdParseError, NodeId, RecordKey};

/// Peer protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u8 = 1;

/// Bucket size (k): replication factor and closest-set width.
pub const DEFAULT_K: usize = 20;

/// Lookup parallelism (alpha): concurrent queries per round.
pub const DEFAULT_ALPHA: usize = 3;

/// Number of k-buckets, one per bit of the identifier space.
pub const BUCKET_COUNT: usize = 160;

/// Consecutive RPC failures after which a contact is considered dead.
pub const MAX_CONTACT_FAILURES: u32 = 3;

/// Idle time after which an active contact becomes inactive (15 minutes).
pub const CONTACT_IDLE_SECS: u64 = 900;

/// Buckets untouched for this long are due for a refresh lookup (1 hour).
pub const BUCKET_STALE_SECS: u64 = 3600;

/// Per-RPC deadline in seconds.
pub const RPC_TIMEOUT_SECS: u64 = 5;

/// Whole-lookup deadline in seconds.
pub const LOOKUP_TIMEOUT_SECS: u64 = 20;

/// Default record TTL for ephemeral records (1 hour).
pub const DEFAULT_RECORD_TTL_SECS: u64 = 3600;

/// Maximum accepted record TTL (30 days).
pub const MAX_RECORD_TTL_SECS: u64 = 30 * 86400;

/// Maximum accepted record value size (4 MiB).
pub const MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;

/// Interval between republication passes (1 hour).
pub const REPUBLISH_INTERVAL_SECS: u64 = 3600;

/// Records not refreshed by any STORE for this long are expired (24 hours).
pub const RECORD_STALE_SECS: u64 = 86400;

/// Interval between expiry sweeps.
pub const EXPIRY_SWEEP_SECS: u64 = 60;

/// Concurrent peer RPCs allowed per remote endpoint.
pub const MAX_RPCS_PER_ENDPOINT: usize = 4;

/// Bridge worker pool size.
pub const BRIDGE_WORKERS: usize = 16;

/// Bridge request queue bound; excess requests are rejected with `busy`.
pub const BRIDGE_QUEUE_LIMIT: usize = 256;
