//! Nero Store - Persistent daemon state.
//!
//! Provides the on-disk layout under the data directory:
//! - `data.sqlite3` - mappings index plus cart and favorites tables
//! - `store/` - content-addressed record blobs, file name = record key hex
//! - `keys/` - RSA keypair files owned by the external wallet (read-only
//!   from the core's point of view)

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod blobs;
pub mod config;
pub mod keys;
pub mod mappings;

pub use blobs::RecordBlobs;
pub use config::DataLayout;
pub use keys::{read_keypair, KeyPair};
pub use mappings::{MappingRow, MappingsIndex};

use thiserror::Error;

/// Errors from persistent storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error.
    #[error("index error: {0}")]
    Index(#[from] rusqlite::Error),

    /// A record blob failed to parse or verify.
    #[error("corrupt record blob: {0}")]
    CorruptBlob(String),

    /// Record serialization failed.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
