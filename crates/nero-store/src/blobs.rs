//! Content-addressed record blobs.
//!
//! Accepted records are mirrored to disk so a restarted daemon can
//! reseed its content store. One file per record under `store/`, named
//! by the record key hex.

use std::path::PathBuf;

use tracing::{debug, warn};

use nero_core::RecordKey;
use nero_proto::Record;

use crate::StoreError;

/// On-disk mirror of the content store.
#[derive(Debug, Clone)]
pub struct RecordBlobs {
    root: PathBuf,
}

impl RecordBlobs {
    /// Opens the blob directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &RecordKey) -> PathBuf {
        self.root.join(key.to_hex())
    }

    /// Writes a record blob.
    pub fn save(&self, record: &Record) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        std::fs::write(self.path_for(&record.key), bytes)?;
        debug!(key = %record.key, "record blob written");
        Ok(())
    }

    /// Deletes a record blob if present.
    pub fn delete(&self, key: &RecordKey) {
        let path = self.path_for(key);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "failed to delete record blob");
            }
        }
    }

    /// Loads every blob for startup reseeding.
    ///
    /// A blob that fails to parse, or whose file name does not match
    /// the content hash of its value, is corruption and aborts the
    /// load; the daemon treats that as fatal.
    pub fn load_all(&self) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let bytes = std::fs::read(&path)?;
            let record: Record = serde_json::from_slice(&bytes)
                .map_err(|_| StoreError::CorruptBlob(name.clone()))?;

            if record.key.to_hex() != name || !record.key_matches_value() {
                return Err(StoreError::CorruptBlob(name));
            }
            records.push(record);
        }

        debug!(count = records.len(), "record blobs loaded");
        Ok(records)
    }
}
