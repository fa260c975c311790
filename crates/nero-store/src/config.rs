//! Data directory layout.

use std::path::{Path, PathBuf};

/// Paths of the daemon's persistent state under one data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    /// Base data directory.
    pub data_dir: PathBuf,
}

impl DataLayout {
    /// Creates a layout rooted at the given directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Path of the SQLite index.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("data.sqlite3")
    }

    /// Directory of content-addressed record blobs.
    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    /// Directory of RSA keypair files.
    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    /// Path of the client bridge socket.
    pub fn bridge_socket(&self) -> PathBuf {
        self.data_dir.join("neromon.sock")
    }

    /// Creates the directory tree.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.records_dir())?;
        std::fs::create_dir_all(self.keys_dir())?;
        Ok(())
    }
}

impl AsRef<Path> for DataLayout {
    fn as_ref(&self) -> &Path {
        &self.data_dir
    }
}
