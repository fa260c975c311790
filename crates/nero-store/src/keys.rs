//! Read access to wallet-owned RSA keypair files.
//!
//! The external wallet writes `keys/<address>.pub` / `keys/<address>.key`;
//! the core only ever reads them, to hand signature material to the
//! validation callback.

use std::path::Path;

use crate::StoreError;

/// PEM contents of one keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Public key PEM.
    pub public_pem: String,
    /// Private key PEM.
    pub private_pem: String,
}

/// Reads the keypair files for an address, if both are present.
pub fn read_keypair(keys_dir: &Path, address: &str) -> Result<Option<KeyPair>, StoreError> {
    let public_path = keys_dir.join(format!("{address}.pub"));
    let private_path = keys_dir.join(format!("{address}.key"));

    if !public_path.is_file() || !private_path.is_file() {
        return Ok(None);
    }

    Ok(Some(KeyPair {
        public_pem: std::fs::read_to_string(public_path)?,
        private_pem: std::fs::read_to_string(private_path)?,
    }))
}
