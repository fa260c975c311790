//! Identifier types for the two hash widths in the system.
//!
//! Routing runs over a 160-bit space (`NodeId`, SHA-1 of the overlay
//! address), while records are content-addressed with a 256-bit hash
//! (`RecordKey`, SHA3-256 of the value bytes). The first 160 bits of a
//! record key form its routing key.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use sha3::Sha3_256;
use thiserror::Error;

use crate::BUCKET_COUNT;

/// Error parsing an identifier from its hex form.
#[derive(Debug, Error, PartialEq)]
pub enum IdParseError {
    /// Input was not valid hexadecimal.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Input decoded to the wrong number of bytes.
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength {
        /// Required byte length.
        expected: usize,
        /// Length actually decoded.
        actual: usize,
    },
}

/// Macro to define a fixed-width identifier type with common implementations.
///
/// Identifiers serialize as lowercase hex strings so they can travel in
/// JSON envelopes unchanged.
macro_rules! define_id_type {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Byte width of this identifier.
            pub const LEN: usize = $len;

            /// Creates a new identifier from a byte array.
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Creates a zero identifier.
            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            /// Returns the inner bytes.
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Returns the inner bytes as a slice.
            pub fn as_slice(&self) -> &[u8] {
                &self.0
            }

            /// Creates from a hex string.
            pub fn from_hex(s: &str) -> Result<Self, IdParseError> {
                let bytes = hex::decode(s)?;
                if bytes.len() != $len {
                    return Err(IdParseError::WrongLength {
                        expected: $len,
                        actual: bytes.len(),
                    });
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }

            /// Returns as a lowercase hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Computes the XOR distance to another identifier.
            pub fn xor_distance(&self, other: &Self) -> [u8; $len] {
                let mut result = [0u8; $len];
                for i in 0..$len {
                    result[i] = self.0[i] ^ other.0[i];
                }
                result
            }

            /// Returns the number of leading zero bits.
            pub fn leading_zeros(&self) -> u32 {
                let mut zeros = 0u32;
                for byte in &self.0 {
                    if *byte == 0 {
                        zeros += 8;
                    } else {
                        zeros += byte.leading_zeros();
                        break;
                    }
                }
                zeros
            }

            /// Generates a random identifier.
            pub fn random() -> Self {
                use rand::RngCore;
                let mut bytes = [0u8; $len];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl From<$name> for [u8; $len] {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(D::Error::custom)
            }
        }
    };
}

define_id_type!(
    /// 160-bit routing identity, derived as SHA-1 of the overlay address.
    ///
    /// Equality, XOR distance and bit-prefix length are the only
    /// operations the routing layer performs on node ids.
    NodeId,
    20
);

define_id_type!(
    /// 256-bit record identity: SHA3-256 of the record value bytes.
    RecordKey,
    32
);

impl NodeId {
    /// Derives a node id from a stable overlay identity string.
    pub fn from_identity(identity: &str) -> Self {
        let digest = Sha1::digest(identity.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Returns the k-bucket index for `other` relative to `self`.
    ///
    /// The index is the position of the most significant set bit of the
    /// XOR distance, so bucket 159 holds the farthest half of the
    /// keyspace. Equal ids map to bucket 0.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let dist = self.xor_distance(other);
        let mut lz = 0usize;
        for byte in &dist {
            if *byte == 0 {
                lz += 8;
            } else {
                lz += byte.leading_zeros() as usize;
                break;
            }
        }
        if lz >= BUCKET_COUNT {
            0
        } else {
            BUCKET_COUNT - 1 - lz
        }
    }
}

impl RecordKey {
    /// Derives the content key for a record value.
    pub fn from_value(value: &[u8]) -> Self {
        let digest = Sha3_256::digest(value);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Returns the 160-bit routing key: the first 20 bytes of the
    /// content hash.
    pub fn routing_id(&self) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.0[..20]);
        NodeId(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_distance_identity() {
        let a = NodeId::random();
        assert_eq!(a.xor_distance(&a), [0u8; 20]);

        let b = NodeId::random();
        assert_eq!(a.xor_distance(&b), b.xor_distance(&a));
    }

    #[test]
    fn test_xor_triangle_identity() {
        // d(a,b) == d(a,c) XOR d(c,b) for the XOR metric.
        for _ in 0..16 {
            let a = NodeId::random();
            let b = NodeId::random();
            let c = NodeId::random();

            let ab = a.xor_distance(&b);
            let ac = a.xor_distance(&c);
            let cb = c.xor_distance(&b);

            let mut combined = [0u8; 20];
            for i in 0..20 {
                combined[i] = ac[i] ^ cb[i];
            }
            assert_eq!(ab, combined);
        }
    }

    #[test]
    fn test_distance_zero_iff_equal() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.xor_distance(&a), [0u8; 20]);
        if a != b {
            assert_ne!(a.xor_distance(&b), [0u8; 20]);
        }
    }

    #[test]
    fn test_bucket_index_msb_position() {
        let zero = NodeId::zero();

        let mut bytes = [0u8; 20];
        bytes[0] = 0x80;
        assert_eq!(zero.bucket_index(&NodeId::new(bytes)), 159);

        bytes = [0u8; 20];
        bytes[19] = 0x01;
        assert_eq!(zero.bucket_index(&NodeId::new(bytes)), 0);

        bytes = [0u8; 20];
        bytes[1] = 0x10;
        assert_eq!(zero.bucket_index(&NodeId::new(bytes)), 148);

        assert_eq!(zero.bucket_index(&zero), 0);
    }

    #[test]
    fn test_from_identity_stable() {
        let a = NodeId::from_identity("qnode3xkwpd7a.onion:38081");
        let b = NodeId::from_identity("qnode3xkwpd7a.onion:38081");
        assert_eq!(a, b);

        let c = NodeId::from_identity("qnode3xkwpd7a.onion:38082");
        assert_ne!(a, c);
    }

    #[test]
    fn test_record_key_from_value() {
        let key = RecordKey::from_value(b"{\"metadata\":\"listing\"}");
        assert_eq!(key, RecordKey::from_value(b"{\"metadata\":\"listing\"}"));
        assert_ne!(key, RecordKey::from_value(b"{\"metadata\":\"user\"}"));
    }

    #[test]
    fn test_routing_id_prefix() {
        let key = RecordKey::random();
        let routing = key.routing_id();
        assert_eq!(routing.as_slice(), &key.as_slice()[..20]);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = NodeId::random();
        assert_eq!(NodeId::from_hex(&id.to_hex()).unwrap(), id);

        let key = RecordKey::random();
        assert_eq!(RecordKey::from_hex(&key.to_hex()).unwrap(), key);

        assert!(matches!(
            NodeId::from_hex("abcd"),
            Err(IdParseError::WrongLength { expected: 20, actual: 2 })
        ));
    }

    #[test]
    fn test_serde_hex_form() {
        let id = NodeId::from_identity("bootstrap.local:38081");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));

        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
