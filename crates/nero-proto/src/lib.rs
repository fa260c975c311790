//! Nero Protocol - Wire protocol and record definitions.
//!
//! This crate defines:
//! - The peer RPC envelope and message bodies (length-prefixed JSON)
//! - The stored record shape and its content-addressing rules
//! - Structural validators for the marketplace record tags
//! - The client bridge request/response types

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod bridge;
pub mod message;
pub mod record;
pub mod validate;

pub use bridge::{
    BridgeError, BridgeRequest, BridgeResponse, ErrorKind, PeerStatusInfo, StatusInfo,
};
pub use message::{ContactInfo, Envelope, Payload, Sender, WireError};
pub use record::Record;
pub use validate::{
    parse_tagged, RecordTag, RecordValidator, SignatureCheck, StructuralValidator,
    ValidationError,
};
