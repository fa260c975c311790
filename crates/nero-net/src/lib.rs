//! Nero Net - Overlay-agnostic framed transport.
//!
//! The anonymity overlay hands the daemon opaque endpoint strings; this
//! crate turns them into listeners and connections carrying
//! length-prefixed frames. No TLS at this layer: the overlay provides
//! confidentiality.
//!
//! Endpoint strings: `unix:<path>` for local stream sockets, `tcp:<addr>`
//! or a bare `host:port` for TCP.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod framing;
pub mod transport;

pub use client::RpcClient;
pub use framing::{read_frame, write_frame, MAX_FRAME_SIZE};
pub use transport::{Connection, Listener, StreamTransport, Transport, TransportError};
