//! Nero Tests - In-process multi-node harness.
//!
//! Spins real daemon cores (engine, routing table, content store) on
//! loopback listeners so integration tests can exercise the full peer
//! protocol without external processes.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod harness;
pub mod node;

pub use harness::TestNetwork;
pub use node::{TestNode, TestNodeConfig};
