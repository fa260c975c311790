//! Nero DHT - Kademlia routing, content storage and the protocol engine.
//!
//! Implements the daemon's networking core:
//! - k-bucketed routing table with XOR distance and a replacement cache
//! - validated content store with TTL, expiry and republication
//! - iterative lookup with bounded parallelism
//! - the peer RPC engine and its maintenance scheduler

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod contact;
pub mod engine;
pub mod lookup;
pub mod routing;
pub mod store;

pub use contact::{Contact, ContactState};
pub use engine::{Engine, EngineConfig, EngineError, MappingSink, RecordMirror};
pub use lookup::Lookup;
pub use routing::{ObserveOutcome, PendingEviction, RoutingTable, RoutingTableConfig};
pub use store::{ContentStore, ContentStoreConfig, PutOutcome, StoreRejected};
