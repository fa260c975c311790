//! Routing table contacts and their liveness state.

use std::time::{Duration, Instant};

use nero_core::{NodeId, CONTACT_IDLE_SECS, MAX_CONTACT_FAILURES};
use nero_proto::ContactInfo;

/// Liveness state of a contact.
///
/// A contact is born probing, becomes active on its first response,
/// drifts to inactive when idle, and dies after consecutive failures.
/// Any response revives an inactive contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactState {
    /// Observed but never yet responded.
    Probing,
    /// Responded recently.
    Active,
    /// Responsive in the past but idle beyond the activity window.
    Inactive,
    /// Failed too many consecutive RPCs.
    Dead,
}

impl ContactState {
    /// Numeric form used in status reporting.
    pub fn code(&self) -> u8 {
        match self {
            ContactState::Probing => 0,
            ContactState::Active => 1,
            ContactState::Inactive => 2,
            ContactState::Dead => 3,
        }
    }
}

/// A known peer: identity, endpoint and liveness bookkeeping.
#[derive(Debug, Clone)]
pub struct Contact {
    /// Node id.
    pub id: NodeId,
    /// Opaque endpoint string accepted by the transport.
    pub endpoint: String,
    /// When the contact last communicated with us.
    pub last_seen: Instant,
    /// Consecutive failed RPCs.
    pub failures: u32,
    /// Whether the contact has ever responded.
    pub responded: bool,
}

impl Contact {
    /// Creates a contact in the probing state.
    pub fn new(id: NodeId, endpoint: impl Into<String>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            last_seen: Instant::now(),
            failures: 0,
            responded: false,
        }
    }

    /// Creates a contact from its wire form.
    pub fn from_info(info: &ContactInfo) -> Self {
        Self::new(info.id, info.endpoint.clone())
    }

    /// Returns the wire form of this contact.
    pub fn info(&self) -> ContactInfo {
        ContactInfo {
            id: self.id,
            endpoint: self.endpoint.clone(),
        }
    }

    /// Records a successful communication.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.failures = 0;
        self.responded = true;
    }

    /// Records a failed RPC.
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Time since the last communication.
    pub fn idle(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Returns the current liveness state.
    pub fn state(&self) -> ContactState {
        if self.failures >= MAX_CONTACT_FAILURES {
            ContactState::Dead
        } else if !self.responded {
            ContactState::Probing
        } else if self.idle() > Duration::from_secs(CONTACT_IDLE_SECS) {
            ContactState::Inactive
        } else {
            ContactState::Active
        }
    }

    /// Returns true when the contact has failed out of the table.
    pub fn is_dead(&self) -> bool {
        self.state() == ContactState::Dead
    }
}
