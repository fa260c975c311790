//! Outbound RPC client with a per-endpoint connection cache.
//!
//! Connections are request-scoped but reusable: after a successful
//! exchange the connection returns to a small per-endpoint pool.
//! Concurrency toward any single remote endpoint is bounded so one slow
//! peer cannot absorb the daemon's outbound capacity.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tracing::trace;

use nero_core::MAX_RPCS_PER_ENDPOINT;

use crate::transport::{Connection, Transport, TransportError};

struct PeerSlot {
    limiter: Semaphore,
    pool: Mutex<Vec<Box<dyn Connection>>>,
}

impl PeerSlot {
    fn new() -> Self {
        Self {
            limiter: Semaphore::new(MAX_RPCS_PER_ENDPOINT),
            pool: Mutex::new(Vec::new()),
        }
    }
}

/// Request/response client over a [`Transport`].
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    peers: DashMap<String, Arc<PeerSlot>>,
    rpc_timeout: Duration,
}

impl RpcClient {
    /// Creates a client with the given per-request deadline.
    pub fn new(transport: Arc<dyn Transport>, rpc_timeout: Duration) -> Self {
        Self {
            transport,
            peers: DashMap::new(),
            rpc_timeout,
        }
    }

    /// Sends one frame to an endpoint and waits for the response frame.
    pub async fn call(&self, endpoint: &str, frame: &[u8]) -> Result<Bytes, TransportError> {
        let slot = self
            .peers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(PeerSlot::new()))
            .clone();

        let _permit = slot
            .limiter
            .acquire()
            .await
            .map_err(|_| TransportError::Closed)?;

        timeout(self.rpc_timeout, self.exchange(&slot, endpoint, frame))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn exchange(
        &self,
        slot: &PeerSlot,
        endpoint: &str,
        frame: &[u8],
    ) -> Result<Bytes, TransportError> {
        // A pooled connection may have gone stale while idle; fall back
        // to a fresh dial instead of failing the request.
        if let Some(mut conn) = slot.pool.lock().await.pop() {
            match Self::roundtrip(&mut conn, frame).await {
                Ok(Some(response)) => {
                    self.park(slot, conn).await;
                    return Ok(response);
                }
                Ok(None) | Err(_) => {
                    trace!(endpoint, "pooled connection stale, redialing");
                }
            }
        }

        let mut conn = self.transport.dial(endpoint).await?;
        let response = Self::roundtrip(&mut conn, frame)
            .await?
            .ok_or(TransportError::Closed)?;
        self.park(slot, conn).await;
        Ok(response)
    }

    async fn roundtrip(
        conn: &mut Box<dyn Connection>,
        frame: &[u8],
    ) -> Result<Option<Bytes>, TransportError> {
        conn.send(frame).await?;
        conn.recv().await
    }

    async fn park(&self, slot: &PeerSlot, conn: Box<dyn Connection>) {
        let mut pool = slot.pool.lock().await;
        if pool.len() < MAX_RPCS_PER_ENDPOINT {
            pool.push(conn);
        }
    }

    /// Drops pooled connections for an endpoint.
    pub fn forget(&self, endpoint: &str) {
        self.peers.remove(endpoint);
    }
}
