//! The peer protocol engine.
//!
//! Dispatches inbound RPCs, drives iterative lookups with bounded
//! parallelism, replicates accepted records toward the key's closest
//! contacts and runs the periodic maintenance pass. Collaborators the
//! daemon owns (record mirror, mappings index) are passed in as
//! interface handles.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use nero_core::{
    NodeId, RecordKey, BUCKET_STALE_SECS, CONTACT_IDLE_SECS, DEFAULT_ALPHA, DEFAULT_K,
    LOOKUP_TIMEOUT_SECS, RPC_TIMEOUT_SECS,
};
use nero_net::{Connection as _, Listener, RpcClient, Transport, TransportError};
use nero_proto::{
    ContactInfo, Envelope, Payload, PeerStatusInfo, Record, Sender, StatusInfo,
};

use crate::contact::{Contact, ContactState};
use crate::lookup::Lookup;
use crate::routing::{ObserveOutcome, RoutingTable, RoutingTableConfig};
use crate::store::{ContentStore, PutOutcome, StoreRejected};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Local node id.
    pub self_id: NodeId,
    /// Endpoint advertised to peers.
    pub endpoint: String,
    /// Closest-set width (k).
    pub k: usize,
    /// Lookup parallelism (alpha).
    pub alpha: usize,
    /// Per-RPC deadline.
    pub rpc_timeout: Duration,
    /// Whole-lookup deadline.
    pub lookup_timeout: Duration,
    /// Bucket refresh threshold.
    pub bucket_stale: Duration,
    /// Idle threshold for health pings.
    pub probe_idle: Duration,
}

impl EngineConfig {
    /// Creates a configuration with protocol defaults.
    pub fn new(self_id: NodeId, endpoint: impl Into<String>) -> Self {
        Self {
            self_id,
            endpoint: endpoint.into(),
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            rpc_timeout: Duration::from_secs(RPC_TIMEOUT_SECS),
            lookup_timeout: Duration::from_secs(LOOKUP_TIMEOUT_SECS),
            bucket_stale: Duration::from_secs(BUCKET_STALE_SECS),
            probe_idle: Duration::from_secs(CONTACT_IDLE_SECS),
        }
    }
}

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Key absent after an exhaustive lookup.
    #[error("record not found")]
    NotFound,

    /// The lookup deadline passed.
    #[error("lookup timed out")]
    Timeout,

    /// The record failed validation.
    #[error(transparent)]
    Rejected(#[from] StoreRejected),

    /// Transport failure talking to a peer.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A peer answered with something other than the expected response.
    #[error("unexpected response from peer")]
    UnexpectedResponse,
}

/// Persistence hook for accepted records, implemented by the daemon.
pub trait RecordMirror: Send + Sync {
    /// Called after a record is newly accepted.
    fn persist(&self, record: &Record);
    /// Called after a record is evicted or expired.
    fn purge(&self, key: &RecordKey);
}

/// Sink for inbound MAP hints, implemented by the daemon.
pub trait MappingSink: Send + Sync {
    /// Records a mapping; returns false when the hint is ignored.
    fn add(&self, search_term: &str, key: &RecordKey, content: &str) -> bool;
}

/// The Kademlia protocol engine.
pub struct Engine {
    config: EngineConfig,
    routing: RwLock<RoutingTable>,
    store: ContentStore,
    client: RpcClient,
    mirror: Option<Arc<dyn RecordMirror>>,
    mappings: Option<Arc<dyn MappingSink>>,
}

impl Engine {
    /// Creates an engine around its collaborators.
    pub fn new(config: EngineConfig, store: ContentStore, transport: Arc<dyn Transport>) -> Self {
        let routing = RoutingTable::new(
            config.self_id,
            RoutingTableConfig {
                k: config.k,
                cache_size: config.k,
            },
        );
        let client = RpcClient::new(transport, config.rpc_timeout);
        Self {
            config,
            routing: RwLock::new(routing),
            store,
            client,
            mirror: None,
            mappings: None,
        }
    }

    /// Installs the record persistence hook.
    pub fn with_mirror(mut self, mirror: Arc<dyn RecordMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Installs the mapping sink for inbound MAP hints.
    pub fn with_mapping_sink(mut self, sink: Arc<dyn MappingSink>) -> Self {
        self.mappings = Some(sink);
        self
    }

    /// Returns the local node id.
    pub fn self_id(&self) -> &NodeId {
        &self.config.self_id
    }

    /// Returns the content store.
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    fn sender(&self) -> Sender {
        Sender {
            id: self.config.self_id,
            endpoint: self.config.endpoint.clone(),
        }
    }

    fn closest_infos(&self, target: &NodeId, exclude: &NodeId) -> Vec<ContactInfo> {
        self.routing
            .read()
            .closest(target, self.config.k)
            .iter()
            .filter(|c| &c.id != exclude)
            .map(|c| c.info())
            .collect()
    }

    /// Records that a peer communicated with us, resolving full-bucket
    /// evictions with a liveness probe of the incumbent.
    pub fn observe(self: &Arc<Self>, contact: Contact) {
        let outcome = self.routing.write().observe(contact);
        if let ObserveOutcome::Full(pending) = outcome {
            let engine = self.clone();
            tokio::spawn(async move {
                let alive = engine.ping(&pending.oldest.endpoint).await;
                engine.routing.write().resolve_eviction(pending, alive);
            });
        }
    }

    fn note_failure(&self, id: &NodeId) {
        if self.routing.write().record_failure(id) {
            debug!(peer = %id, "contact evicted after repeated failures");
        }
    }

    // ---- inbound ----

    /// Handles one inbound frame, returning the response frame.
    pub fn handle_frame(self: &Arc<Self>, frame: &[u8]) -> Option<Vec<u8>> {
        match Envelope::from_slice(frame) {
            Ok(envelope) => self.handle_envelope(envelope).map(|e| e.to_bytes()),
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                None
            }
        }
    }

    /// Handles one inbound RPC envelope.
    ///
    /// Every RPC observes the sender. Response-typed payloads arriving
    /// on the server path are dropped.
    pub fn handle_envelope(self: &Arc<Self>, envelope: Envelope) -> Option<Envelope> {
        let sender_id = envelope.sender.id;
        self.observe(Contact::new(sender_id, envelope.sender.endpoint.clone()));
        trace!(peer = %sender_id, rpc = envelope.payload.type_name(), "inbound rpc");

        let payload = match &envelope.payload {
            Payload::Ping {} => Payload::Pong {},

            Payload::FindNode { target } => Payload::Nodes {
                contacts: self.closest_infos(target, &sender_id),
            },

            Payload::FindValue { key } => match self.store.get(key) {
                Some(record) => Payload::Value { record },
                None => Payload::Nodes {
                    contacts: self.closest_infos(&key.routing_id(), &sender_id),
                },
            },

            Payload::Store { record } => match self.store.put(record.clone()) {
                Ok(PutOutcome::Stored) => {
                    if let Some(mirror) = &self.mirror {
                        mirror.persist(record);
                    }
                    // First acceptance pushes the record onward so it
                    // settles on the key's closest nodes.
                    let engine = self.clone();
                    let record = record.clone();
                    tokio::spawn(async move {
                        engine.replicate(&record, Some(sender_id)).await;
                    });
                    Payload::StoreResult {
                        accepted: true,
                        reason: None,
                    }
                }
                Ok(PutOutcome::Refreshed) => Payload::StoreResult {
                    accepted: true,
                    reason: None,
                },
                Err(e) => Payload::StoreResult {
                    accepted: false,
                    reason: Some(e.to_string()),
                },
            },

            Payload::Map {
                search_term,
                key,
                content,
            } => {
                let accepted = self
                    .mappings
                    .as_ref()
                    .map(|sink| sink.add(search_term, key, content))
                    .unwrap_or(false);
                Payload::MapResult { accepted }
            }

            Payload::Pong {}
            | Payload::Nodes { .. }
            | Payload::Value { .. }
            | Payload::StoreResult { .. }
            | Payload::MapResult { .. } => return None,
        };

        Some(envelope.reply(self.sender(), payload))
    }

    /// Accept loop for a peer listener.
    ///
    /// Connection tasks are owned by the loop, so cancelling it also
    /// severs every established peer connection.
    pub async fn serve(self: Arc<Self>, mut listener: Box<dyn Listener>) {
        let mut connections = JoinSet::new();
        loop {
            while connections.try_join_next().is_some() {}

            match listener.accept().await {
                Ok(mut conn) => {
                    let engine = self.clone();
                    connections.spawn(async move {
                        while let Ok(Some(frame)) = conn.recv().await {
                            if let Some(response) = engine.handle_frame(&frame) {
                                if conn.send(&response).await.is_err() {
                                    break;
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    // ---- outbound ----

    async fn rpc(self: &Arc<Self>, endpoint: &str, payload: Payload) -> Result<Payload, EngineError> {
        let envelope = Envelope::new(rand::random(), self.sender(), payload);
        let response = self.client.call(endpoint, &envelope.to_bytes()).await?;

        let reply = Envelope::from_slice(&response).map_err(|_| EngineError::UnexpectedResponse)?;
        if reply.id != envelope.id {
            return Err(EngineError::UnexpectedResponse);
        }

        self.observe(Contact::new(reply.sender.id, reply.sender.endpoint.clone()));
        Ok(reply.payload)
    }

    /// Probes an endpoint for liveness.
    pub async fn ping(self: &Arc<Self>, endpoint: &str) -> bool {
        matches!(self.rpc(endpoint, Payload::Ping {}).await, Ok(Payload::Pong {}))
    }

    async fn store_to(self: &Arc<Self>, contact: &Contact, record: &Record) -> bool {
        let payload = Payload::Store {
            record: record.clone(),
        };
        match self.rpc(&contact.endpoint, payload).await {
            Ok(Payload::StoreResult { accepted, .. }) => accepted,
            _ => {
                self.note_failure(&contact.id);
                false
            }
        }
    }

    async fn store_at(self: &Arc<Self>, targets: Vec<Contact>, record: &Record) -> usize {
        let mut set = JoinSet::new();
        for contact in targets {
            let engine = self.clone();
            let record = record.clone();
            set.spawn(async move { engine.store_to(&contact, &record).await });
        }

        let mut accepted = 0;
        while let Some(result) = set.join_next().await {
            if matches!(result, Ok(true)) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Issues STOREs toward the k closest known contacts to the record's
    /// key. Returns the number of peers that accepted.
    pub async fn replicate(self: &Arc<Self>, record: &Record, exclude: Option<NodeId>) -> usize {
        let targets: Vec<Contact> = {
            self.routing
                .read()
                .closest(&record.routing_id(), self.config.k)
        }
        .into_iter()
        .filter(|c| Some(c.id) != exclude && Some(c.id) != record.origin)
        .collect();

        self.store_at(targets, record).await
    }

    /// Validates and stores a record locally, then places copies on the
    /// key's neighborhood.
    ///
    /// The neighborhood is located with an iterative lookup first, so
    /// the closest known contacts at STORE time are the closest nodes
    /// reachable in the network, not just whatever the table held.
    /// Returns the number of successful stores, the local one included.
    pub async fn publish(self: &Arc<Self>, record: Record) -> Result<usize, EngineError> {
        self.store.put(record.clone())?;
        if let Some(mirror) = &self.mirror {
            mirror.persist(&record);
        }

        let mut targets = self.iterative_find_node(record.routing_id()).await;
        if targets.is_empty() {
            targets = {
                self.routing
                    .read()
                    .closest(&record.routing_id(), self.config.k)
            };
        }

        let accepted = self.store_at(targets, &record).await;
        Ok(accepted + 1)
    }

    /// Local-only record eviction.
    pub fn remove_record(&self, key: &RecordKey) -> bool {
        let removed = self.store.remove(key);
        if removed {
            if let Some(mirror) = &self.mirror {
                mirror.purge(key);
            }
        }
        removed
    }

    // ---- iterative lookups ----

    /// Iteratively locates the k closest contacts to a target id.
    pub async fn iterative_find_node(self: &Arc<Self>, target: NodeId) -> Vec<Contact> {
        match timeout(self.config.lookup_timeout, self.find_node_inner(target)).await {
            Ok(contacts) => contacts,
            Err(_) => Vec::new(),
        }
    }

    async fn find_node_inner(self: &Arc<Self>, target: NodeId) -> Vec<Contact> {
        let seed = { self.routing.read().closest(&target, self.config.k) };
        let mut lookup = Lookup::new(target, seed, self.config.k, self.config.alpha);

        loop {
            let batch = lookup.next_batch();
            if batch.is_empty() {
                break;
            }

            let mut set = JoinSet::new();
            for contact in batch {
                let engine = self.clone();
                set.spawn(async move {
                    let result = engine
                        .rpc(&contact.endpoint, Payload::FindNode { target })
                        .await;
                    (contact, result)
                });
            }

            while let Some(joined) = set.join_next().await {
                let Ok((contact, result)) = joined else {
                    continue;
                };
                match result {
                    Ok(Payload::Nodes { contacts }) => {
                        lookup.on_response(&contact.id, self.to_candidates(contacts));
                    }
                    _ => {
                        self.note_failure(&contact.id);
                        lookup.on_failure(&contact.id);
                    }
                }
            }
        }

        debug!(target = %target, rounds = lookup.rounds(), "find_node converged");
        lookup.closest_responded(self.config.k)
    }

    /// Resolves a record: locally first, then via iterative lookup.
    ///
    /// On a hit the value is also offered to the nearest responders
    /// that did not hold it, so popular keys grow cached copies.
    pub async fn iterative_find_value(
        self: &Arc<Self>,
        key: &RecordKey,
    ) -> Result<Record, EngineError> {
        if let Some(record) = self.store.get(key) {
            return Ok(record);
        }
        match timeout(self.config.lookup_timeout, self.find_value_inner(key)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        }
    }

    async fn find_value_inner(self: &Arc<Self>, key: &RecordKey) -> Result<Record, EngineError> {
        let target = key.routing_id();
        let seed = { self.routing.read().closest(&target, self.config.k) };
        let mut lookup = Lookup::new(target, seed, self.config.k, self.config.alpha);
        let mut without_value: Vec<Contact> = Vec::new();

        loop {
            let batch = lookup.next_batch();
            if batch.is_empty() {
                return Err(EngineError::NotFound);
            }

            let mut set = JoinSet::new();
            for contact in batch {
                let engine = self.clone();
                let key = *key;
                set.spawn(async move {
                    let result = engine
                        .rpc(&contact.endpoint, Payload::FindValue { key })
                        .await;
                    (contact, result)
                });
            }

            while let Some(joined) = set.join_next().await {
                let Ok((contact, result)) = joined else {
                    continue;
                };
                match result {
                    Ok(Payload::Value { record })
                        if record.key == *key && record.key_matches_value() =>
                    {
                        set.abort_all();
                        self.cache_at_nearest(&record, &target, &mut without_value);
                        debug!(key = %key, rounds = lookup.rounds(), "value found");
                        return Ok(record);
                    }
                    Ok(Payload::Value { .. }) => {
                        // A forged value counts as a failure.
                        self.note_failure(&contact.id);
                        lookup.on_failure(&contact.id);
                    }
                    Ok(Payload::Nodes { contacts }) => {
                        without_value.push(contact.clone());
                        lookup.on_response(&contact.id, self.to_candidates(contacts));
                    }
                    _ => {
                        self.note_failure(&contact.id);
                        lookup.on_failure(&contact.id);
                    }
                }
            }
        }
    }

    fn to_candidates(&self, infos: Vec<ContactInfo>) -> Vec<Contact> {
        infos
            .iter()
            .filter(|info| info.id != self.config.self_id)
            .map(Contact::from_info)
            .collect()
    }

    /// Offers a found value to the nearest responders that missed it.
    fn cache_at_nearest(
        self: &Arc<Self>,
        record: &Record,
        target: &NodeId,
        without_value: &mut Vec<Contact>,
    ) {
        without_value.sort_by(|a, b| {
            a.id.xor_distance(target).cmp(&b.id.xor_distance(target))
        });
        for contact in without_value.iter().take(self.config.k.saturating_sub(1)) {
            let engine = self.clone();
            let contact = contact.clone();
            let record = record.clone();
            tokio::spawn(async move {
                engine.store_to(&contact, &record).await;
            });
        }
    }

    // ---- bootstrap & maintenance ----

    /// Contacts the given endpoints and populates the routing table
    /// with the neighborhood around our own id.
    pub async fn bootstrap(self: &Arc<Self>, endpoints: &[String]) -> usize {
        let mut reached = 0;
        for endpoint in endpoints {
            if self.ping(endpoint).await {
                reached += 1;
            } else {
                warn!(endpoint = %endpoint, "bootstrap endpoint unreachable");
            }
        }
        if reached > 0 {
            let found = self.iterative_find_node(self.config.self_id).await;
            debug!(contacts = found.len(), "bootstrap lookup finished");
        }
        reached
    }

    /// One pass of the maintenance scheduler: expiry sweep,
    /// republication, bucket refresh and health pings.
    pub async fn maintenance_tick(self: &Arc<Self>) {
        // Expiry sweep.
        for key in self.store.sweep_expired() {
            if let Some(mirror) = &self.mirror {
                mirror.purge(&key);
            }
        }

        // Republication of due records. Republishing one of our own
        // records refreshes the local copy too; peers are refreshed by
        // the STOREs themselves.
        for record in self.store.due_for_republish() {
            if record.origin == Some(self.config.self_id) {
                self.store.touch(&record.key);
            }
            let engine = self.clone();
            tokio::spawn(async move {
                let accepted = engine.replicate(&record, None).await;
                trace!(key = %record.key, accepted, "record republished");
            });
        }

        // Refresh stale buckets with a lookup on a random id inside them.
        let stale = { self.routing.read().stale_buckets(self.config.bucket_stale) };
        for idx in stale {
            let target = {
                let mut routing = self.routing.write();
                routing.mark_refreshed(idx);
                routing.random_id_in_bucket(idx)
            };
            let engine = self.clone();
            tokio::spawn(async move {
                engine.iterative_find_node(target).await;
            });
        }

        // Health-ping the longest-idle contact of each bucket.
        let idle = { self.routing.read().longest_idle(self.config.probe_idle) };
        for contact in idle {
            let engine = self.clone();
            tokio::spawn(async move {
                if !engine.ping(&contact.endpoint).await {
                    engine.note_failure(&contact.id);
                }
            });
        }
    }

    // ---- introspection ----

    /// Builds the status summary for the bridge.
    pub fn status(&self) -> StatusInfo {
        let routing = self.routing.read();
        let self_id = *routing.self_id();

        let mut contacts = routing.contacts();
        contacts.sort_by(|a, b| {
            a.id.xor_distance(&self_id).cmp(&b.id.xor_distance(&self_id))
        });

        let active = contacts
            .iter()
            .filter(|c| c.state() == ContactState::Active)
            .count();
        let idle = contacts
            .iter()
            .filter(|c| c.state() == ContactState::Inactive)
            .count();

        let peers = contacts
            .iter()
            .map(|c| PeerStatusInfo {
                id: c.id,
                endpoint: c.endpoint.clone(),
                status: c.state().code(),
                distance: self_id.bucket_index(&c.id) as u32,
            })
            .collect();

        StatusInfo {
            connected_peers: contacts.len(),
            active_peers: active,
            idle_peers: idle,
            data_count: self.store.len(),
            data_ram_usage: self.store.value_bytes(),
            host: self.config.endpoint.clone(),
            peers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ContentStoreConfig;
    use nero_net::StreamTransport;
    use serde_json::json;

    fn engine() -> Arc<Engine> {
        let self_id = NodeId::from_identity("self.onion:38081");
        let config = EngineConfig::new(self_id, "self.onion:38081");
        let store = ContentStore::new(ContentStoreConfig::default());
        Arc::new(Engine::new(config, store, Arc::new(StreamTransport::new())))
    }

    fn peer_envelope(payload: Payload) -> Envelope {
        let id = NodeId::from_identity("peer.onion:38081");
        Envelope::new(
            7,
            Sender {
                id,
                endpoint: "peer.onion:38081".to_string(),
            },
            payload,
        )
    }

    fn message_record() -> Record {
        let value = json!({
            "metadata": "message",
            "content": "ciphertext...",
            "signature": "SigV1..."
        })
        .to_string();
        Record::new(value, 3600, None)
    }

    #[tokio::test]
    async fn test_ping_answers_pong_and_observes() {
        let engine = engine();
        let reply = engine.handle_envelope(peer_envelope(Payload::Ping {})).unwrap();

        assert_eq!(reply.id, 7);
        assert!(matches!(reply.payload, Payload::Pong {}));
        assert_eq!(engine.status().connected_peers, 1);
    }

    #[tokio::test]
    async fn test_find_node_excludes_requester() {
        let engine = engine();
        let target = NodeId::random();
        let reply = engine
            .handle_envelope(peer_envelope(Payload::FindNode { target }))
            .unwrap();

        let Payload::Nodes { contacts } = reply.payload else {
            panic!("expected nodes");
        };
        let requester = NodeId::from_identity("peer.onion:38081");
        assert!(contacts.iter().all(|c| c.id != requester));
    }

    #[tokio::test]
    async fn test_store_and_find_value_locally() {
        let engine = engine();
        let record = message_record();
        let key = record.key;

        let reply = engine
            .handle_envelope(peer_envelope(Payload::Store { record }))
            .unwrap();
        assert!(matches!(
            reply.payload,
            Payload::StoreResult { accepted: true, .. }
        ));

        let reply = engine
            .handle_envelope(peer_envelope(Payload::FindValue { key }))
            .unwrap();
        assert!(matches!(reply.payload, Payload::Value { .. }));
    }

    #[tokio::test]
    async fn test_store_rejects_hash_mismatch() {
        let engine = engine();
        let mut record = message_record();
        record.key = RecordKey::from_value(b"different bytes");

        let reply = engine
            .handle_envelope(peer_envelope(Payload::Store { record }))
            .unwrap();
        let Payload::StoreResult { accepted, reason } = reply.payload else {
            panic!("expected store result");
        };
        assert!(!accepted);
        assert_eq!(reason.as_deref(), Some("key/value hash mismatch"));
    }

    #[tokio::test]
    async fn test_find_value_miss_returns_contacts() {
        let engine = engine();
        let reply = engine
            .handle_envelope(peer_envelope(Payload::FindValue {
                key: RecordKey::random(),
            }))
            .unwrap();
        assert!(matches!(reply.payload, Payload::Nodes { .. }));
    }

    #[tokio::test]
    async fn test_map_without_sink_is_ignored() {
        let engine = engine();
        let reply = engine
            .handle_envelope(peer_envelope(Payload::Map {
                search_term: "wownero".to_string(),
                key: RecordKey::random(),
                content: "listing".to_string(),
            }))
            .unwrap();
        assert!(matches!(
            reply.payload,
            Payload::MapResult { accepted: false }
        ));
    }

    #[tokio::test]
    async fn test_map_reaches_sink() {
        struct Recorder(parking_lot::Mutex<Vec<String>>);
        impl MappingSink for Recorder {
            fn add(&self, search_term: &str, _key: &RecordKey, _content: &str) -> bool {
                self.0.lock().push(search_term.to_string());
                true
            }
        }

        let self_id = NodeId::from_identity("self.onion:38081");
        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        let engine = Arc::new(
            Engine::new(
                EngineConfig::new(self_id, "self.onion:38081"),
                ContentStore::new(ContentStoreConfig::default()),
                Arc::new(StreamTransport::new()),
            )
            .with_mapping_sink(recorder.clone()),
        );

        let reply = engine
            .handle_envelope(peer_envelope(Payload::Map {
                search_term: "wownero".to_string(),
                key: RecordKey::random(),
                content: "listing".to_string(),
            }))
            .unwrap();
        assert!(matches!(reply.payload, Payload::MapResult { accepted: true }));
        assert_eq!(recorder.0.lock().as_slice(), ["wownero".to_string()]);
    }

    #[tokio::test]
    async fn test_response_payloads_are_dropped() {
        let engine = engine();
        assert!(engine
            .handle_envelope(peer_envelope(Payload::Pong {}))
            .is_none());
    }

    #[tokio::test]
    async fn test_publish_with_no_peers_counts_local_store() {
        let engine = engine();
        let stored = engine.publish(message_record()).await.unwrap();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn test_own_records_outlive_staleness_while_republished() {
        let self_id = NodeId::from_identity("self.onion:38081");
        let store = ContentStore::new(ContentStoreConfig {
            republish_interval: Duration::from_millis(300),
            record_stale: Duration::from_secs(1),
            ..Default::default()
        });
        let engine = Arc::new(Engine::new(
            EngineConfig::new(self_id, "self.onion:38081"),
            store,
            Arc::new(StreamTransport::new()),
        ));

        let record = Record::new(message_record().value, 7 * 86400, Some(self_id));
        let key = record.key;
        engine.publish(record).await.unwrap();

        // Keep republishing across the staleness horizon; each pass
        // must refresh the origin's own copy.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(450)).await;
            engine.maintenance_tick().await;
        }

        assert!(engine.store().get(&key).is_some());
        assert_eq!(engine.store().len(), 1);
    }

    #[tokio::test]
    async fn test_status_reflects_store_and_peers() {
        let engine = engine();
        engine.handle_envelope(peer_envelope(Payload::Ping {}));
        let record = message_record();
        let size = record.size();
        engine.publish(record).await.unwrap();

        let status = engine.status();
        assert_eq!(status.connected_peers, 1);
        assert_eq!(status.active_peers, 1);
        assert_eq!(status.data_count, 1);
        assert_eq!(status.data_ram_usage, size);
        assert_eq!(status.peers[0].status, 1);
    }
}
