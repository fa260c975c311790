//! XOR-metric routing table with k-buckets and a replacement cache.
//!
//! Bucket `i` holds contacts whose XOR distance to self has bit `i` as
//! its most significant bit, so bucket 159 covers the farthest half of
//! the keyspace. Buckets keep least-recently-seen order: the front is
//! the next eviction candidate, the back the freshest contact.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use nero_core::{NodeId, BUCKET_COUNT, DEFAULT_K};

use crate::contact::Contact;

/// Routing table configuration.
#[derive(Debug, Clone)]
pub struct RoutingTableConfig {
    /// Bucket capacity (k).
    pub k: usize,
    /// Replacement cache capacity per bucket.
    pub cache_size: usize,
}

impl Default for RoutingTableConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            cache_size: DEFAULT_K,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    contacts: VecDeque<Contact>,
    replacement: VecDeque<Contact>,
    last_touched: Instant,
}

impl Bucket {
    fn new() -> Self {
        Self {
            contacts: VecDeque::new(),
            replacement: VecDeque::new(),
            last_touched: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_touched = Instant::now();
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.contacts.iter().position(|c| &c.id == id)
    }

    fn push_replacement(&mut self, contact: Contact, cache_size: usize) {
        self.replacement.retain(|c| c.id != contact.id);
        self.replacement.push_back(contact);
        while self.replacement.len() > cache_size {
            self.replacement.pop_front();
        }
    }

    /// Pulls the freshest replacement into the live set.
    fn promote_replacement(&mut self) {
        if let Some(mut contact) = self.replacement.pop_back() {
            contact.failures = 0;
            self.contacts.push_back(contact);
        }
    }
}

/// Result of observing a contact.
#[derive(Debug)]
pub enum ObserveOutcome {
    /// The contact was inserted into a bucket with room.
    Inserted,
    /// The contact was already known and has been refreshed.
    Refreshed,
    /// The contact is our own identity; ignored.
    SelfContact,
    /// The bucket is full: the caller should ping the eviction
    /// candidate and resolve with [`RoutingTable::resolve_eviction`].
    Full(PendingEviction),
}

/// A full-bucket decision awaiting a liveness check of the oldest
/// contact.
#[derive(Debug, Clone)]
pub struct PendingEviction {
    /// Index of the full bucket.
    pub bucket: usize,
    /// Least-recently-seen contact, to be pinged.
    pub oldest: Contact,
    /// The newly observed contact.
    pub candidate: Contact,
}

/// The k-bucketed contact table.
#[derive(Debug)]
pub struct RoutingTable {
    self_id: NodeId,
    config: RoutingTableConfig,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    /// Creates an empty table around the local identity.
    pub fn new(self_id: NodeId, config: RoutingTableConfig) -> Self {
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        for _ in 0..BUCKET_COUNT {
            buckets.push(Bucket::new());
        }
        Self {
            self_id,
            config,
            buckets,
        }
    }

    /// Returns the local identity.
    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// Returns the number of live contacts.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    /// Returns true when no contacts are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upserts a contact that just communicated with us.
    ///
    /// A known contact is refreshed and moved to the fresh end of its
    /// bucket. A new contact fills spare capacity, or triggers an
    /// eviction check against the least-recently-seen contact when the
    /// bucket is full.
    pub fn observe(&mut self, contact: Contact) -> ObserveOutcome {
        if contact.id == self.self_id {
            return ObserveOutcome::SelfContact;
        }

        let idx = self.self_id.bucket_index(&contact.id);
        let k = self.config.k;
        let bucket = &mut self.buckets[idx];
        bucket.touch();

        if let Some(pos) = bucket.position(&contact.id) {
            if let Some(mut existing) = bucket.contacts.remove(pos) {
                existing.endpoint = contact.endpoint;
                existing.touch();
                bucket.contacts.push_back(existing);
            }
            return ObserveOutcome::Refreshed;
        }

        if bucket.contacts.len() < k {
            let mut contact = contact;
            contact.touch();
            bucket.contacts.push_back(contact);
            return ObserveOutcome::Inserted;
        }

        let oldest = bucket
            .contacts
            .front()
            .cloned()
            .expect("full bucket has a front contact");
        ObserveOutcome::Full(PendingEviction {
            bucket: idx,
            oldest,
            candidate: contact,
        })
    }

    /// Applies the outcome of an eviction-candidate ping.
    ///
    /// If the oldest contact answered it is refreshed and the newcomer
    /// goes to the replacement cache; otherwise the oldest is evicted
    /// and the newcomer takes its slot.
    pub fn resolve_eviction(&mut self, pending: PendingEviction, oldest_alive: bool) {
        let cache_size = self.config.cache_size;
        let k = self.config.k;
        let bucket = &mut self.buckets[pending.bucket];

        if oldest_alive {
            if let Some(pos) = bucket.position(&pending.oldest.id) {
                if let Some(mut oldest) = bucket.contacts.remove(pos) {
                    oldest.touch();
                    bucket.contacts.push_back(oldest);
                }
            }
            let mut candidate = pending.candidate;
            candidate.touch();
            bucket.push_replacement(candidate, cache_size);
            return;
        }

        if let Some(pos) = bucket.position(&pending.oldest.id) {
            bucket.contacts.remove(pos);
        }
        if bucket.position(&pending.candidate.id).is_none() && bucket.contacts.len() < k {
            let mut candidate = pending.candidate;
            candidate.touch();
            bucket.contacts.push_back(candidate);
        }
    }

    /// Refreshes a contact's liveness after a successful response.
    pub fn touch(&mut self, id: &NodeId) {
        let idx = self.self_id.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.position(id) {
            if let Some(mut contact) = bucket.contacts.remove(pos) {
                contact.touch();
                bucket.contacts.push_back(contact);
                bucket.touch();
            }
        }
    }

    /// Flags a failed RPC against a contact.
    ///
    /// A contact that reaches the failure limit is evicted and the
    /// freshest replacement-cache entry takes its place. Returns true
    /// when the contact was evicted.
    pub fn record_failure(&mut self, id: &NodeId) -> bool {
        let idx = self.self_id.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        let Some(pos) = bucket.position(id) else {
            return false;
        };

        if let Some(contact) = bucket.contacts.get_mut(pos) {
            contact.record_failure();
            if !contact.is_dead() {
                return false;
            }
        }

        bucket.contacts.remove(pos);
        bucket.promote_replacement();
        true
    }

    /// Returns up to `n` contacts ordered by XOR distance to the key.
    ///
    /// Equal distances (possible only for truncated keys) break toward
    /// the most recently seen contact.
    pub fn closest(&self, target: &NodeId, n: usize) -> Vec<Contact> {
        let mut all: Vec<&Contact> = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts.iter())
            .collect();

        all.sort_by(|a, b| {
            let da = a.id.xor_distance(target);
            let db = b.id.xor_distance(target);
            da.cmp(&db).then_with(|| b.last_seen.cmp(&a.last_seen))
        });

        all.into_iter().take(n).cloned().collect()
    }

    /// Returns indices of non-empty buckets untouched beyond the
    /// threshold, due for a refresh lookup.
    pub fn stale_buckets(&self, threshold: Duration) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.contacts.is_empty() && b.last_touched.elapsed() > threshold)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Marks a bucket as freshly refreshed.
    pub fn mark_refreshed(&mut self, idx: usize) {
        if let Some(bucket) = self.buckets.get_mut(idx) {
            bucket.touch();
        }
    }

    /// Generates a random id that falls into the given bucket.
    pub fn random_id_in_bucket(&self, idx: usize) -> NodeId {
        let idx = idx.min(BUCKET_COUNT - 1);
        let random = NodeId::random();

        // Build a distance whose most significant set bit is bit `idx`,
        // then translate it back to an id by XOR with self.
        let leading = BUCKET_COUNT - 1 - idx;
        let byte_idx = leading / 8;
        let top_bit = 0x80u8 >> (leading % 8);

        let mut distance = [0u8; 20];
        distance[byte_idx] = top_bit | (random.as_bytes()[byte_idx] & top_bit.wrapping_sub(1));
        for i in (byte_idx + 1)..20 {
            distance[i] = random.as_bytes()[i];
        }

        let mut target = [0u8; 20];
        for i in 0..20 {
            target[i] = self.self_id.as_bytes()[i] ^ distance[i];
        }
        NodeId::new(target)
    }

    /// Returns the least-recently-seen contact of each bucket whose
    /// idle time exceeds the threshold, for health pings.
    pub fn longest_idle(&self, threshold: Duration) -> Vec<Contact> {
        self.buckets
            .iter()
            .filter_map(|b| b.contacts.front())
            .filter(|c| c.idle() > threshold)
            .cloned()
            .collect()
    }

    /// Returns a snapshot of every live contact.
    pub fn contacts(&self) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|b| b.contacts.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactState;

    fn id_with_first_byte(byte: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[0] = byte;
        NodeId::new(bytes)
    }

    fn contact_with_first_byte(byte: u8) -> Contact {
        Contact::new(id_with_first_byte(byte), format!("node-{byte}:38081"))
    }

    fn table(k: usize) -> RoutingTable {
        RoutingTable::new(
            id_with_first_byte(0x00),
            RoutingTableConfig {
                k,
                cache_size: k,
            },
        )
    }

    #[test]
    fn test_self_contact_ignored() {
        let mut rt = table(4);
        let outcome = rt.observe(Contact::new(*rt.self_id(), "self:1"));
        assert!(matches!(outcome, ObserveOutcome::SelfContact));
        assert!(rt.is_empty());
    }

    #[test]
    fn test_observe_inserts_and_refreshes() {
        let mut rt = table(4);
        let contact = contact_with_first_byte(0x80);

        assert!(matches!(rt.observe(contact.clone()), ObserveOutcome::Inserted));
        assert!(matches!(rt.observe(contact), ObserveOutcome::Refreshed));
        assert_eq!(rt.len(), 1);
    }

    #[test]
    fn test_closest_orders_by_distance() {
        let mut rt = table(8);
        for byte in [0x10, 0x20, 0x08] {
            rt.observe(contact_with_first_byte(byte));
        }

        let closest = rt.closest(&id_with_first_byte(0x18), 3);
        let firsts: Vec<u8> = closest.iter().map(|c| c.id.as_bytes()[0]).collect();
        assert_eq!(firsts, vec![0x10, 0x08, 0x20]);
    }

    #[test]
    fn test_closest_has_no_duplicates() {
        let mut rt = table(20);
        for _ in 0..200 {
            rt.observe(Contact::new(NodeId::random(), "x:1"));
        }

        let closest = rt.closest(rt.self_id(), 20);
        let mut ids: Vec<NodeId> = closest.iter().map(|c| c.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), closest.len());
    }

    #[test]
    fn test_bucket_capacity_is_bounded() {
        let mut rt = table(2);
        // All of these share bucket 159 relative to 0x00...
        for byte in [0x80, 0x90, 0xa0, 0xb0, 0xc0] {
            rt.observe(contact_with_first_byte(byte));
        }
        assert_eq!(rt.len(), 2);
    }

    #[test]
    fn test_full_bucket_yields_pending_eviction() {
        let mut rt = table(2);
        rt.observe(contact_with_first_byte(0x80));
        rt.observe(contact_with_first_byte(0x90));

        let outcome = rt.observe(contact_with_first_byte(0xa0));
        let ObserveOutcome::Full(pending) = outcome else {
            panic!("expected a pending eviction");
        };
        assert_eq!(pending.oldest.id, id_with_first_byte(0x80));
        assert_eq!(pending.candidate.id, id_with_first_byte(0xa0));
    }

    #[test]
    fn test_alive_oldest_keeps_slot_and_caches_candidate() {
        let mut rt = table(2);
        rt.observe(contact_with_first_byte(0x80));
        rt.observe(contact_with_first_byte(0x90));
        let ObserveOutcome::Full(pending) = rt.observe(contact_with_first_byte(0xa0)) else {
            panic!("expected a pending eviction");
        };

        rt.resolve_eviction(pending, true);

        let ids: Vec<u8> = rt.contacts().iter().map(|c| c.id.as_bytes()[0]).collect();
        assert!(ids.contains(&0x80));
        assert!(ids.contains(&0x90));
        assert!(!ids.contains(&0xa0));

        // The cached candidate takes over when the oldest dies.
        for _ in 0..nero_core::MAX_CONTACT_FAILURES {
            rt.record_failure(&id_with_first_byte(0x80));
        }
        let ids: Vec<u8> = rt.contacts().iter().map(|c| c.id.as_bytes()[0]).collect();
        assert!(!ids.contains(&0x80));
        assert!(ids.contains(&0xa0));
    }

    #[test]
    fn test_dead_oldest_is_replaced_by_candidate() {
        let mut rt = table(2);
        rt.observe(contact_with_first_byte(0x80));
        rt.observe(contact_with_first_byte(0x90));
        let ObserveOutcome::Full(pending) = rt.observe(contact_with_first_byte(0xa0)) else {
            panic!("expected a pending eviction");
        };

        rt.resolve_eviction(pending, false);

        let ids: Vec<u8> = rt.contacts().iter().map(|c| c.id.as_bytes()[0]).collect();
        assert!(!ids.contains(&0x80));
        assert!(ids.contains(&0x90));
        assert!(ids.contains(&0xa0));
    }

    #[test]
    fn test_failures_below_limit_keep_contact() {
        let mut rt = table(4);
        let contact = contact_with_first_byte(0x80);
        rt.observe(contact.clone());

        assert!(!rt.record_failure(&contact.id));
        assert!(!rt.record_failure(&contact.id));
        assert_eq!(rt.len(), 1);

        assert!(rt.record_failure(&contact.id));
        assert!(rt.is_empty());
    }

    #[test]
    fn test_closest_matches_exhaustive_sort() {
        let self_id = NodeId::random();
        let mut rt = RoutingTable::new(self_id, RoutingTableConfig::default());

        let mut inserted = Vec::new();
        for _ in 0..500 {
            let contact = Contact::new(NodeId::random(), "x:1");
            if matches!(rt.observe(contact.clone()), ObserveOutcome::Inserted) {
                inserted.push(contact.id);
            }
        }

        inserted.sort_by(|a, b| {
            a.xor_distance(&self_id).cmp(&b.xor_distance(&self_id))
        });

        let expected: Vec<NodeId> = inserted.into_iter().take(20).collect();
        let actual: Vec<NodeId> = rt.closest(&self_id, 20).iter().map(|c| c.id).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_random_id_lands_in_bucket() {
        let rt = RoutingTable::new(NodeId::random(), RoutingTableConfig::default());
        for idx in [0, 1, 7, 8, 63, 100, 158, 159] {
            for _ in 0..10 {
                let id = rt.random_id_in_bucket(idx);
                assert_eq!(rt.self_id().bucket_index(&id), idx);
            }
        }
    }

    #[test]
    fn test_stale_buckets() {
        let mut rt = table(4);
        rt.observe(contact_with_first_byte(0x80));

        assert!(rt.stale_buckets(Duration::from_secs(60)).is_empty());
        assert_eq!(rt.stale_buckets(Duration::from_secs(0)).len(), 1);

        rt.mark_refreshed(159);
        assert!(rt.stale_buckets(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_observed_contact_is_active() {
        let mut rt = table(4);
        rt.observe(contact_with_first_byte(0x80));
        assert_eq!(rt.contacts()[0].state(), ContactState::Active);
    }

    #[test]
    fn test_capacity_under_random_insert_order() {
        let mut rt = RoutingTable::new(NodeId::random(), RoutingTableConfig::default());
        for _ in 0..10_000 {
            rt.observe(Contact::new(NodeId::random(), "x:1"));
        }
        // No bucket may exceed k live contacts.
        for bucket in &rt.buckets {
            assert!(bucket.contacts.len() <= rt.config.k);
        }
    }
}
