//! Validated record set with TTL, expiry and republication tracking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use nero_core::{
    RecordKey, DEFAULT_RECORD_TTL_SECS, MAX_RECORD_SIZE, MAX_RECORD_TTL_SECS,
    RECORD_STALE_SECS, REPUBLISH_INTERVAL_SECS,
};
use nero_proto::validate::{
    parse_tagged, RecordValidator, SignatureCheck, StructuralValidator, ValidationError,
};
use nero_proto::Record;

/// Content store configuration.
#[derive(Clone)]
pub struct ContentStoreConfig {
    /// Largest accepted value in bytes.
    pub max_value_size: usize,
    /// TTL applied when a record carries none.
    pub default_ttl_secs: u64,
    /// Largest accepted TTL in seconds.
    pub max_ttl_secs: u64,
    /// Interval between republications of a held record.
    pub republish_interval: Duration,
    /// Records not refreshed by any STORE for this long are expired.
    pub record_stale: Duration,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            max_value_size: MAX_RECORD_SIZE,
            default_ttl_secs: DEFAULT_RECORD_TTL_SECS,
            max_ttl_secs: MAX_RECORD_TTL_SECS,
            republish_interval: Duration::from_secs(REPUBLISH_INTERVAL_SECS),
            record_stale: Duration::from_secs(RECORD_STALE_SECS),
        }
    }
}

/// Why a record was rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreRejected {
    /// The key is not the content hash of the value.
    #[error("key/value hash mismatch")]
    HashMismatch,

    /// The value exceeds the size cap.
    #[error("value too large: {0} bytes")]
    TooLarge(usize),

    /// The TTL exceeds the cap.
    #[error("ttl too long: {0}s")]
    TtlTooLong(u64),

    /// The value failed structural validation.
    #[error("invalid record: {0}")]
    Invalid(#[from] ValidationError),
}

/// Outcome of an accepted put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record is new to this store.
    Stored,
    /// The record was already held; its lease was refreshed.
    Refreshed,
}

struct StoredRecord {
    record: Record,
    refreshed_at: DateTime<Utc>,
    republish_at: DateTime<Utc>,
}

impl StoredRecord {
    fn is_expired(&self, now: DateTime<Utc>, stale: Duration) -> bool {
        let age = now.signed_duration_since(self.refreshed_at);
        age.num_seconds() >= self.record.ttl as i64
            || age.num_seconds() >= stale.as_secs() as i64
    }
}

/// The validated record set.
///
/// Guarded by a reader-writer lock: reads are common on the lookup
/// path, writes are brief. The expiry sweeper takes the write lock once
/// per pass.
pub struct ContentStore {
    config: ContentStoreConfig,
    validator: Arc<dyn RecordValidator>,
    signature_check: Option<SignatureCheck>,
    records: RwLock<HashMap<RecordKey, StoredRecord>>,
    value_bytes: AtomicUsize,
}

impl ContentStore {
    /// Creates a store with the built-in structural validator.
    pub fn new(config: ContentStoreConfig) -> Self {
        Self {
            config,
            validator: Arc::new(StructuralValidator),
            signature_check: None,
            records: RwLock::new(HashMap::new()),
            value_bytes: AtomicUsize::new(0),
        }
    }

    /// Replaces the value validator.
    pub fn with_validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Installs the cryptographic signature callback.
    pub fn with_signature_check(mut self, check: SignatureCheck) -> Self {
        self.signature_check = Some(check);
        self
    }

    /// Validates and inserts a record.
    ///
    /// A put whose key already exists refreshes the stored record and
    /// keeps the smaller of the two TTLs; the value bytes are identical
    /// by construction since the key is their hash.
    pub fn put(&self, mut record: Record) -> Result<PutOutcome, StoreRejected> {
        if !record.key_matches_value() {
            return Err(StoreRejected::HashMismatch);
        }
        if record.size() > self.config.max_value_size {
            return Err(StoreRejected::TooLarge(record.size()));
        }
        if record.ttl == 0 {
            record.ttl = self.config.default_ttl_secs;
        }
        if record.ttl > self.config.max_ttl_secs {
            return Err(StoreRejected::TtlTooLong(record.ttl));
        }

        let (tag, doc) = parse_tagged(&record.value)?;
        self.validator.validate(tag, &doc)?;
        if let Some(check) = &self.signature_check {
            if !check(tag, &doc) {
                return Err(StoreRejected::Invalid(ValidationError::BadSignature));
            }
        }

        let now = Utc::now();
        let mut records = self.records.write();
        if let Some(existing) = records.get_mut(&record.key) {
            existing.record.ttl = existing.record.ttl.min(record.ttl);
            existing.refreshed_at = now;
            debug!(key = %record.key, "record refreshed");
            return Ok(PutOutcome::Refreshed);
        }

        self.value_bytes.fetch_add(record.size(), Ordering::Relaxed);
        debug!(key = %record.key, tag = %tag, ttl = record.ttl, "record stored");
        records.insert(
            record.key,
            StoredRecord {
                record,
                refreshed_at: now,
                republish_at: now + self.config.republish_interval,
            },
        );
        Ok(PutOutcome::Stored)
    }

    /// Returns the record for a key, if present and not expired.
    pub fn get(&self, key: &RecordKey) -> Option<Record> {
        let records = self.records.read();
        let stored = records.get(key)?;
        if stored.is_expired(Utc::now(), self.config.record_stale) {
            return None;
        }
        Some(stored.record.clone())
    }

    /// Returns true if the key is held and live.
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.get(key).is_some()
    }

    /// Marks a record as freshly refreshed, restarting its expiry clock.
    ///
    /// Republication by the record's origin counts as a refresh the
    /// same way an inbound STORE does; without this the origin's own
    /// copy would hit the staleness horizon even while it keeps
    /// republishing, and republication would silently stop.
    pub fn touch(&self, key: &RecordKey) -> bool {
        match self.records.write().get_mut(key) {
            Some(stored) => {
                stored.refreshed_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Local-only eviction.
    pub fn remove(&self, key: &RecordKey) -> bool {
        let removed = self.records.write().remove(key);
        if let Some(stored) = &removed {
            self.value_bytes
                .fetch_sub(stored.record.size(), Ordering::Relaxed);
        }
        removed.is_some()
    }

    /// Removes expired records and returns their keys.
    pub fn sweep_expired(&self) -> Vec<RecordKey> {
        let now = Utc::now();
        let stale = self.config.record_stale;
        let mut records = self.records.write();

        let expired: Vec<RecordKey> = records
            .iter()
            .filter(|(_, stored)| stored.is_expired(now, stale))
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            if let Some(stored) = records.remove(key) {
                self.value_bytes
                    .fetch_sub(stored.record.size(), Ordering::Relaxed);
            }
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "expired records swept");
        }
        expired
    }

    /// Returns records whose republication deadline has passed and
    /// advances their deadline by one interval.
    pub fn due_for_republish(&self) -> Vec<Record> {
        let now = Utc::now();
        let interval = self.config.republish_interval;
        let stale = self.config.record_stale;
        let mut records = self.records.write();

        let mut due = Vec::new();
        for stored in records.values_mut() {
            if stored.republish_at <= now && !stored.is_expired(now, stale) {
                stored.republish_at = now + interval;
                due.push(stored.record.clone());
            }
        }
        due
    }

    /// Number of held records, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of record values currently held.
    pub fn value_bytes(&self) -> usize {
        self.value_bytes.load(Ordering::Relaxed)
    }

    /// Drops every record. Debug surface for the bridge `clear` method.
    pub fn clear(&self) {
        self.records.write().clear();
        self.value_bytes.store(0, Ordering::Relaxed);
    }

    /// Snapshot of the held keys.
    pub fn keys(&self) -> Vec<RecordKey> {
        self.records.read().keys().copied().collect()
    }
}
