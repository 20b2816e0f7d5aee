//! Debounce State Store
//!
//! Key/value store with atomic set-if-absent and TTL expiry. This is the only
//! synchronization primitive of the debounce cycle: every operation is a
//! single atomic call, never a client-side check-then-set.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fred::error::Error as RedisError;
use fred::prelude::*;
use tracing::debug;

use super::types::{DebounceKey, StoredUpdate};

/// Errors raised by a state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the command.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record exists but cannot be decoded.
    #[error("stored record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Shared debounce record storage.
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// Write `update` under `key` only if no record exists, expiring after `ttl`.
    ///
    /// Returns `true` iff this call created the record. A failed call never
    /// leaves a record behind.
    async fn try_acquire(
        &self,
        key: &DebounceKey,
        update: &StoredUpdate,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Read the record for `key`, if any.
    async fn get(&self, key: &DebounceKey) -> Result<Option<StoredUpdate>, StoreError>;

    /// Remove the record for `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &DebounceKey) -> Result<(), StoreError>;
}

/// Redis-backed store (`SET key value NX PX ttl`).
#[derive(Clone)]
pub struct RedisStateStore {
    redis: Client,
}

impl RedisStateStore {
    pub const fn new(redis: Client) -> Self {
        Self { redis }
    }
}

/// `PX` argument for a TTL: at least 1ms, saturating at `i64::MAX`.
fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis().max(1)).unwrap_or(i64::MAX)
}

#[async_trait]
impl SharedStateStore for RedisStateStore {
    async fn try_acquire(
        &self,
        key: &DebounceKey,
        update: &StoredUpdate,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(update)?;
        let ttl_ms = ttl_millis(ttl);

        // Reply is "OK" when written, nil when the key already exists
        let reply: Option<String> = self
            .redis
            .set(
                key.as_str(),
                payload,
                Some(Expiration::PX(ttl_ms)),
                Some(SetOptions::NX),
                false,
            )
            .await?;

        Ok(reply.is_some())
    }

    async fn get(&self, key: &DebounceKey) -> Result<Option<StoredUpdate>, StoreError> {
        let raw: Option<String> = self.redis.get(key.as_str()).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &DebounceKey) -> Result<(), StoreError> {
        let removed: i64 = self.redis.del(key.as_str()).await?;
        debug!(debounce_key = %key, removed, "Deleted debounce record");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryRecord {
    update: StoredUpdate,
    expires_at: Instant,
}

/// Process-local store.
///
/// Atomic within one process via the map's per-shard entry locks. Records
/// are expired lazily on access. Only correct when a single server instance
/// handles every request for a key.
#[derive(Default)]
pub struct MemoryStateStore {
    records: DashMap<DebounceKey, MemoryRecord>,
    acquires: AtomicUsize,
}

/// Expiry used when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Expired records of abandoned keys are swept once per this many acquires.
const SWEEP_EVERY: usize = 64;

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records
            .iter()
            .filter(|entry| entry.value().expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired record.
    fn sweep_expired(&self, now: Instant) {
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        let swept = before.saturating_sub(self.records.len());
        if swept > 0 {
            debug!(swept, "Swept expired debounce records");
        }
    }
}

#[async_trait]
impl SharedStateStore for MemoryStateStore {
    async fn try_acquire(
        &self,
        key: &DebounceKey,
        update: &StoredUpdate,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        // Must run before taking the entry lock below
        if self.acquires.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == 0 {
            self.sweep_expired(now);
        }

        let record = MemoryRecord {
            update: update.clone(),
            expires_at: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
        };

        match self.records.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().expires_at > now {
                    return Ok(false);
                }
                existing.insert(record);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &DebounceKey) -> Result<Option<StoredUpdate>, StoreError> {
        let now = Instant::now();
        let live = self
            .records
            .get(key)
            .filter(|record| record.expires_at > now)
            .map(|record| record.update.clone());

        if live.is_none() {
            self.records.remove_if(key, |_, record| record.expires_at <= now);
        }
        Ok(live)
    }

    async fn delete(&self, key: &DebounceKey) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }
}
