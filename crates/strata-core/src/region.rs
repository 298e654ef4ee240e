//! Region storage: pluggable per-region key/value backends.
//!
//! A region is a named partition of the cache holding entries of one
//! kind. The default backend is an in-process sharded map with
//! capacity-bounded eviction and lazy TTL expiry; an external key/value
//! service can be plugged in behind the same [`RegionStore`] interface.
//!
//! # Thread-Safety
//!
//! All operations are atomic per key: a reader racing a `remove` or
//! `evict_all` observes either the complete entry or nothing, never a
//! half-evicted value.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::key::CacheKey;
use crate::stats::RegionStats;
use crate::sync::{Arc, AtomicU64, Ordering};

/// Victim selection policy when a region exceeds capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the least-recently-used entry (by access stamp).
    #[default]
    Lru,
    /// Evict the oldest entry (by insertion stamp).
    Fifo,
}

/// Uniform contract for region storage backends.
pub trait RegionStore<V: Clone + Send + Sync>: Send + Sync {
    /// Returns the entry for `key`, if present and not expired.
    fn get(&self, key: &CacheKey) -> Option<V>;

    /// Inserts or replaces the entry for `key`.
    ///
    /// May evict another entry if the region is over capacity.
    fn put(&self, key: CacheKey, value: V, ttl: Option<Duration>);

    /// Removes the entry for `key`, if present.
    fn remove(&self, key: &CacheKey);

    /// Removes every entry in the region.
    fn evict_all(&self);

    /// Current number of entries.
    fn len(&self) -> usize;

    /// Whether the region holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One stored value plus its bookkeeping stamps.
#[derive(Debug)]
struct Slot<V> {
    value: V,
    /// Monotonic stamp assigned at insertion (FIFO ordering).
    inserted: u64,
    /// Monotonic stamp refreshed on every read (LRU ordering).
    touched: AtomicU64,
    expires_at: Option<Instant>,
}

impl<V> Slot<V> {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process region backend with bounded capacity.
///
/// Storage is a sharded concurrent map, so unrelated keys never
/// contend on a region-wide lock. TTL expiry is lazy: an aged-out
/// entry is dropped on the read that discovers it and the read reports
/// a miss.
pub struct InMemoryRegion<V> {
    name: Arc<str>,
    map: DashMap<CacheKey, Slot<V>>,
    capacity: usize,
    policy: EvictionPolicy,
    /// Monotonic stamp source for recency ordering.
    clock: AtomicU64,
    stats: Arc<RegionStats>,
}

impl<V: Clone + Send + Sync> InMemoryRegion<V> {
    /// Creates a region with the given capacity (clamped to at least 1)
    /// and eviction policy.
    #[must_use]
    pub fn new(
        name: impl Into<Arc<str>>,
        capacity: usize,
        policy: EvictionPolicy,
        stats: Arc<RegionStats>,
    ) -> Self {
        Self {
            name: name.into(),
            map: DashMap::new(),
            capacity: capacity.max(1),
            policy,
            clock: AtomicU64::new(0),
            stats,
        }
    }

    /// Maximum number of entries before eviction kicks in.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Region name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_stamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Evicts entries until the region is back within capacity.
    ///
    /// A single overflowing put removes exactly one victim; the bound
    /// guards against spinning when concurrent puts race the scan.
    fn evict_over_capacity(&self) {
        let mut attempts = 0;
        while self.map.len() > self.capacity && attempts < 10 {
            attempts += 1;

            let victim = self
                .map
                .iter()
                .map(|slot| {
                    let stamp = match self.policy {
                        EvictionPolicy::Lru => slot.touched.load(Ordering::Relaxed),
                        EvictionPolicy::Fifo => slot.inserted,
                    };
                    (stamp, slot.key().clone())
                })
                .min_by_key(|(stamp, _)| *stamp);

            let Some((_, key)) = victim else { break };
            if self.map.remove(&key).is_some() {
                self.stats.record_eviction();
                tracing::debug!(region = %self.name, key = %key, "entry evicted");
            }
        }
    }
}

impl<V: Clone + Send + Sync> RegionStore<V> for InMemoryRegion<V> {
    fn get(&self, key: &CacheKey) -> Option<V> {
        {
            let slot = self.map.get(key)?;
            if !slot.is_expired() {
                slot.touched.store(self.next_stamp(), Ordering::Relaxed);
                return Some(slot.value.clone());
            }
        }
        // Lazy TTL expiry: drop the aged-out entry and report a miss.
        if self.map.remove_if(key, |_, slot| slot.is_expired()).is_some() {
            tracing::debug!(region = %self.name, key = %key, "expired entry dropped");
        }
        None
    }

    fn put(&self, key: CacheKey, value: V, ttl: Option<Duration>) {
        let stamp = self.next_stamp();
        let slot = Slot {
            value,
            inserted: stamp,
            touched: AtomicU64::new(stamp),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.map.insert(key, slot);
        self.evict_over_capacity();
    }

    fn remove(&self, key: &CacheKey) {
        self.map.remove(key);
    }

    fn evict_all(&self) {
        self.map.clear();
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}
