//! Cache statistics tracking.
//!
//! One `RegionStats` per region, incremented lock-free on the hot
//! path. Snapshots and resets serialize against each other through a
//! small gate mutex so an operator never observes a half-cleared
//! aggregate.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Point-in-time snapshot of a region's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (including forced misses on locked keys).
    pub misses: u64,
    /// Number of entries put into the cache.
    pub puts: u64,
    /// Number of entries evicted by the capacity policy.
    pub evictions: u64,
}

impl CacheStatistics {
    /// Calculate hit rate (0.0 to 1.0).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total lookups (hits + misses).
    #[must_use]
    pub const fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Folds another snapshot into this one (for aggregate views).
    pub fn merge(&mut self, other: &Self) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.puts += other.puts;
        self.evictions += other.evictions;
    }
}

/// Lock-free counters for one region.
///
/// Increments use relaxed atomics; exact cross-counter consistency is
/// only guaranteed between `snapshot` and `reset`, which take the gate.
#[derive(Debug)]
pub struct RegionStats {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    /// Serializes snapshots against resets.
    gate: Mutex<()>,
}

impl RegionStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            gate: Mutex::new(()),
        }
    }

    /// Record a cache hit.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a put.
    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction.
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a consistent snapshot of all four counters.
    #[must_use]
    pub fn snapshot(&self) -> CacheStatistics {
        let _gate = self.gate.lock();
        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Clears all counters atomically with respect to `snapshot`.
    pub fn reset(&self) {
        let _gate = self.gate.lock();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

impl Default for RegionStats {
    fn default() -> Self {
        Self::new()
    }
}
