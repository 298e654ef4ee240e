//! Query result cache keyed by normalized query fingerprints.
//!
//! Cached query entries hold entity identifiers only; the identifiers
//! are re-resolved through the entity cache at read time. Staleness is
//! detected by comparing result-space versions, not by tracking
//! per-row dependencies: every committed write to an entity type bumps
//! that type's version, and any query entry stored under an older
//! version is discarded on lookup.

use std::time::Duration;

use dashmap::DashMap;

use crate::entity::EntityRegion;
use crate::entry::{CacheResult, EntityEntry, QueryEntry};
use crate::key::{CacheKey, EntityId};
use crate::region::RegionStore;
use crate::stats::{CacheStatistics, RegionStats};
use crate::sync::Arc;

/// Monotonic per-entity-type counters bumped on every committed write.
#[derive(Debug, Default)]
pub struct ResultSpaceVersions {
    versions: DashMap<String, u64>,
}

impl ResultSpaceVersions {
    /// Creates an empty tracker; every entity type starts at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            versions: DashMap::new(),
        }
    }

    /// Current result-space version of `entity_type`.
    #[must_use]
    pub fn current(&self, entity_type: &str) -> u64 {
        self.versions.get(entity_type).map_or(0, |v| *v)
    }

    /// Bumps the version of `entity_type`, returning the new value.
    ///
    /// Called for every committed insert/update/delete touching rows
    /// of that type.
    pub fn bump(&self, entity_type: &str) -> u64 {
        let mut version = self.versions.entry(entity_type.to_string()).or_insert(0);
        *version += 1;
        *version
    }
}

/// Cache of query result-identifier lists.
pub struct QueryCacheManager {
    region: Arc<dyn RegionStore<QueryEntry>>,
    stats: Arc<RegionStats>,
    ttl: Option<Duration>,
    enabled: bool,
}

impl QueryCacheManager {
    /// Creates a manager over an explicit storage backend.
    #[must_use]
    pub fn new(
        store: Arc<dyn RegionStore<QueryEntry>>,
        stats: Arc<RegionStats>,
        ttl: Option<Duration>,
        enabled: bool,
    ) -> Self {
        Self {
            region: store,
            stats,
            ttl,
            enabled,
        }
    }

    /// Whether query caching is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Snapshot of the query region's statistics counters.
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        self.stats.snapshot()
    }

    /// Clears the query region's statistics counters.
    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Returns the cached identifier list for `key`, if fresh.
    ///
    /// `result_space_version` is the current version of the query's
    /// target entity type; an entry stored under an older version
    /// predates a committed write the query would have reflected, so it
    /// is discarded and the lookup reports a miss.
    #[must_use]
    pub fn lookup(&self, key: &CacheKey, result_space_version: u64) -> Option<Vec<EntityId>> {
        if !self.enabled {
            return None;
        }
        let Some(entry) = self.region.get(key) else {
            self.stats.record_miss();
            return None;
        };
        if entry.result_space_version < result_space_version {
            self.region.remove(key);
            self.stats.record_miss();
            tracing::debug!(
                key = %key,
                stored = entry.result_space_version,
                current = result_space_version,
                "stale query entry discarded"
            );
            return None;
        }
        self.stats.record_hit();
        Some(entry.ids)
    }

    /// Caches the identifier list produced by a query execution.
    ///
    /// Only identifiers are stored, never entity field data: field
    /// updates are picked up automatically when the identifiers are
    /// re-resolved through the entity cache.
    pub fn store(&self, key: CacheKey, ids: Vec<EntityId>, result_space_version: u64) {
        if !self.enabled {
            return;
        }
        self.region.put(
            key,
            QueryEntry {
                ids,
                result_space_version,
            },
            self.ttl,
        );
        self.stats.record_put();
    }

    /// Removes every cached query entry.
    pub fn evict_all(&self) {
        self.region.evict_all();
    }

    /// Current number of cached query entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.region.len()
    }

    /// Whether no query entries are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }
}

/// Resolves cached identifiers through the entity cache.
///
/// A miss (or pending write) on any single identifier returns `None`:
/// the caller must re-execute the whole query against the data source
/// rather than assemble a partially cached result.
#[must_use]
pub fn resolve_refs(region: &EntityRegion, ids: &[EntityId]) -> Option<Vec<EntityEntry>> {
    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        let key = CacheKey::for_entity(region.name(), id.clone());
        match region.lookup(&key) {
            CacheResult::Hit(entry) => entries.push(entry),
            CacheResult::Miss | CacheResult::Locked => return None,
        }
    }
    Some(entries)
}
