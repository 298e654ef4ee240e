//! # Strata Core
//!
//! Second-level entity and query result cache for object-relational
//! persistence engines.
//!
//! Strata keeps a process-local cache of loaded entity snapshots and
//! query result-identifier lists consistent with an underlying
//! relational store across concurrent transactional sessions. The
//! persistence engine owns the data source; Strata owns the cache.
//!
//! ## Features
//!
//! - **Four concurrency strategies**: read-only, nonstrict-read-write,
//!   read-write (soft locks), transactional (two-phase visibility)
//! - **Query caching by fingerprint**: normalized text + canonical
//!   parameters, invalidated by result-space version comparison
//! - **Per-key coordination**: sharded lock tables, no region-wide
//!   mutex
//! - **Statistics**: lock-free hit/miss/put/eviction counters per
//!   region, resettable
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata_core::{CacheKey, ConcurrencyStrategy, SecondLevelCache};
//! use serde_json::json;
//!
//! let cache = SecondLevelCache::with_defaults();
//! let pets = cache.register_region("Pet", ConcurrencyStrategy::ReadWrite)?;
//!
//! // Engine loaded a row from the database; populate the cache.
//! let key = CacheKey::for_entity("Pet", 1i64);
//! pets.after_load(&key, json!({"name": "Fluffy", "species": "dog"}), 1)?;
//!
//! // Subsequent lookups hit the cache.
//! let result = pets.lookup(&key);
//! assert!(result.is_hit());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // Acceptable for hit rate calculation
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::single_match_else)]

pub mod config;
pub mod entity;
#[cfg(test)]
mod entity_tests;
pub mod entry;
pub mod error;
pub mod key;
pub mod query;
pub mod region;
pub mod stats;
pub mod strategy;
pub mod sync;

pub use config::{
    CacheConfig, ConfigError, LockingConfig, LoggingConfig, QuerySettings, RegionDefaults,
};
pub use entity::EntityRegion;
pub use entry::{CacheResult, EntityEntry, LockHandle, QueryEntry, SoftLock};
pub use error::{Error, Result};
pub use key::{normalize_query_text, CacheKey, EntityId, ParamValue};
pub use query::{resolve_refs, QueryCacheManager, ResultSpaceVersions};
pub use region::{EvictionPolicy, InMemoryRegion, RegionStore};
pub use stats::{CacheStatistics, RegionStats};
pub use strategy::{ConcurrencyStrategy, IsolationLevel, KeyState};

use rustc_hash::FxHashMap;

use crate::sync::{Arc, RwLock};

/// Name of the built-in query results region in statistics views.
pub const QUERY_RESULTS_REGION: &str = "query.results";

/// Facade owning every cache region of one persistence engine.
///
/// Holds the named entity regions, the query cache and the
/// result-space version tracker. The persistence engine keeps one
/// instance per session factory / engine instance.
pub struct SecondLevelCache {
    config: CacheConfig,
    regions: RwLock<FxHashMap<String, Arc<EntityRegion>>>,
    query_cache: QueryCacheManager,
    result_space: Arc<ResultSpaceVersions>,
}

impl SecondLevelCache {
    /// Creates a cache from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration fails validation.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let result_space = Arc::new(ResultSpaceVersions::new());
        let query_stats = Arc::new(RegionStats::new());
        let query_store = Arc::new(InMemoryRegion::new(
            QUERY_RESULTS_REGION,
            config.query.capacity,
            config.regions.eviction_policy,
            Arc::clone(&query_stats),
        ));
        let query_cache = QueryCacheManager::new(
            query_store,
            query_stats,
            config.region_ttl(),
            config.query.enabled,
        );

        tracing::info!(
            query_cache = config.query.enabled,
            lock_timeout_ms = config.locking.lock_timeout_ms,
            "second-level cache initialized"
        );

        Ok(Self {
            config,
            regions: RwLock::new(FxHashMap::default()),
            query_cache,
            result_space,
        })
    }

    /// Creates a cache with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default()).expect("default configuration is valid")
    }

    /// Registers an entity region using the configured region defaults.
    ///
    /// The region name is the entity type name: one region caches
    /// snapshots of exactly one entity type.
    ///
    /// # Errors
    ///
    /// Returns `RegionExists` if a region with the same name is already
    /// registered.
    pub fn register_region(
        &self,
        name: &str,
        strategy: ConcurrencyStrategy,
    ) -> Result<Arc<EntityRegion>> {
        self.register_region_with_capacity(name, strategy, self.config.regions.capacity)
    }

    /// Registers an entity region with an explicit capacity.
    ///
    /// # Errors
    ///
    /// Returns `RegionExists` if a region with the same name is already
    /// registered.
    pub fn register_region_with_capacity(
        &self,
        name: &str,
        strategy: ConcurrencyStrategy,
        capacity: usize,
    ) -> Result<Arc<EntityRegion>> {
        let mut regions = self.regions.write();

        if regions.contains_key(name) {
            return Err(Error::RegionExists(name.to_string()));
        }

        let stats = Arc::new(RegionStats::new());
        let store = Arc::new(InMemoryRegion::new(
            name,
            capacity,
            self.config.regions.eviction_policy,
            Arc::clone(&stats),
        ));
        let region = Arc::new(EntityRegion::new(
            name,
            strategy,
            store,
            stats,
            Arc::clone(&self.result_space),
            self.config.lock_timeout(),
            self.config.region_ttl(),
        ));
        regions.insert(name.to_string(), Arc::clone(&region));

        tracing::info!(region = name, strategy = %strategy, capacity, "region registered");

        Ok(region)
    }

    /// Returns a registered region by name.
    #[must_use]
    pub fn region(&self, name: &str) -> Option<Arc<EntityRegion>> {
        self.regions.read().get(name).cloned()
    }

    /// Lists all registered region names.
    #[must_use]
    pub fn region_names(&self) -> Vec<String> {
        self.regions.read().keys().cloned().collect()
    }

    /// Evicts every entry in one region.
    ///
    /// The built-in [`QUERY_RESULTS_REGION`] name addresses the query
    /// cache.
    ///
    /// # Errors
    ///
    /// Returns `RegionNotFound` if the region is not registered.
    pub fn evict_region(&self, name: &str) -> Result<()> {
        if name == QUERY_RESULTS_REGION {
            self.query_cache.evict_all();
            return Ok(());
        }
        match self.region(name) {
            Some(region) => {
                region.evict_all();
                Ok(())
            }
            None => Err(Error::RegionNotFound(name.to_string())),
        }
    }

    /// Evicts every entry in every region, including the query cache.
    pub fn evict_all(&self) {
        for region in self.regions.read().values() {
            region.evict_all();
        }
        self.query_cache.evict_all();
    }

    /// Per-region statistics snapshots, including the query region.
    #[must_use]
    pub fn statistics(&self) -> FxHashMap<String, CacheStatistics> {
        let mut snapshots = FxHashMap::default();
        for (name, region) in self.regions.read().iter() {
            snapshots.insert(name.clone(), region.statistics());
        }
        snapshots.insert(
            QUERY_RESULTS_REGION.to_string(),
            self.query_cache.statistics(),
        );
        snapshots
    }

    /// Statistics aggregated across all regions.
    #[must_use]
    pub fn aggregate_statistics(&self) -> CacheStatistics {
        let mut total = CacheStatistics::default();
        for snapshot in self.statistics().values() {
            total.merge(snapshot);
        }
        total
    }

    /// Clears every region's statistics counters.
    pub fn reset_statistics(&self) {
        for region in self.regions.read().values() {
            region.reset_statistics();
        }
        self.query_cache.reset_statistics();
    }

    /// The result-space version tracker shared with every region.
    #[must_use]
    pub fn result_space(&self) -> Arc<ResultSpaceVersions> {
        Arc::clone(&self.result_space)
    }

    /// Records a committed write to `entity_type` rows that did not go
    /// through a region's update protocol (inserts and deletes).
    ///
    /// Bumping the result-space version makes every cached query
    /// against that type stale.
    pub fn notify_committed_write(&self, entity_type: &str) {
        let version = self.result_space.bump(entity_type);
        tracing::debug!(entity_type, version, "result space advanced");
    }

    /// Returns the cached identifier list for a query key, if fresh.
    #[must_use]
    pub fn lookup_query(&self, key: &CacheKey) -> Option<Vec<EntityId>> {
        let version = self.result_space.current(key.entity_type());
        self.query_cache.lookup(key, version)
    }

    /// Caches the identifier list produced by a query execution,
    /// stamped with the current result-space version of the target
    /// type.
    pub fn store_query(&self, key: CacheKey, ids: Vec<EntityId>) {
        let version = self.result_space.current(key.entity_type());
        self.query_cache.store(key, ids, version);
    }

    /// Returns the fully resolved entries for a cached query, if every
    /// identifier still resolves through the entity cache.
    ///
    /// Any single miss returns `None` (whole-query atomicity): the
    /// engine must re-execute the query against the data source.
    #[must_use]
    pub fn lookup_query_resolved(&self, key: &CacheKey) -> Option<Vec<EntityEntry>> {
        let ids = self.lookup_query(key)?;
        let region = self.region(key.entity_type())?;
        resolve_refs(&region, &ids)
    }

    /// The query cache manager.
    #[must_use]
    pub const fn query_cache(&self) -> &QueryCacheManager {
        &self.query_cache
    }
}
