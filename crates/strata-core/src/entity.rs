//! Entity cache manager: per-entity-type regions mediating loads, puts
//! and invalidations under a configured concurrency strategy.
//!
//! All key mutations serialize through a sharded lock table (one
//! [`SoftLock`] slot per key), never through a region-wide mutex, so
//! unrelated keys proceed in parallel. `before_update`/`after_update`
//! pairs for the same key are linearizable: the single-lock-per-key
//! invariant means two writers' pairs never interleave.
//!
//! # Lock expiry
//!
//! A pending write older than the configured timeout is forcibly
//! cleared and the key invalidated, so a crashed writer cannot lock a
//! key out forever. Expiry is recovered locally (logged, not surfaced):
//! its purpose is self-healing after writer failure.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::entry::{CacheResult, EntityEntry, LockHandle, SoftLock};
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::query::ResultSpaceVersions;
use crate::region::{EvictionPolicy, InMemoryRegion, RegionStore};
use crate::stats::{CacheStatistics, RegionStats};
use crate::strategy::{ConcurrencyStrategy, IsolationLevel, KeyState};
use crate::sync::Arc;

/// Per-entity-type cache region.
///
/// The region name doubles as the entity type name: a region holds
/// snapshots of exactly one entity type.
pub struct EntityRegion {
    name: Arc<str>,
    strategy: ConcurrencyStrategy,
    store: Arc<dyn RegionStore<EntityEntry>>,
    /// Sharded per-key lock table; at most one active lock per key.
    locks: DashMap<CacheKey, SoftLock>,
    lock_timeout: Duration,
    ttl: Option<Duration>,
    stats: Arc<RegionStats>,
    versions: Arc<ResultSpaceVersions>,
}

impl EntityRegion {
    /// Creates a region over an explicit storage backend.
    #[must_use]
    pub fn new(
        name: impl Into<Arc<str>>,
        strategy: ConcurrencyStrategy,
        store: Arc<dyn RegionStore<EntityEntry>>,
        stats: Arc<RegionStats>,
        versions: Arc<ResultSpaceVersions>,
        lock_timeout: Duration,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            strategy,
            store,
            locks: DashMap::new(),
            lock_timeout,
            ttl,
            stats,
            versions,
        }
    }

    /// Creates a region backed by an in-process store.
    #[must_use]
    pub fn in_memory(
        name: &str,
        strategy: ConcurrencyStrategy,
        capacity: usize,
        lock_timeout: Duration,
    ) -> Self {
        let stats = Arc::new(RegionStats::new());
        let store = Arc::new(InMemoryRegion::new(
            name,
            capacity,
            EvictionPolicy::default(),
            Arc::clone(&stats),
        ));
        Self::new(
            name,
            strategy,
            store,
            stats,
            Arc::new(ResultSpaceVersions::new()),
            lock_timeout,
            None,
        )
    }

    /// Region (entity type) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Concurrency strategy the region was created with.
    #[must_use]
    pub const fn strategy(&self) -> ConcurrencyStrategy {
        self.strategy
    }

    /// Current number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the region holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Snapshot of the region's statistics counters.
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        self.stats.snapshot()
    }

    /// Clears the region's statistics counters.
    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Probes the cache for an entity snapshot.
    ///
    /// A key under an active soft lock is a forced miss (`Locked`) for
    /// every reader; the caller should load from the data source. An
    /// expired lock discovered here is cleared and the key treated as
    /// invalidated.
    pub fn lookup(&self, key: &CacheKey) -> CacheResult {
        if let Some(lock) = self.locks.get(key) {
            if lock.is_expired() {
                let token = lock.token;
                drop(lock);
                self.expire_lock(key, token);
                // fall through: the key is now invalidated
            } else {
                self.stats.record_miss();
                return CacheResult::Locked;
            }
        }
        match self.store.get(key) {
            Some(entry) => {
                self.stats.record_hit();
                CacheResult::Hit(entry)
            }
            None => {
                self.stats.record_miss();
                CacheResult::Miss
            }
        }
    }

    /// Populates the cache after the persistence engine loaded from the
    /// data source.
    ///
    /// Returns `Ok(true)` if the entry was inserted, `Ok(false)` if the
    /// insert was skipped (another writer holds the key, or the same
    /// version is already cached).
    ///
    /// # Errors
    ///
    /// Returns `StaleWriteRejected` when a newer version is already
    /// cached.
    pub fn after_load(
        &self,
        key: &CacheKey,
        state: serde_json::Value,
        version: u64,
    ) -> Result<bool> {
        loop {
            match self.locks.entry(key.clone()) {
                Entry::Occupied(occupied) => {
                    if occupied.get().is_expired() {
                        occupied.remove();
                        self.store.remove(key);
                        tracing::warn!(
                            region = %self.name,
                            key = %key,
                            "expired soft lock cleared during load"
                        );
                        continue;
                    }
                    // Another writer owns this key; skip the insert.
                    return Ok(false);
                }
                Entry::Vacant(vacant) => {
                    // The vacant slot pins the key's shard, making the
                    // version check and put a single atomic step.
                    let inserted = self.install_if_newer(key, EntityEntry::new(state, version))?;
                    drop(vacant);
                    return Ok(inserted);
                }
            }
        }
    }

    /// Acquires a soft lock ahead of a database write.
    ///
    /// # Errors
    ///
    /// Returns `ImmutableEntry` under the read-only strategy and
    /// `ConcurrentUpdateConflict` when an unexpired lock is already
    /// held.
    pub fn before_update(&self, key: &CacheKey) -> Result<LockHandle> {
        self.before_update_inner(key, None)
    }

    /// Like [`before_update`](Self::before_update), carrying explicit
    /// isolation metadata on the lock (transactional strategy).
    pub fn before_update_isolated(
        &self,
        key: &CacheKey,
        isolation: IsolationLevel,
    ) -> Result<LockHandle> {
        self.before_update_inner(key, Some(isolation))
    }

    fn before_update_inner(
        &self,
        key: &CacheKey,
        isolation: Option<IsolationLevel>,
    ) -> Result<LockHandle> {
        if !self.strategy.allows_updates() {
            return Err(Error::ImmutableEntry(self.name.to_string()));
        }

        let token = Uuid::new_v4();
        let handle = LockHandle {
            key: key.clone(),
            token,
        };

        if self.strategy.invalidates_on_update() {
            // Nonstrict: drop the entry now, repopulate on next load.
            // A concurrent reader may see stale data until the remove
            // lands; that window is the strategy's contract.
            self.store.remove(key);
            return Ok(handle);
        }

        let isolation = self
            .strategy
            .is_two_phase()
            .then(|| isolation.unwrap_or_default());

        match self.locks.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    tracing::warn!(
                        region = %self.name,
                        key = %key,
                        "expired soft lock displaced by new writer"
                    );
                    occupied.insert(SoftLock::new(token, self.lock_timeout, isolation));
                    self.store.remove(key);
                    Ok(handle)
                } else {
                    Err(self.conflict("soft lock already held by another writer"))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SoftLock::new(token, self.lock_timeout, isolation));
                Ok(handle)
            }
        }
    }

    /// Completes a write once the database transaction outcome is
    /// known.
    ///
    /// On commit the entry is replaced and the lock released; on
    /// rollback the lock is released without touching the entry,
    /// restoring pre-write visibility. Returns `Ok(true)` when a new
    /// entry became visible.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentUpdateConflict` when the handle no longer
    /// owns the key (the lock expired and was cleared or displaced),
    /// and `StaleWriteRejected` on a version regression.
    pub fn after_update(
        &self,
        handle: &LockHandle,
        new_state: serde_json::Value,
        new_version: u64,
        commit_succeeded: bool,
    ) -> Result<bool> {
        if !self.strategy.allows_updates() {
            return Err(Error::ImmutableEntry(self.name.to_string()));
        }
        if self.strategy.invalidates_on_update() {
            if commit_succeeded {
                self.versions.bump(&self.name);
            }
            return Ok(false);
        }

        match self.locks.entry(handle.key.clone()) {
            Entry::Occupied(occupied) => {
                if occupied.get().token != handle.token {
                    return Err(self.conflict("soft lock is held by another writer"));
                }
                let result = if commit_succeeded {
                    self.versions.bump(&self.name);
                    self.install(&handle.key, EntityEntry::new(new_state, new_version))
                } else {
                    Ok(false)
                };
                occupied.remove();
                result
            }
            Entry::Vacant(_) => Err(self.conflict("soft lock expired or was never acquired")),
        }
    }

    /// Stages the new entry on the soft lock without publishing it
    /// (transactional strategy, phase one).
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentUpdateConflict` when the handle no longer
    /// owns the key, and `Internal` when the region's strategy is not
    /// transactional.
    pub fn prepare_update(
        &self,
        handle: &LockHandle,
        new_state: serde_json::Value,
        new_version: u64,
    ) -> Result<()> {
        if !self.strategy.is_two_phase() {
            return Err(Error::Internal(format!(
                "prepare_update requires the transactional strategy (region '{}')",
                self.name
            )));
        }
        match self.locks.get_mut(&handle.key) {
            Some(mut lock) if lock.token == handle.token => {
                lock.pending = Some(EntityEntry::new(new_state, new_version));
                Ok(())
            }
            Some(_) => Err(self.conflict("soft lock is held by another writer")),
            None => Err(self.conflict("soft lock expired or was never acquired")),
        }
    }

    /// Publishes the staged entry and releases the lock (transactional
    /// strategy, commit). Returns `Ok(true)` when a staged entry became
    /// visible; `Ok(false)` when nothing was prepared.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`after_update`](Self::after_update).
    pub fn commit_update(&self, handle: &LockHandle) -> Result<bool> {
        if !self.strategy.is_two_phase() {
            return Err(Error::Internal(format!(
                "commit_update requires the transactional strategy (region '{}')",
                self.name
            )));
        }
        match self.locks.entry(handle.key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().token != handle.token {
                    return Err(self.conflict("soft lock is held by another writer"));
                }
                let pending = occupied.get_mut().pending.take();
                let result = match pending {
                    Some(entry) => {
                        self.versions.bump(&self.name);
                        self.install(&handle.key, entry)
                    }
                    None => Ok(false),
                };
                occupied.remove();
                result
            }
            Entry::Vacant(_) => Err(self.conflict("soft lock expired or was never acquired")),
        }
    }

    /// Discards the staged entry and releases the lock (transactional
    /// strategy, rollback). The previously cached entry, if any, stays
    /// visible untouched.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`after_update`](Self::after_update).
    pub fn rollback_update(&self, handle: &LockHandle) -> Result<()> {
        if !self.strategy.is_two_phase() {
            return Err(Error::Internal(format!(
                "rollback_update requires the transactional strategy (region '{}')",
                self.name
            )));
        }
        match self.locks.entry(handle.key.clone()) {
            Entry::Occupied(occupied) => {
                if occupied.get().token != handle.token {
                    return Err(self.conflict("soft lock is held by another writer"));
                }
                occupied.remove();
                Ok(())
            }
            Entry::Vacant(_) => Err(self.conflict("soft lock expired or was never acquired")),
        }
    }

    /// Unconditionally removes the entry and any soft lock for `key`.
    ///
    /// Used by the nonstrict strategy and explicit eviction commands.
    pub fn invalidate(&self, key: &CacheKey) {
        self.locks.remove(key);
        self.store.remove(key);
    }

    /// Removes every entry and lock in the region.
    pub fn evict_all(&self) {
        self.locks.clear();
        self.store.evict_all();
    }

    /// Observable state of the concurrency machine for `key`.
    #[must_use]
    pub fn key_state(&self, key: &CacheKey) -> KeyState {
        if let Some(lock) = self.locks.get(key) {
            if !lock.is_expired() {
                return KeyState::PendingWrite;
            }
        }
        if self.store.get(key).is_some() {
            KeyState::Clean
        } else {
            KeyState::Invalidated
        }
    }

    /// Clears an expired lock and invalidates the key.
    fn expire_lock(&self, key: &CacheKey, token: Uuid) {
        let removed = self
            .locks
            .remove_if(key, |_, lock| lock.token == token && lock.is_expired());
        if removed.is_some() {
            self.store.remove(key);
            tracing::warn!(
                region = %self.name,
                key = %key,
                "expired soft lock cleared; entry invalidated"
            );
        }
    }

    /// Version-guarded put that skips an idempotent same-version
    /// reload.
    fn install_if_newer(&self, key: &CacheKey, entry: EntityEntry) -> Result<bool> {
        if let Some(existing) = self.store.get(key) {
            if existing.version > entry.version {
                return Err(self.stale(existing.version, entry.version));
            }
            if existing.version == entry.version {
                return Ok(false);
            }
        }
        self.store.put(key.clone(), entry, self.ttl);
        self.stats.record_put();
        Ok(true)
    }

    /// Version-guarded put used on commit.
    fn install(&self, key: &CacheKey, entry: EntityEntry) -> Result<bool> {
        if let Some(existing) = self.store.get(key) {
            if existing.version > entry.version {
                return Err(self.stale(existing.version, entry.version));
            }
        }
        self.store.put(key.clone(), entry, self.ttl);
        self.stats.record_put();
        Ok(true)
    }

    fn conflict(&self, detail: &str) -> Error {
        Error::ConcurrentUpdateConflict {
            region: self.name.to_string(),
            detail: detail.to_string(),
        }
    }

    fn stale(&self, stored: u64, attempted: u64) -> Error {
        Error::StaleWriteRejected {
            region: self.name.to_string(),
            stored,
            attempted,
        }
    }
}
