//! Cache entry types shared by the entity and query cache managers.
//!
//! Entries are immutable snapshots replaced wholesale on update
//! (copy-on-write), never mutated in place by readers. This avoids
//! aliasing hazards across threads: a reader holding a clone keeps
//! observing the snapshot it resolved, whatever concurrent writers do.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::key::{CacheKey, EntityId};
use crate::strategy::IsolationLevel;
use crate::sync::Arc;

/// Immutable snapshot of a loaded entity's state.
///
/// The payload is a field-value snapshot, never a live object graph.
#[derive(Debug, Clone)]
pub struct EntityEntry {
    /// Field values at load/commit time.
    pub state: Arc<serde_json::Value>,
    /// Version (or version timestamp) of the snapshot. Never regresses.
    pub version: u64,
}

impl EntityEntry {
    /// Creates a snapshot entry.
    #[must_use]
    pub fn new(state: serde_json::Value, version: u64) -> Self {
        Self {
            state: Arc::new(state),
            version,
        }
    }
}

/// Cached query result: entity identifiers only, never entity state.
///
/// Identifiers are re-resolved through the entity cache at read time,
/// so entity field updates are reflected without touching query
/// entries.
#[derive(Debug, Clone)]
pub struct QueryEntry {
    /// Ordered identifiers of the matching entities.
    pub ids: Vec<EntityId>,
    /// Result-space version of the target entity type at store time.
    pub result_space_version: u64,
}

/// Result of an entity cache probe.
#[derive(Debug, Clone)]
pub enum CacheResult {
    /// The entry was found.
    Hit(EntityEntry),
    /// Nothing cached for this key.
    Miss,
    /// A concurrent write is pending; treat as a miss for reads.
    Locked,
}

impl CacheResult {
    /// Returns true for a hit.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Returns the entry for a hit, `None` otherwise.
    #[must_use]
    pub fn entry(&self) -> Option<&EntityEntry> {
        match self {
            Self::Hit(entry) => Some(entry),
            Self::Miss | Self::Locked => None,
        }
    }
}

/// Soft lock placed on a key while a database write is in flight.
///
/// Invariant: at most one active lock per key. A key with an active
/// lock is a forced miss for all readers except the lock holder.
#[derive(Debug, Clone)]
pub struct SoftLock {
    /// Token identifying the owning writer.
    pub token: Uuid,
    /// When the lock was acquired.
    pub acquired_at: Instant,
    /// After this much time the lock is forcibly cleared.
    pub timeout: Duration,
    /// Isolation metadata (transactional strategy only).
    pub isolation: Option<IsolationLevel>,
    /// Entry staged by a transactional prepare, invisible until commit.
    pub pending: Option<EntityEntry>,
}

impl SoftLock {
    /// Creates a lock owned by `token`.
    #[must_use]
    pub fn new(token: Uuid, timeout: Duration, isolation: Option<IsolationLevel>) -> Self {
        Self {
            token,
            acquired_at: Instant::now(),
            timeout,
            isolation,
            pending: None,
        }
    }

    /// Returns true once the lock has outlived its timeout.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() > self.timeout
    }
}

/// Handle returned by `before_update`, identifying the owning writer.
#[derive(Debug, Clone)]
pub struct LockHandle {
    /// Key the lock covers.
    pub key: CacheKey,
    /// Unique transaction token of the owner.
    pub token: Uuid,
}
