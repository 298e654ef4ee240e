//! Concurrency strategies governing cache consistency around writes.
//!
//! Each region is created with one strategy. Around a database write,
//! the strategies drive a per-key state machine over three states:
//!
//! - `Clean` - an entry is cached and no writer is pending
//! - `PendingWrite` - a soft lock is held by an in-flight writer
//! - `Invalidated` - nothing is cached for the key
//!
//! Read-only forbids the transition out of `Clean` entirely.
//! Nonstrict-read-write jumps straight to `Invalidated` on update.
//! Read-write and transactional go through `PendingWrite`; the
//! transactional variant additionally defers visibility of the new
//! entry until the owning transaction commits.

use serde::{Deserialize, Serialize};

/// Consistency policy for a cache region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConcurrencyStrategy {
    /// Entries are immutable after insertion; updates are rejected.
    ReadOnly,
    /// Updates invalidate immediately, accepting a narrow stale-read
    /// window; the entry re-populates on the next load.
    NonstrictReadWrite,
    /// Updates soft-lock the key; readers see a forced miss until the
    /// transaction outcome is known.
    #[default]
    ReadWrite,
    /// Like read-write, with two-phase visibility: prepare stages the
    /// value, commit publishes it, rollback discards it.
    Transactional,
}

impl ConcurrencyStrategy {
    /// Whether entries in the region may ever be updated.
    #[must_use]
    pub const fn allows_updates(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    /// Whether `before_update` removes the entry instead of locking it.
    #[must_use]
    pub const fn invalidates_on_update(&self) -> bool {
        matches!(self, Self::NonstrictReadWrite)
    }

    /// Whether `before_update` acquires a soft lock on the key.
    #[must_use]
    pub const fn locks_on_update(&self) -> bool {
        matches!(self, Self::ReadWrite | Self::Transactional)
    }

    /// Whether updates go through prepare/commit/rollback.
    #[must_use]
    pub const fn is_two_phase(&self) -> bool {
        matches!(self, Self::Transactional)
    }

    /// Canonical name, as used in configuration files.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::NonstrictReadWrite => "nonstrict-read-write",
            Self::ReadWrite => "read-write",
            Self::Transactional => "transactional",
        }
    }
}

impl std::fmt::Display for ConcurrencyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Isolation metadata carried on a transactional soft lock.
///
/// Recorded for the persistence engine's benefit; the cache itself has
/// no transaction manager to enforce it against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Read committed.
    #[default]
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable.
    Serializable,
}

/// Observable per-key state of the concurrency machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// An entry is cached and no writer is pending.
    Clean,
    /// A soft lock is held by an in-flight writer.
    PendingWrite,
    /// Nothing is cached for the key.
    Invalidated,
}
