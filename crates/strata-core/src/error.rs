//! Error types for Strata.
//!
//! This module provides a unified error type for all cache operations,
//! surfaced directly to the calling persistence engine as typed
//! failures: the cache never silently drops a write it cannot safely
//! apply.

use thiserror::Error;

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Strata operations.
///
/// Each variant includes a descriptive error message suitable for
/// end-users. Error codes follow the pattern `STRATA-XXX` for easy
/// debugging.
#[derive(Error, Debug)]
pub enum Error {
    /// Cache key construction failed (STRATA-001).
    ///
    /// Raised when a query parameter has no canonical encoding.
    #[error("[STRATA-001] Cannot build cache key: {0}")]
    KeyConstruction(String),

    /// Lock contention on a concurrent update (STRATA-002).
    #[error("[STRATA-002] Concurrent update conflict in region '{region}': {detail}")]
    ConcurrentUpdateConflict {
        /// Region in which the conflict occurred.
        region: String,
        /// What went wrong with the lock.
        detail: String,
    },

    /// Write attempted against a read-only region (STRATA-003).
    #[error("[STRATA-003] Region '{0}' is read-only; cached entries cannot be updated")]
    ImmutableEntry(String),

    /// Version regression guard tripped (STRATA-004).
    #[error("[STRATA-004] Stale write rejected in region '{region}': stored version {stored}, attempted {attempted}")]
    StaleWriteRejected {
        /// Region in which the write was rejected.
        region: String,
        /// Version of the entry currently cached.
        stored: u64,
        /// Version the caller attempted to store.
        attempted: u64,
    },

    /// Region already exists (STRATA-005).
    #[error("[STRATA-005] Region '{0}' already exists")]
    RegionExists(String),

    /// Region not found (STRATA-006).
    #[error("[STRATA-006] Region '{0}' not found")]
    RegionNotFound(String),

    /// Configuration error (STRATA-007).
    #[error("[STRATA-007] Configuration error: {0}")]
    Config(String),

    /// Internal error (STRATA-008).
    ///
    /// Indicates an unexpected internal error. Please report if encountered.
    #[error("[STRATA-008] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "STRATA-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::KeyConstruction(_) => "STRATA-001",
            Self::ConcurrentUpdateConflict { .. } => "STRATA-002",
            Self::ImmutableEntry(_) => "STRATA-003",
            Self::StaleWriteRejected { .. } => "STRATA-004",
            Self::RegionExists(_) => "STRATA-005",
            Self::RegionNotFound(_) => "STRATA-006",
            Self::Config(_) => "STRATA-007",
            Self::Internal(_) => "STRATA-008",
        }
    }

    /// Returns true if this error is recoverable.
    ///
    /// Every cache failure mode except an internal error degrades to
    /// "treat as miss": the caller can always fall back to the data
    /// source and retry.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

/// Conversion from configuration errors.
impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
