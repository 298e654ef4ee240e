//! Cache key construction for entities and query results.
//!
//! Keys must be stable across process restarts so that an external
//! region backend observes identical keys from different processes.
//! Entity keys are structural (type name + natural identifier +
//! optional tenant discriminator). Query keys are SHA-256 fingerprints
//! over a canonical binary encoding of the normalized query text, the
//! ordered parameter values and the target entity type, so logically
//! identical queries collide to the same key regardless of call-site
//! formatting.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Natural identifier of a cached entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    /// Numeric surrogate key.
    I64(i64),
    /// Textual natural key.
    Text(String),
    /// UUID key.
    Uuid(Uuid),
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self::I64(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self::Uuid(id)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I64(id) => write!(f, "{id}"),
            Self::Text(id) => write!(f, "{id}"),
            Self::Uuid(id) => write!(f, "{id}"),
        }
    }
}

/// A query parameter value with a canonical, type-stable encoding.
///
/// Values are canonicalized before hashing: floats are reduced to a
/// single bit pattern (`-0.0` folds into `0.0`, non-finite values are
/// rejected) and timestamps are epoch milliseconds, so logically equal
/// parameters always produce the same fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParamValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    I64(i64),
    /// Floating point. Must be finite to be encodable.
    F64(f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Point in time as milliseconds since the Unix epoch.
    Timestamp(i64),
    /// UUID.
    Uuid(Uuid),
    /// Ordered list of values (e.g. an IN-list).
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Converts a system time to a canonical timestamp parameter.
    ///
    /// # Errors
    ///
    /// Returns `KeyConstruction` for times before the Unix epoch.
    pub fn timestamp(time: std::time::SystemTime) -> Result<Self> {
        let millis = time
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| Error::KeyConstruction("timestamp predates the Unix epoch".to_string()))?
            .as_millis();
        let millis = i64::try_from(millis)
            .map_err(|_| Error::KeyConstruction("timestamp out of range".to_string()))?;
        Ok(Self::Timestamp(millis))
    }

    /// Converts a JSON value to a canonical parameter.
    ///
    /// # Errors
    ///
    /// Returns `KeyConstruction` for JSON objects (an object reference
    /// has no canonical encoding) and non-finite numbers.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::I64(i))
                } else if let Some(f) = n.as_f64() {
                    if f.is_finite() {
                        Ok(Self::F64(f))
                    } else {
                        Err(Error::KeyConstruction(
                            "non-finite number parameter".to_string(),
                        ))
                    }
                } else {
                    Err(Error::KeyConstruction(format!(
                        "number parameter '{n}' has no canonical encoding"
                    )))
                }
            }
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Array(items) => {
                let values: Result<Vec<_>> = items.iter().map(Self::from_json).collect();
                Ok(Self::List(values?))
            }
            serde_json::Value::Object(_) => Err(Error::KeyConstruction(
                "object parameters have no canonical encoding".to_string(),
            )),
        }
    }

    /// Returns the canonical form of this value.
    ///
    /// # Errors
    ///
    /// Returns `KeyConstruction` for non-finite floats.
    fn canonicalize(&self) -> Result<Self> {
        match self {
            Self::F64(f) => {
                if !f.is_finite() {
                    return Err(Error::KeyConstruction(format!(
                        "float parameter '{f}' has no canonical encoding"
                    )));
                }
                // Fold -0.0 into 0.0 so both encode identically.
                Ok(Self::F64(if *f == 0.0 { 0.0 } else { *f }))
            }
            Self::List(items) => {
                let values: Result<Vec<_>> = items.iter().map(Self::canonicalize).collect();
                Ok(Self::List(values?))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Composite key addressing one cache entry.
///
/// Equality and hashing are structural and stable across process
/// restarts; query keys compare by fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey {
    /// Key for a cached entity snapshot.
    Entity {
        /// Entity type (region) name.
        entity_type: String,
        /// Natural identifier.
        id: EntityId,
        /// Optional tenant discriminator.
        tenant: Option<String>,
    },
    /// Key for a cached query result.
    Query {
        /// Target entity type of the query.
        entity_type: String,
        /// SHA-256 fingerprint (hex) of the normalized query.
        fingerprint: String,
    },
}

impl CacheKey {
    /// Builds a key for an entity snapshot.
    pub fn for_entity(entity_type: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self::Entity {
            entity_type: entity_type.into(),
            id: id.into(),
            tenant: None,
        }
    }

    /// Builds a tenant-scoped key for an entity snapshot.
    pub fn for_entity_in_tenant(
        entity_type: impl Into<String>,
        id: impl Into<EntityId>,
        tenant: impl Into<String>,
    ) -> Self {
        Self::Entity {
            entity_type: entity_type.into(),
            id: id.into(),
            tenant: Some(tenant.into()),
        }
    }

    /// Builds a key for a query result.
    ///
    /// The query text is normalized (whitespace collapsed outside
    /// string literals) and the parameters are canonically encoded, so
    /// formatting differences at the call site do not fragment the
    /// cache.
    ///
    /// # Errors
    ///
    /// Returns `KeyConstruction` when a parameter cannot be canonically
    /// encoded.
    pub fn for_query(
        text: &str,
        params: &[ParamValue],
        entity_type: impl Into<String>,
    ) -> Result<Self> {
        let entity_type = entity_type.into();
        let normalized = normalize_query_text(text);
        let canonical: Result<Vec<_>> = params.iter().map(ParamValue::canonicalize).collect();
        let payload = bincode::serialize(&(&normalized, &canonical?, &entity_type))
            .map_err(|e| Error::KeyConstruction(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(b"strata-query-v1:");
        hasher.update(&payload);

        Ok(Self::Query {
            entity_type,
            fingerprint: hex::encode(hasher.finalize()),
        })
    }

    /// Returns the entity type this key belongs to.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        match self {
            Self::Entity { entity_type, .. } | Self::Query { entity_type, .. } => entity_type,
        }
    }

    /// Returns true for query keys.
    #[must_use]
    pub const fn is_query(&self) -> bool {
        matches!(self, Self::Query { .. })
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity {
                entity_type,
                id,
                tenant: Some(tenant),
            } => write!(f, "{entity_type}#{id}@{tenant}"),
            Self::Entity {
                entity_type,
                id,
                tenant: None,
            } => write!(f, "{entity_type}#{id}"),
            Self::Query {
                entity_type,
                fingerprint,
            } => write!(f, "{entity_type}?{}", &fingerprint[..fingerprint.len().min(16)]),
        }
    }
}

/// Collapses insignificant whitespace in a query string.
///
/// Runs of whitespace outside single-quoted literals are folded to a
/// single space; leading and trailing whitespace is dropped. The text
/// inside literals is preserved byte-for-byte.
#[must_use]
pub fn normalize_query_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_literal = false;
    let mut pending_space = false;

    for ch in text.chars() {
        if in_literal {
            out.push(ch);
            if ch == '\'' {
                in_literal = false;
            }
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if ch == '\'' {
            in_literal = true;
        }
        out.push(ch);
    }

    out
}
