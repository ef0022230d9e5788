//! Key-value store trait and error types
//!
//! Every component of the meter talks to persistent state through
//! [`KvStore`]. The trait only offers single-key primitives, each of which an
//! implementation must execute atomically:
//!
//! - hash reads and writes (`get_fields`, `set_fields`)
//! - numeric increment of one hash field, with an optional time-to-live
//!   (`incr_field`)
//! - compare-and-set of one numeric hash field (`compare_and_set_field`)
//! - unordered sets (`add_member`, `remove_member`, `members`)
//!
//! There is no multi-key transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by a key-value store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store could not be reached or the operation failed
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A value that should be numeric is not
    #[error("Corrupt value at {key}.{field}: {value}")]
    Corrupt {
        key: String,
        field: String,
        value: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Parse a numeric hash field, treating a missing field as zero
pub fn parse_counter(
    fields: &HashMap<String, String>,
    key: &str,
    field: &str,
) -> Result<i64, StoreError> {
    match fields.get(field) {
        None => Ok(0),
        Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            field: field.to_string(),
            value: raw.clone(),
        }),
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Atomic single-key operations over a shared key-value store
///
/// Keys hold either a hash (string fields to string values) or a set of
/// members. Expired keys behave exactly like absent keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read every field of a hash; empty when the key is absent
    async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Overwrite the given fields of a hash, leaving other fields alone
    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    /// Atomically add `delta` to a numeric field and return the new value
    ///
    /// A missing field starts at zero. When `ttl` is given and the key has no
    /// expiration yet, the key expires `ttl` after this call.
    async fn incr_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StoreError>;

    /// Set a numeric field to `new` only if it currently equals `expected`
    ///
    /// A missing field compares equal to zero. Returns whether the write
    /// happened.
    async fn compare_and_set_field(
        &self,
        key: &str,
        field: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError>;

    /// Add a member to a set, returning `true` if it was not present
    async fn add_member(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Remove a member from a set, returning `true` if it was present
    async fn remove_member(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// All members of a set, sorted
    async fn members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Every live key starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove a key of either kind, returning whether anything was removed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}
