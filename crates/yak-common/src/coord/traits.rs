//! Coordination store contract.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Coordination store errors.
#[derive(Error, Debug)]
pub enum CoordError {
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Coordination store error: {0}")]
    Internal(String),
}

pub type CoordResult<T> = std::result::Result<T, CoordError>;

/// A value read from the store, together with the version that a
/// subsequent compare-and-swap must name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: String,
    pub version: u64,
}

/// Outcome of a compare-and-swap. A conflict is a normal result, not an
/// error: callers race for leadership by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The swap was applied; the entry now has this version.
    Committed(u64),
    /// Someone else changed (or created, or expired) the entry first.
    Conflict,
}

impl CasOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CasOutcome::Committed(_))
    }
}

/// Narrow key-value contract YAK requires from a coordination store.
///
/// Entries may carry a TTL; an expired entry behaves exactly like an
/// absent one for every operation. Versions are assigned by the store
/// and strictly increase per key across writes.
#[async_trait]
pub trait CoordStore: Send + Sync {
    /// Read a key. `None` if absent or expired.
    async fn get(&self, key: &str) -> CoordResult<Option<VersionedValue>>;

    /// Unconditionally write a key, returning the new version.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> CoordResult<u64>;

    /// Atomic compare-and-swap.
    ///
    /// `expected: None` succeeds only when the key is absent (or
    /// expired); `expected: Some(v)` succeeds only when the live entry
    /// still has version `v`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> CoordResult<CasOutcome>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> CoordResult<()>;

    /// List all live entries whose key starts with `prefix`.
    async fn list_prefix(&self, prefix: &str) -> CoordResult<Vec<(String, VersionedValue)>>;
}
