//! In-memory implementation of CoordStore for testing and embedded
//! clusters.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::traits::*;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// In-memory implementation of CoordStore.
///
/// Several brokers in one process can share a single instance to form a
/// cluster, which is how the integration tests run multi-broker
/// scenarios without an external store.
pub struct InMemoryCoordStore {
    entries: RwLock<HashMap<String, Entry>>,
    next_version: AtomicU64,
}

impl InMemoryCoordStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
        }
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryCoordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordStore for InMemoryCoordStore {
    async fn get(&self, key: &str) -> CoordResult<Option<VersionedValue>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| VersionedValue {
                value: e.value.clone(),
                version: e.version,
            }))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> CoordResult<u64> {
        let mut entries = self.entries.write().await;
        let version = self.bump_version();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                version,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(version)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> CoordResult<CasOutcome> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        let current = entries.get(key).filter(|e| !e.is_expired(now));
        let matches = match (expected, current) {
            (None, None) => true,
            (Some(v), Some(e)) => e.version == v,
            _ => false,
        };
        if !matches {
            return Ok(CasOutcome::Conflict);
        }

        let version = self.bump_version();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                version,
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(CasOutcome::Committed(version))
    }

    async fn delete(&self, key: &str) -> CoordResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> CoordResult<Vec<(String, VersionedValue)>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let mut out: Vec<(String, VersionedValue)> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, e)| {
                (
                    k.clone(),
                    VersionedValue {
                        value: e.value.clone(),
                        version: e.version,
                    },
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
