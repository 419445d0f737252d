//! Broker-wide registry of topic logs.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use yak_common::{BrokerId, Offset};

use crate::error::{Result, StorageError};
use crate::log::TopicLog;

/// Per-topic counters exposed by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStatus {
    pub next_offset: Offset,
    pub hwm: Offset,
}

/// All topic logs of one broker, rooted at `<data_dir>/broker-<id>/`.
///
/// Each log sits behind its own `RwLock`: reads share, appends and
/// truncations exclude. The registry itself is a lock-free map.
pub struct LogStore {
    root: PathBuf,
    topics: DashMap<String, Arc<RwLock<TopicLog>>>,
}

impl LogStore {
    /// Open the store, recovering every topic already on disk.
    pub fn open(data_dir: &Path, broker_id: BrokerId) -> Result<Self> {
        let root = data_dir.join(format!("broker-{broker_id}"));
        fs::create_dir_all(&root)?;

        let store = Self {
            root,
            topics: DashMap::new(),
        };

        for entry in fs::read_dir(&store.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let log = TopicLog::open(&store.root, &name)?;
            info!(
                topic = %name,
                next_offset = log.next_offset(),
                hwm = log.hwm(),
                "recovered topic"
            );
            store
                .topics
                .insert(name, Arc::new(RwLock::new(log)));
        }

        Ok(store)
    }

    /// Create a new, empty topic. Errors if it already exists.
    pub fn create_topic(&self, name: &str) -> Result<()> {
        validate_topic_name(name)?;
        match self.topics.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StorageError::TopicExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let log = TopicLog::open(&self.root, name)?;
                slot.insert(Arc::new(RwLock::new(log)));
                Ok(())
            }
        }
    }

    /// Fetch a topic, creating it if missing. Used on the replication
    /// path, where followers materialize topics discovered from the
    /// leader.
    pub fn ensure_topic(&self, name: &str) -> Result<Arc<RwLock<TopicLog>>> {
        validate_topic_name(name)?;
        if let Some(log) = self.topics.get(name) {
            return Ok(log.clone());
        }
        match self.topics.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(slot) => Ok(slot.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let log = TopicLog::open(&self.root, name)?;
                let log = Arc::new(RwLock::new(log));
                slot.insert(log.clone());
                Ok(log)
            }
        }
    }

    /// Fetch an existing topic.
    pub fn topic(&self, name: &str) -> Result<Arc<RwLock<TopicLog>>> {
        self.topics
            .get(name)
            .map(|log| log.clone())
            .ok_or_else(|| StorageError::TopicNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    /// Sorted topic names.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of every topic's counters.
    pub async fn status(&self) -> BTreeMap<String, TopicStatus> {
        let mut out = BTreeMap::new();
        for name in self.topic_names() {
            if let Some(log) = self.topics.get(&name) {
                let log = log.clone();
                let guard = log.read().await;
                out.insert(
                    name,
                    TopicStatus {
                        next_offset: guard.next_offset(),
                        hwm: guard.hwm(),
                    },
                );
            }
        }
        out
    }
}

fn validate_topic_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 255
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidTopicName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_reject_duplicate() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path(), 1).unwrap();

        store.create_topic("orders").unwrap();
        assert!(matches!(
            store.create_topic("orders"),
            Err(StorageError::TopicExists(_))
        ));
        assert!(store.contains("orders"));
        assert!(matches!(
            store.topic("missing"),
            Err(StorageError::TopicNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_topic_names() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path(), 1).unwrap();

        for bad in ["", "..", "a/b", "topic name", &"x".repeat(256)] {
            assert!(
                matches!(
                    store.create_topic(bad),
                    Err(StorageError::InvalidTopicName(_))
                ),
                "accepted {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_reopen_recovers_topics() {
        let dir = TempDir::new().unwrap();
        {
            let store = LogStore::open(dir.path(), 7).unwrap();
            store.create_topic("a").unwrap();
            store.create_topic("b").unwrap();
            let log = store.topic("a").unwrap();
            let mut guard = log.write().await;
            guard.append("hello".into(), 1).unwrap();
            guard.set_hwm(1).unwrap();
        }

        let store = LogStore::open(dir.path(), 7).unwrap();
        assert_eq!(store.topic_names(), vec!["a".to_string(), "b".to_string()]);
        let status = store.status().await;
        assert_eq!(
            status["a"],
            TopicStatus {
                next_offset: 1,
                hwm: 1
            }
        );
        assert_eq!(
            status["b"],
            TopicStatus {
                next_offset: 0,
                hwm: 0
            }
        );
    }

    #[tokio::test]
    async fn test_brokers_are_isolated_by_id() {
        let dir = TempDir::new().unwrap();
        let s1 = LogStore::open(dir.path(), 1).unwrap();
        let s2 = LogStore::open(dir.path(), 2).unwrap();
        s1.create_topic("t").unwrap();
        assert!(!s2.contains("t"));
    }
}
