//! Broker liveness reporting.
//!
//! Each broker writes `yak:brokers:<id>` with a TTL; a broker whose
//! entry has expired is dead for quorum purposes. The replication
//! coordinator and `/metadata/brokers` read the registry back through
//! `alive_brokers`.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use yak_common::coord::{keys, CoordError, CoordStore};
use yak_common::{now_ms, HeartbeatRecord};

use crate::cluster::ClusterState;
use crate::config::BrokerConfig;

pub struct HeartbeatReporter {
    config: Arc<BrokerConfig>,
    coord: Arc<dyn CoordStore>,
    cluster: Arc<ClusterState>,
}

impl HeartbeatReporter {
    pub fn new(
        config: Arc<BrokerConfig>,
        coord: Arc<dyn CoordStore>,
        cluster: Arc<ClusterState>,
    ) -> Self {
        Self {
            config,
            coord,
            cluster,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // Register right away so peers can see this broker before the
        // first interval elapses.
        self.beat().await;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.heartbeat_interval) => {
                    self.beat().await;
                }
                _ = shutdown.changed() => {
                    // Drop our registry entry for faster peer reaction;
                    // TTL expiry covers the unclean-exit case.
                    let key = keys::broker_key(self.config.broker_id);
                    if let Err(e) = self.coord.delete(&key).await {
                        debug!(error = %e, "failed to deregister on shutdown");
                    }
                    return;
                }
            }
        }
    }

    async fn beat(&self) {
        let record = HeartbeatRecord {
            broker_id: self.config.broker_id,
            host: self.config.host.clone(),
            port: self.config.port,
            epoch: self.cluster.current().epoch,
            ts_ms: now_ms(),
        };
        let value = match serde_json::to_string(&record) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to encode heartbeat");
                return;
            }
        };
        let key = keys::broker_key(self.config.broker_id);
        if let Err(e) = self
            .coord
            .put(&key, value, Some(self.config.heartbeat_ttl))
            .await
        {
            warn!(error = %e, "heartbeat write failed");
        }
    }
}

/// Registry snapshot: every broker with a live heartbeat, sorted by id.
pub async fn alive_brokers(coord: &dyn CoordStore) -> Result<Vec<HeartbeatRecord>, CoordError> {
    let entries = coord.list_prefix(keys::BROKERS_PREFIX).await?;
    let mut brokers: Vec<HeartbeatRecord> = entries
        .iter()
        .filter_map(|(key, entry)| match serde_json::from_str(&entry.value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "skipping unparsable heartbeat entry");
                None
            }
        })
        .collect();
    brokers.sort_by_key(|b| b.broker_id);
    Ok(brokers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use yak_common::coord::InMemoryCoordStore;

    #[tokio::test]
    async fn test_beat_registers_and_expires() {
        let coord = Arc::new(InMemoryCoordStore::new());
        let mut config = BrokerConfig::new(3, "127.0.0.1", 7003);
        config.heartbeat_ttl = Duration::from_millis(50);
        let reporter = HeartbeatReporter::new(
            Arc::new(config),
            coord.clone() as Arc<dyn CoordStore>,
            Arc::new(ClusterState::new()),
        );

        reporter.beat().await;
        let brokers = alive_brokers(coord.as_ref()).await.unwrap();
        assert_eq!(brokers.len(), 1);
        assert_eq!(brokers[0].broker_id, 3);
        assert_eq!(brokers[0].port, 7003);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(alive_brokers(coord.as_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alive_brokers_sorted_and_tolerant() {
        let coord = Arc::new(InMemoryCoordStore::new());
        for id in [5u32, 2, 9] {
            let config = BrokerConfig::new(id, "127.0.0.1", 7000 + id as u16);
            HeartbeatReporter::new(
                Arc::new(config),
                coord.clone() as Arc<dyn CoordStore>,
                Arc::new(ClusterState::new()),
            )
            .beat()
            .await;
        }
        coord
            .put("yak:brokers:garbage", "not json".into(), None)
            .await
            .unwrap();

        let brokers = alive_brokers(coord.as_ref()).await.unwrap();
        let ids: Vec<u32> = brokers.iter().map(|b| b.broker_id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }
}
