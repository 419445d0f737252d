//! Follower-side replication: applying pushes and pulling to catch up.

use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use yak_common::{Epoch, LeaderInfo, Offset};
use yak_storage::{LogStore, StorageError};

use crate::cluster::{ClusterState, Role};
use crate::config::BrokerConfig;
use crate::replication::protocol::{PullResponse, PushAck, PushRequest};

/// Bound on apply/pull rounds per topic per sync cycle, so one cycle
/// cannot spin forever against a log that keeps moving.
const MAX_SYNC_ROUNDS: usize = 64;

/// Why a push could not be applied. The first two map onto the 409/416
/// replies of the push endpoint.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("epoch {requested} is stale, highest observed is {current}")]
    EpochStale { requested: Epoch, current: Epoch },

    #[error("offset mismatch, log ends at {follower_end} (epoch {follower_end_epoch})")]
    OffsetMismatch {
        follower_end: Offset,
        follower_end_epoch: Epoch,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Apply one replication batch to the local log.
///
/// Shared by the `/replicate/push` handler and the pull loop, so push
/// and pull replication behave identically:
///
/// 1. Epochs below our highest observed are rejected outright; a higher
///    epoch fences the local view forward to the new leader.
/// 2. A batch that continues the log exactly is appended.
/// 3. Anything else is divergence: the uncommitted suffix is pruned
///    back to the local hwm (never below) and the caller learns where
///    the log now ends. The committed prefix is identical on both
///    sides by induction, so the leader resending from there is safe.
/// 4. The leader's hwm is adopted, clamped to the local log end.
pub async fn apply_push(
    storage: &LogStore,
    cluster: &ClusterState,
    req: &PushRequest,
) -> Result<PushAck, ApplyError> {
    let view = cluster.current();
    if req.epoch < view.epoch {
        return Err(ApplyError::EpochStale {
            requested: req.epoch,
            current: view.epoch,
        });
    }
    if req.epoch > view.epoch {
        cluster.observe_leader(LeaderInfo {
            broker_id: req.leader.broker_id,
            host: req.leader.host.clone(),
            port: req.leader.port,
            epoch: req.epoch,
        });
    }

    let log = storage.ensure_topic(&req.topic)?;
    let mut guard = log.write().await;

    let next = guard.next_offset();
    let contiguous = req.base_offset == next
        && req
            .records
            .first()
            .map(|r| r.epoch >= guard.last_epoch())
            .unwrap_or(true);

    if !contiguous {
        let old_end = next;
        let hwm = guard.hwm();
        guard.truncate_to(hwm)?;
        info!(
            topic = %req.topic,
            base_offset = req.base_offset,
            old_end,
            pruned_to = hwm,
            "divergent replica log, pruned uncommitted suffix"
        );
        return Err(ApplyError::OffsetMismatch {
            follower_end: guard.next_offset(),
            follower_end_epoch: guard.last_epoch(),
        });
    }

    for record in &req.records {
        guard.append_replica(record.clone())?;
    }

    let target = req.hwm.min(guard.next_offset());
    if target > guard.hwm() {
        guard.set_hwm(target)?;
    }

    Ok(PushAck {
        ack_end_offset: guard.next_offset(),
        hwm: guard.hwm(),
    })
}

/// Background catch-up loop: while this broker is a follower, pull
/// from the current leader until the local log and hwm converge.
///
/// Pushes from the leader normally keep a healthy follower current;
/// the pull loop covers bootstrap, restart, and the window after a
/// leader change when the new leader does not know us yet.
pub struct ReplicationWorker {
    config: Arc<BrokerConfig>,
    storage: Arc<LogStore>,
    cluster: Arc<ClusterState>,
    client: reqwest::Client,
}

impl ReplicationWorker {
    pub fn new(
        config: Arc<BrokerConfig>,
        storage: Arc<LogStore>,
        cluster: Arc<ClusterState>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            storage,
            cluster,
            client,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.replication_poll) => {}
                _ = shutdown.changed() => return,
            }
            let view = self.cluster.current();
            if view.role != Role::Follower {
                continue;
            }
            let Some(leader) = view.leader else { continue };
            if leader.broker_id == self.config.broker_id {
                continue;
            }
            if let Err(e) = self.sync_with(&leader).await {
                debug!(leader = leader.broker_id, error = %e, "catch-up cycle failed");
            }
        }
    }

    async fn sync_with(&self, leader: &LeaderInfo) -> yak_common::Result<()> {
        let mut topics: BTreeSet<String> = self.storage.topic_names().into_iter().collect();
        topics.extend(self.fetch_leader_topics(leader).await?);

        for topic in topics {
            self.sync_topic(leader, &topic).await?;
        }
        Ok(())
    }

    async fn fetch_leader_topics(&self, leader: &LeaderInfo) -> yak_common::Result<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct TopicsResponse {
            topics: Vec<String>,
        }

        let resp = self
            .client
            .get(format!("{}/metadata/topics", leader.base_url()))
            .send()
            .await
            .map_err(|e| yak_common::Error::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(yak_common::Error::Network(format!(
                "topic discovery against {} failed with {}",
                leader.base_url(),
                resp.status()
            )));
        }
        let body: TopicsResponse = resp
            .json()
            .await
            .map_err(|e| yak_common::Error::Serialization(e.to_string()))?;
        Ok(body.topics)
    }

    async fn sync_topic(&self, leader: &LeaderInfo, topic: &str) -> yak_common::Result<()> {
        for _ in 0..MAX_SYNC_ROUNDS {
            let log = self.storage.ensure_topic(topic).map_err(yak_common::Error::from)?;
            let from = log.read().await.next_offset();

            let resp = self
                .client
                .get(format!("{}/replicate/pull", leader.base_url()))
                .query(&[
                    ("topic", topic.to_string()),
                    ("from", from.to_string()),
                    ("epoch", leader.epoch.to_string()),
                ])
                .send()
                .await
                .map_err(|e| yak_common::Error::Network(e.to_string()))?;

            match resp.status().as_u16() {
                200 => {}
                404 => return Ok(()), // topic gone from the leader's view
                409 => {
                    debug!(topic, "pull rejected for epoch mismatch, awaiting new view");
                    return Ok(());
                }
                other => {
                    return Err(yak_common::Error::Network(format!(
                        "pull for '{topic}' failed with {other}"
                    )))
                }
            }

            let pull: PullResponse = resp
                .json()
                .await
                .map_err(|e| yak_common::Error::Serialization(e.to_string()))?;

            let push = PushRequest {
                epoch: pull.epoch,
                leader: pull.leader.clone(),
                topic: topic.to_string(),
                base_offset: pull.base_offset,
                records: pull.records,
                hwm: pull.hwm,
            };
            let batch = push.records.len();
            match apply_push(&self.storage, &self.cluster, &push).await {
                Ok(ack) => {
                    if batch > 0 {
                        info!(
                            topic,
                            applied = batch,
                            log_end = ack.ack_end_offset,
                            hwm = ack.hwm,
                            "caught up from leader"
                        );
                    }
                    if batch == 0 && ack.ack_end_offset >= pull.next_offset {
                        return Ok(()); // converged
                    }
                }
                Err(ApplyError::OffsetMismatch { follower_end, .. }) => {
                    debug!(topic, follower_end, "pruned local divergence, re-pulling");
                }
                Err(ApplyError::EpochStale { requested, current }) => {
                    debug!(topic, requested, current, "leader view is stale, awaiting update");
                    return Ok(());
                }
                Err(ApplyError::Storage(e)) => return Err(yak_common::Error::from(e)),
            }
        }
        warn!(topic, "catch-up did not converge this cycle");
        Ok(())
    }
}
