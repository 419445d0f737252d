//! Leader-side replication: per-follower push tasks and high-water
//! mark advancement.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use yak_common::coord::CoordStore;
use yak_common::{BrokerInfo, Epoch, Offset};
use yak_storage::LogStore;

use crate::cluster::ClusterState;
use crate::config::BrokerConfig;
use crate::heartbeat::alive_brokers;
use crate::replication::protocol::{OffsetMismatchBody, PushAck, PushRequest};

/// Cap on the retry backoff of a push task.
const MAX_PUSH_BACKOFF: Duration = Duration::from_secs(2);

/// Replication state the leader keeps per follower and topic: the
/// highest offset that follower has acknowledged as durably stored.
type MatchOffsets = Arc<DashMap<(u32, String), Offset>>;

/// Runs on every broker; does nothing until the local view turns
/// LEADER, then drives replication for exactly that epoch and winds
/// down when the epoch ends.
pub struct ReplicationCoordinator {
    config: Arc<BrokerConfig>,
    storage: Arc<LogStore>,
    cluster: Arc<ClusterState>,
    coord: Arc<dyn CoordStore>,
    client: reqwest::Client,
}

impl ReplicationCoordinator {
    pub fn new(
        config: Arc<BrokerConfig>,
        storage: Arc<LogStore>,
        cluster: Arc<ClusterState>,
        coord: Arc<dyn CoordStore>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            storage,
            cluster,
            coord,
            client,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut views = self.cluster.subscribe();
        loop {
            let view = views.borrow_and_update().clone();
            if view.is_leader() {
                self.lead(view.epoch, &mut views, &mut shutdown).await;
                if *shutdown.borrow() {
                    return;
                }
            } else {
                tokio::select! {
                    changed = views.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        }
    }

    /// Replicate for one leadership term. Returns when the local view
    /// leaves (LEADER, `epoch`) or on shutdown.
    async fn lead(
        &self,
        epoch: Epoch,
        views: &mut watch::Receiver<crate::cluster::ClusterView>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        // The acknowledgement quorum is fixed against the brokers alive
        // at the start of the epoch. Brokers that join later catch up
        // via pull and simply over-achieve the quorum.
        let followers = loop {
            match alive_brokers(self.coord.as_ref()).await {
                Ok(brokers) => {
                    break brokers
                        .into_iter()
                        .map(|b| b.broker())
                        .filter(|b| b.broker_id != self.config.broker_id)
                        .collect::<Vec<_>>()
                }
                Err(e) => {
                    warn!(error = %e, "cannot read broker registry for quorum");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.renew_interval) => {}
                        _ = views.changed() => return,
                        _ = shutdown.changed() => return,
                    }
                }
            }
        };

        let cluster_size = followers.len() + 1;
        let majority = cluster_size / 2 + 1;
        info!(
            epoch,
            followers = followers.len(),
            majority,
            "replication coordinator active"
        );

        let match_offsets: MatchOffsets = Arc::new(DashMap::new());
        let (stop_tx, _) = watch::channel(false);
        let mut tasks: Vec<JoinHandle<()>> = followers
            .iter()
            .map(|follower| {
                let task = PushTask {
                    config: self.config.clone(),
                    storage: self.storage.clone(),
                    cluster: self.cluster.clone(),
                    client: self.client.clone(),
                    follower: follower.clone(),
                    epoch,
                    match_offsets: match_offsets.clone(),
                };
                tokio::spawn(task.run(stop_tx.subscribe()))
            })
            .collect();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.replication_poll) => {
                    self.advance_hwm(&followers, &match_offsets, majority).await;
                }
                _ = views.changed() => {
                    let view = views.borrow().clone();
                    if !view.is_leader() || view.epoch != epoch {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(epoch, "replication coordinator stopping");
        let _ = stop_tx.send(true);
        for task in tasks.drain(..) {
            // In-flight pushes may still complete on the follower; the
            // acks are simply never read.
            task.abort();
        }
    }

    /// Recompute the committed offset of every topic from follower
    /// acknowledgements.
    async fn advance_hwm(
        &self,
        followers: &[BrokerInfo],
        match_offsets: &MatchOffsets,
        majority: usize,
    ) {
        for topic in self.storage.topic_names() {
            let Ok(log) = self.storage.topic(&topic) else {
                continue;
            };
            let acked: Vec<Offset> = followers
                .iter()
                .map(|f| {
                    match_offsets
                        .get(&(f.broker_id, topic.clone()))
                        .map(|v| *v)
                        .unwrap_or(0)
                })
                .collect();

            let mut guard = log.write().await;
            let hwm = committed_offset(guard.next_offset(), &acked, majority);
            if hwm > guard.hwm() {
                debug!(topic = %topic, hwm, "advancing high-water mark");
                if let Err(e) = guard.set_hwm(hwm) {
                    warn!(topic = %topic, error = %e, "failed to advance hwm");
                }
            }
        }
    }
}

/// Largest offset acknowledged by a majority of the cluster, with the
/// leader's own log end counting as one acknowledgement.
fn committed_offset(leader_end: Offset, follower_acks: &[Offset], majority: usize) -> Offset {
    let mut acked: Vec<Offset> = follower_acks.to_vec();
    acked.push(leader_end);
    acked.sort_unstable_by(|a, b| b.cmp(a));
    acked
        .get(majority.saturating_sub(1))
        .copied()
        .unwrap_or(0)
        .min(leader_end)
}

/// Pushes the tail of every topic to one follower, one outstanding
/// batch at a time, and records acknowledgements in `match_offsets`.
struct PushTask {
    config: Arc<BrokerConfig>,
    storage: Arc<LogStore>,
    cluster: Arc<ClusterState>,
    client: reqwest::Client,
    follower: BrokerInfo,
    epoch: Epoch,
    match_offsets: MatchOffsets,
}

enum PushFailure {
    /// The follower fenced us off; this term is over.
    SteppedDown,
    /// Peer unreachable or timed out; retry with backoff.
    Network(String),
}

impl PushTask {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut backoff = self.config.replication_poll;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = stop.changed() => return,
            }

            let mut network_trouble = false;
            for topic in self.storage.topic_names() {
                match self.push_topic(&topic).await {
                    Ok(()) => {}
                    Err(PushFailure::SteppedDown) => {
                        self.cluster.demote_from(self.epoch);
                        return;
                    }
                    Err(PushFailure::Network(reason)) => {
                        debug!(
                            follower = self.follower.broker_id,
                            topic = %topic,
                            reason,
                            "push failed, backing off"
                        );
                        network_trouble = true;
                        break;
                    }
                }
            }

            backoff = if network_trouble {
                (backoff * 2).min(MAX_PUSH_BACKOFF)
            } else {
                self.config.replication_poll
            };
        }
    }

    async fn push_topic(&self, topic: &str) -> Result<(), PushFailure> {
        let Ok(log) = self.storage.topic(topic) else {
            return Ok(());
        };

        let key = (self.follower.broker_id, topic.to_string());
        let (request, base_offset) = {
            let guard = log.read().await;
            let match_offset = self
                .match_offsets
                .get(&key)
                .map(|v| *v)
                .unwrap_or(0)
                .min(guard.next_offset());
            let records = match guard.read(match_offset, self.config.replication_batch) {
                Ok(records) => records,
                Err(e) => {
                    warn!(topic, error = %e, "replication read failed");
                    return Ok(());
                }
            };
            (
                PushRequest {
                    epoch: self.epoch,
                    leader: self.config.broker_info(),
                    topic: topic.to_string(),
                    base_offset: match_offset,
                    records,
                    hwm: guard.hwm(),
                },
                match_offset,
            )
        };
        let batch = request.records.len();

        let resp = self
            .client
            .post(format!("{}/replicate/push", self.follower.base_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| PushFailure::Network(e.to_string()))?;

        match resp.status().as_u16() {
            200 => {
                let ack: PushAck = resp
                    .json()
                    .await
                    .map_err(|e| PushFailure::Network(e.to_string()))?;
                if ack.ack_end_offset >= base_offset {
                    self.match_offsets.insert(key, ack.ack_end_offset);
                    if batch > 0 {
                        info!(
                            follower = self.follower.broker_id,
                            topic,
                            replicated = batch,
                            ack_end = ack.ack_end_offset,
                            "replicated batch"
                        );
                    }
                }
                Ok(())
            }
            409 => {
                warn!(
                    follower = self.follower.broker_id,
                    epoch = self.epoch,
                    "follower rejected our epoch, stepping down"
                );
                Err(PushFailure::SteppedDown)
            }
            416 => {
                let hint: OffsetMismatchBody = resp
                    .json()
                    .await
                    .map_err(|e| PushFailure::Network(e.to_string()))?;
                info!(
                    follower = self.follower.broker_id,
                    topic,
                    follower_end = hint.follower_end,
                    "follower log diverged, resyncing from its committed end"
                );
                self.match_offsets.insert(key, hint.follower_end);
                Ok(())
            }
            other => {
                debug!(
                    follower = self.follower.broker_id,
                    topic, status = other, "unexpected push response"
                );
                Ok(())
            }
        }
    }
}
