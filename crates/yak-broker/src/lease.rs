//! Lease-based leader election.
//!
//! Every broker runs one `LeaseManager` loop. It races a versioned
//! compare-and-swap on `yak:lease` to acquire leadership, renews while
//! holding it, and publishes the resulting (role, epoch, leader)
//! snapshot through `ClusterState`. Safety comes from CAS plus epoch
//! fencing; the TTL is only a liveness hint.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use yak_common::coord::{keys, CasOutcome, CoordStore};
use yak_common::{now_ms, Epoch, LeaseRecord};

use crate::cluster::{ClusterState, ClusterView, Role};
use crate::config::BrokerConfig;

pub struct LeaseManager {
    config: Arc<BrokerConfig>,
    coord: Arc<dyn CoordStore>,
    cluster: Arc<ClusterState>,
    /// Store version of the lease we hold, None while not leader.
    held_version: Option<u64>,
    /// Highest lease epoch ever observed, leader or not. Feeds the
    /// next-epoch computation so epochs stay strictly increasing even
    /// if the `yak:epoch` counter write was lost.
    last_seen_epoch: Epoch,
}

impl LeaseManager {
    pub fn new(
        config: Arc<BrokerConfig>,
        coord: Arc<dyn CoordStore>,
        cluster: Arc<ClusterState>,
    ) -> Self {
        Self {
            config,
            coord,
            cluster,
            held_version: None,
            last_seen_epoch: 0,
        }
    }

    /// Drive acquisition/renewal until shutdown, then release.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        // First attempt immediately so a fresh cluster elects without
        // waiting a full interval.
        self.tick().await;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.renew_interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        self.release().await;
    }

    async fn tick(&mut self) {
        let view = self.cluster.current();
        if view.role == Role::Leader {
            self.renew(view.epoch).await;
        } else {
            self.try_acquire().await;
        }
    }

    async fn try_acquire(&mut self) {
        let current = match self.coord.get(keys::LEASE_KEY).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "cannot reach coordination store, role unknown");
                self.cluster.publish(ClusterView {
                    role: Role::Unknown,
                    epoch: self.last_seen_epoch,
                    leader: None,
                });
                return;
            }
        };

        if let Some(entry) = current {
            let lease: LeaseRecord = match serde_json::from_str(&entry.value) {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, "unparsable lease record, treating leader as unknown");
                    return;
                }
            };
            self.last_seen_epoch = self.last_seen_epoch.max(lease.epoch);

            if lease.holder == self.config.broker_id {
                // Our own unexpired lease from a previous life: adopt
                // and continue renewing under the same epoch.
                self.held_version = Some(entry.version);
                info!(epoch = lease.epoch, "re-adopted own lease");
                self.cluster.publish(ClusterView {
                    role: Role::Leader,
                    epoch: lease.epoch,
                    leader: Some(self.config.leader_info(lease.epoch)),
                });
            } else {
                debug!(leader = lease.holder, epoch = lease.epoch, "following");
                self.cluster.publish(ClusterView {
                    role: Role::Follower,
                    epoch: lease.epoch,
                    leader: Some(lease.leader_info()),
                });
            }
            return;
        }

        // Lease absent or expired: race to create it.
        let epoch = match self.next_epoch().await {
            Ok(e) => e,
            Err(()) => return,
        };
        let record = LeaseRecord {
            holder: self.config.broker_id,
            host: self.config.host.clone(),
            port: self.config.port,
            epoch,
            expires_at_ms: now_ms() + self.config.lease_ttl.as_millis() as u64,
        };
        let value = match serde_json::to_string(&record) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to encode lease record");
                return;
            }
        };

        match self
            .coord
            .compare_and_swap(keys::LEASE_KEY, None, value, Some(self.config.lease_ttl))
            .await
        {
            Ok(CasOutcome::Committed(version)) => {
                self.held_version = Some(version);
                self.last_seen_epoch = epoch;
                info!(
                    broker_id = self.config.broker_id,
                    epoch, "acquired leadership"
                );
                // Best-effort: persist the counter for future elections.
                if let Err(e) = self
                    .coord
                    .put(keys::EPOCH_KEY, epoch.to_string(), None)
                    .await
                {
                    warn!(error = %e, "failed to persist epoch counter");
                }
                self.cluster.publish(ClusterView {
                    role: Role::Leader,
                    epoch,
                    leader: Some(self.config.leader_info(epoch)),
                });
            }
            Ok(CasOutcome::Conflict) => {
                debug!("lost election race");
            }
            Err(e) => {
                warn!(error = %e, "lease acquisition failed");
            }
        }
    }

    /// Next epoch: strictly above both the persisted counter and any
    /// lease epoch this broker has observed.
    async fn next_epoch(&self) -> Result<Epoch, ()> {
        let counter = match self.coord.get(keys::EPOCH_KEY).await {
            Ok(Some(entry)) => entry.value.trim().parse::<Epoch>().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                warn!(error = %e, "cannot read epoch counter");
                return Err(());
            }
        };
        Ok(counter.max(self.last_seen_epoch) + 1)
    }

    async fn renew(&mut self, epoch: Epoch) {
        let Some(version) = self.held_version else {
            warn!("leader without a held lease version, stepping down");
            self.step_down(epoch);
            return;
        };

        let record = LeaseRecord {
            holder: self.config.broker_id,
            host: self.config.host.clone(),
            port: self.config.port,
            epoch,
            expires_at_ms: now_ms() + self.config.lease_ttl.as_millis() as u64,
        };
        let value = match serde_json::to_string(&record) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to encode lease record");
                self.step_down(epoch);
                return;
            }
        };

        match self
            .coord
            .compare_and_swap(
                keys::LEASE_KEY,
                Some(version),
                value,
                Some(self.config.lease_ttl),
            )
            .await
        {
            Ok(CasOutcome::Committed(new_version)) => {
                self.held_version = Some(new_version);
                debug!(epoch, "lease renewed");
            }
            Ok(CasOutcome::Conflict) => {
                warn!(epoch, "lease renewal lost, stepping down");
                self.step_down(epoch);
            }
            Err(e) => {
                // Writes must stop immediately when the store cannot
                // confirm the lease is still ours.
                warn!(epoch, error = %e, "lease renewal unreachable, stepping down");
                self.step_down(epoch);
            }
        }
    }

    fn step_down(&mut self, epoch: Epoch) {
        self.held_version = None;
        self.cluster.demote_from(epoch);
    }

    /// Release the lease on clean shutdown so the next election does
    /// not wait for TTL expiry. The remaining race with expiry is
    /// harmless: epoch fencing, not the lease, protects the log.
    async fn release(&mut self) {
        if self.held_version.is_none() {
            return;
        }
        match self.coord.get(keys::LEASE_KEY).await {
            Ok(Some(entry)) => {
                if let Ok(lease) = serde_json::from_str::<LeaseRecord>(&entry.value) {
                    if lease.holder == self.config.broker_id {
                        if let Err(e) = self.coord.delete(keys::LEASE_KEY).await {
                            warn!(error = %e, "failed to release lease");
                        } else {
                            info!(epoch = lease.epoch, "released lease");
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read lease during release"),
        }
        self.held_version = None;
    }
}

/// Read the current leader from the coordination store.
pub async fn current_leader(
    coord: &dyn CoordStore,
) -> Result<Option<yak_common::LeaderInfo>, yak_common::coord::CoordError> {
    let entry = coord.get(keys::LEASE_KEY).await?;
    Ok(entry
        .and_then(|e| serde_json::from_str::<LeaseRecord>(&e.value).ok())
        .map(|l| l.leader_info()))
}
