//! Shared role/epoch/leader snapshot for one broker process.
//!
//! The lease manager is the primary writer; replication paths may fence
//! the view forward when they observe a higher epoch. Readers take a
//! cheap coherent snapshot, and background tasks subscribe to react to
//! role changes.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};
use yak_common::{Epoch, LeaderInfo};

/// Role of this broker in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Follower,
    Unknown,
}

/// One coherent view of (role, epoch, leader), replaced atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterView {
    pub role: Role,
    /// Highest epoch this broker has observed. Used to fence stale
    /// leaders; never moves backwards.
    pub epoch: Epoch,
    pub leader: Option<LeaderInfo>,
}

impl ClusterView {
    pub fn unknown() -> Self {
        Self {
            role: Role::Unknown,
            epoch: 0,
            leader: None,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

/// Process-global cluster state, published over a watch channel.
pub struct ClusterState {
    tx: watch::Sender<ClusterView>,
}

impl ClusterState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ClusterView::unknown());
        Self { tx }
    }

    /// Current snapshot.
    pub fn current(&self) -> ClusterView {
        self.tx.borrow().clone()
    }

    /// Receiver for tasks that must react to role changes.
    pub fn subscribe(&self) -> watch::Receiver<ClusterView> {
        self.tx.subscribe()
    }

    /// Replace the view. The epoch never regresses; a publish carrying
    /// an older epoch keeps the higher one already observed.
    pub fn publish(&self, view: ClusterView) {
        self.tx.send_modify(|current| {
            let epoch = current.epoch.max(view.epoch);
            *current = ClusterView { epoch, ..view };
        });
    }

    /// Fence the view forward after seeing a higher epoch from a peer
    /// (replication push or pull response). Demotes a stale leader.
    pub fn observe_leader(&self, leader: LeaderInfo) {
        self.tx.send_if_modified(|current| {
            if leader.epoch <= current.epoch {
                return false;
            }
            if current.role == Role::Leader {
                warn!(
                    stale_epoch = current.epoch,
                    new_epoch = leader.epoch,
                    new_leader = leader.broker_id,
                    "fenced by higher epoch, stepping down"
                );
            } else {
                info!(
                    epoch = leader.epoch,
                    leader = leader.broker_id,
                    "observed new leader"
                );
            }
            *current = ClusterView {
                role: Role::Follower,
                epoch: leader.epoch,
                leader: Some(leader.clone()),
            };
            true
        });
    }

    /// Drop leadership held at `epoch`, if still held. Used when a
    /// renewal fails or a replica answers 409.
    pub fn demote_from(&self, epoch: Epoch) {
        self.tx.send_if_modified(|current| {
            if current.role != Role::Leader || current.epoch != epoch {
                return false;
            }
            *current = ClusterView {
                role: Role::Unknown,
                epoch: current.epoch,
                leader: None,
            };
            true
        });
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leader(epoch: Epoch) -> LeaderInfo {
        LeaderInfo {
            broker_id: 9,
            host: "h".into(),
            port: 1,
            epoch,
        }
    }

    #[test]
    fn test_epoch_never_regresses() {
        let state = ClusterState::new();
        state.publish(ClusterView {
            role: Role::Follower,
            epoch: 5,
            leader: Some(leader(5)),
        });
        state.publish(ClusterView {
            role: Role::Unknown,
            epoch: 2,
            leader: None,
        });
        let view = state.current();
        assert_eq!(view.role, Role::Unknown);
        assert_eq!(view.epoch, 5);
    }

    #[test]
    fn test_observe_leader_fences_stale_leader() {
        let state = ClusterState::new();
        state.publish(ClusterView {
            role: Role::Leader,
            epoch: 3,
            leader: None,
        });

        // An older or equal epoch is ignored.
        state.observe_leader(leader(3));
        assert_eq!(state.current().role, Role::Leader);

        state.observe_leader(leader(4));
        let view = state.current();
        assert_eq!(view.role, Role::Follower);
        assert_eq!(view.epoch, 4);
        assert_eq!(view.leader.unwrap().broker_id, 9);
    }

    #[test]
    fn test_demote_only_matching_epoch() {
        let state = ClusterState::new();
        state.publish(ClusterView {
            role: Role::Leader,
            epoch: 7,
            leader: None,
        });

        state.demote_from(6);
        assert_eq!(state.current().role, Role::Leader);

        state.demote_from(7);
        let view = state.current();
        assert_eq!(view.role, Role::Unknown);
        assert_eq!(view.epoch, 7);
    }
}
