//! Replication wire types.

use serde::{Deserialize, Serialize};
use yak_common::{BrokerInfo, Epoch, Offset, Record};

/// Leader-to-follower push: records continuing the follower's log at
/// `base_offset`, plus the leader's current high-water mark. An empty
/// batch is a valid push and carries the hwm on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub epoch: Epoch,
    pub leader: BrokerInfo,
    pub topic: String,
    pub base_offset: Offset,
    pub records: Vec<Record>,
    pub hwm: Offset,
}

/// Successful push acknowledgement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PushAck {
    /// Follower log end after applying the batch. Everything below is
    /// durably stored on the follower.
    pub ack_end_offset: Offset,
    /// Follower's high-water mark after adopting the leader's.
    pub hwm: Offset,
}

/// Body of a `416` reply: where the follower's log actually ends after
/// it pruned its uncommitted suffix. The leader resumes from here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OffsetMismatchBody {
    pub follower_end: Offset,
    pub follower_end_epoch: Epoch,
}

/// Follower-initiated catch-up query.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PullQuery {
    pub topic: String,
    pub from: Offset,
    pub epoch: Epoch,
}

/// Catch-up response. `base_offset` is where `records` begins, which
/// is `from` clamped to the leader's log end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    pub epoch: Epoch,
    pub leader: BrokerInfo,
    pub base_offset: Offset,
    pub records: Vec<Record>,
    pub hwm: Offset,
    pub next_offset: Offset,
}
