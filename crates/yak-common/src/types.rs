//! Common types used throughout YAK.

use serde::{Deserialize, Serialize};

/// Offset within a topic log. Dense and 0-based.
pub type Offset = u64;

/// Leadership epoch. Strictly increasing across elections.
pub type Epoch = u64;

/// Broker identifier.
pub type BrokerId = u32;

/// Timestamp in milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// A single record in a topic log.
///
/// This is both the wire representation and the on-disk JSONL line
/// format. `epoch` is the leadership epoch under which the record was
/// first appended; epochs are non-decreasing along a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub offset: Offset,
    pub topic: String,
    pub message: String,
    pub epoch: Epoch,
}

/// Network identity of a broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerInfo {
    pub broker_id: BrokerId,
    pub host: String,
    pub port: u16,
}

impl BrokerInfo {
    /// `host:port` form, suitable for URL construction.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Identity of the current leader, as observed through the lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub broker_id: BrokerId,
    pub host: String,
    pub port: u16,
    pub epoch: Epoch,
}

impl LeaderInfo {
    pub fn broker(&self) -> BrokerInfo {
        BrokerInfo {
            broker_id: self.broker_id,
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// The cluster-wide leader lease, stored under `yak:lease`.
///
/// `expires_at_ms` is advisory for observers; expiry enforcement lives in
/// the coordination store's TTL, and safety lives in epoch fencing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder: BrokerId,
    pub host: String,
    pub port: u16,
    pub epoch: Epoch,
    pub expires_at_ms: TimestampMs,
}

impl LeaseRecord {
    pub fn leader_info(&self) -> LeaderInfo {
        LeaderInfo {
            broker_id: self.holder,
            host: self.host.clone(),
            port: self.port,
            epoch: self.epoch,
        }
    }
}

/// Liveness entry written to `yak:brokers:<id>` by each broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub broker_id: BrokerId,
    pub host: String,
    pub port: u16,
    pub epoch: Epoch,
    pub ts_ms: TimestampMs,
}

impl HeartbeatRecord {
    pub fn broker(&self) -> BrokerInfo {
        BrokerInfo {
            broker_id: self.broker_id,
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> TimestampMs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
