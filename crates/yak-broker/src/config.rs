//! Broker configuration.

use std::path::PathBuf;
use std::time::Duration;
use yak_common::{BrokerId, BrokerInfo, Epoch, LeaderInfo};

/// Static configuration of one broker process.
///
/// Timing defaults follow the cluster contract: the renew interval must
/// stay well under half the lease TTL, and the heartbeat TTL a few
/// multiples of the heartbeat interval.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub broker_id: BrokerId,
    /// Advertised host, what peers and clients connect to.
    pub host: String,
    /// Advertised port.
    pub port: u16,
    pub data_dir: PathBuf,
    pub lease_ttl: Duration,
    pub renew_interval: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_ttl: Duration,
    pub replication_poll: Duration,
    pub request_timeout: Duration,
    /// Max records per replication push or pull batch.
    pub replication_batch: usize,
}

impl BrokerConfig {
    pub fn new(broker_id: BrokerId, host: impl Into<String>, port: u16) -> Self {
        Self {
            broker_id,
            host: host.into(),
            port,
            data_dir: PathBuf::from("./data"),
            lease_ttl: Duration::from_secs(10),
            renew_interval: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(2),
            heartbeat_ttl: Duration::from_secs(6),
            replication_poll: Duration::from_millis(200),
            request_timeout: Duration::from_secs(5),
            replication_batch: 500,
        }
    }

    pub fn broker_info(&self) -> BrokerInfo {
        BrokerInfo {
            broker_id: self.broker_id,
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn leader_info(&self, epoch: Epoch) -> LeaderInfo {
        LeaderInfo {
            broker_id: self.broker_id,
            host: self.host.clone(),
            port: self.port,
            epoch,
        }
    }
}
