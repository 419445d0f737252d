//! Well-known coordination store keys.

use crate::types::BrokerId;

/// Cluster-wide leader lease.
pub const LEASE_KEY: &str = "yak:lease";

/// Monotonic epoch counter, bumped on every successful acquisition.
pub const EPOCH_KEY: &str = "yak:epoch";

/// Prefix for per-broker heartbeat entries.
pub const BROKERS_PREFIX: &str = "yak:brokers:";

/// Heartbeat key for one broker.
pub fn broker_key(id: BrokerId) -> String {
    format!("{BROKERS_PREFIX}{id}")
}
