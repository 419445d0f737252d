//! Append-only per-topic log storage for YAK brokers.
//!
//! One JSONL segment file per topic plus a high-water-mark sidecar.
//! `TopicLog` owns a single topic's file pair; `LogStore` is the
//! broker-wide registry over all topics.

mod error;
mod log;
mod store;

pub use error::{Result, StorageError};
pub use log::TopicLog;
pub use store::{LogStore, TopicStatus};
