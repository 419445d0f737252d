//! Shared types for the YAK log service.
//!
//! This crate holds what every other YAK crate needs: the record and
//! broker identity types, the workspace error type, and the narrow
//! coordination-store abstraction used for leader election and broker
//! registration.

pub mod coord;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    now_ms, BrokerId, BrokerInfo, Epoch, HeartbeatRecord, LeaderInfo, LeaseRecord, Offset, Record,
    TimestampMs,
};
