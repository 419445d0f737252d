//! Leader-driven log replication.
//!
//! The leader pushes batches to every follower and advances the
//! high-water mark as acknowledgements arrive (`coordinator`); each
//! follower applies pushes, resolves divergence, and actively pulls to
//! catch up after restarts and leader changes (`worker`). Both sides
//! speak the wire types in `protocol`.

pub mod coordinator;
pub mod protocol;
pub mod worker;

pub use coordinator::ReplicationCoordinator;
pub use worker::{apply_push, ApplyError, ReplicationWorker};
