//! Coordination store abstraction for YAK.
//!
//! Leader election and broker registration need only a tiny contract
//! from the shared store: versioned get, put with TTL, atomic
//! compare-and-swap, delete, and prefix listing. Anything providing
//! those primitives can back a YAK cluster; the store itself is not part
//! of this codebase.

mod http;
mod memory;
mod traits;

pub mod keys;

pub use http::HttpCoordStore;
pub use memory::InMemoryCoordStore;
pub use traits::{CasOutcome, CoordError, CoordResult, CoordStore, VersionedValue};
