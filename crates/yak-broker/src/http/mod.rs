//! Broker HTTP surface.
//!
//! Handlers are thin: they check the role and epoch, then call into
//! storage or the replication layer. Every error maps onto the shared
//! code table (307 redirect, 400, 404, 409, 416, 503) via `ApiError`.

pub mod error;

mod cluster;
mod consume;
mod produce;
mod replicate;
mod topics;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use yak_common::coord::CoordStore;
use yak_common::Epoch;
use yak_storage::LogStore;

use crate::cluster::ClusterState;
use crate::config::BrokerConfig;
use error::ApiError;

pub use consume::ConsumeResponse;
pub use produce::ProduceResponse;
pub use topics::RegisterTopicResponse;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BrokerConfig>,
    pub storage: Arc<LogStore>,
    pub cluster: Arc<ClusterState>,
    pub coord: Arc<dyn CoordStore>,
}

/// Create the broker API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/register_topic", post(topics::register_topic))
        .route("/produce", post(produce::produce))
        .route("/consume", get(consume::consume))
        .route("/replicate/push", post(replicate::push))
        .route("/replicate/pull", get(replicate::pull))
        .route("/metadata/leader", get(cluster::leader))
        .route("/metadata/brokers", get(cluster::brokers))
        .route("/metadata/topics", get(topics::list_topics))
        .route("/health", get(cluster::health))
        .with_state(state)
}

/// Gate a write path on leadership, returning the epoch to act under.
fn require_leader(state: &AppState, path: &'static str) -> Result<Epoch, ApiError> {
    let view = state.cluster.current();
    if view.is_leader() {
        Ok(view.epoch)
    } else {
        let leader = view
            .leader
            .filter(|l| l.broker_id != state.config.broker_id);
        Err(ApiError::NotLeader { leader, path })
    }
}
