//! Cluster metadata and health endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use yak_common::{BrokerId, Epoch, HeartbeatRecord, LeaderInfo};
use yak_storage::TopicStatus;

use super::error::ApiResult;
use super::AppState;
use crate::cluster::Role;
use crate::heartbeat::alive_brokers;
use crate::lease::current_leader;

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderResponse {
    pub leader: Option<LeaderInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BrokersResponse {
    pub brokers: Vec<HeartbeatRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub broker_id: BrokerId,
    pub role: Role,
    pub epoch: Epoch,
    pub topics: BTreeMap<String, TopicStatus>,
}

/// Current leader according to the coordination store, falling back to
/// this broker's local view when the store is unreachable.
pub async fn leader(State(state): State<AppState>) -> Json<LeaderResponse> {
    let leader = match current_leader(state.coord.as_ref()).await {
        Ok(leader) => leader,
        Err(e) => {
            warn!(error = %e, "coordination store unreachable, using local view");
            state.cluster.current().leader
        }
    };
    Json(LeaderResponse { leader })
}

/// Registry snapshot of live brokers.
pub async fn brokers(State(state): State<AppState>) -> ApiResult<Json<BrokersResponse>> {
    let brokers = alive_brokers(state.coord.as_ref()).await?;
    Ok(Json(BrokersResponse { brokers }))
}

/// Local role, epoch, and per-topic counters.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let view = state.cluster.current();
    Json(HealthResponse {
        broker_id: state.config.broker_id,
        role: view.role,
        epoch: view.epoch,
        topics: state.storage.status().await,
    })
}
