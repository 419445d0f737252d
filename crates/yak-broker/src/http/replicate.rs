//! Peer replication endpoints.

use axum::{
    extract::{Query, State},
    Json,
};

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::replication::protocol::{PullQuery, PullResponse, PushAck, PushRequest};
use crate::replication::worker::apply_push;

/// Leader-to-follower push.
pub async fn push(
    State(state): State<AppState>,
    Json(req): Json<PushRequest>,
) -> ApiResult<Json<PushAck>> {
    let ack = apply_push(&state.storage, &state.cluster, &req).await?;
    Ok(Json(ack))
}

/// Follower-initiated catch-up. Leader only.
pub async fn pull(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> ApiResult<Json<PullResponse>> {
    let view = state.cluster.current();
    if !view.is_leader() {
        return Err(ApiError::Conflict("not the leader".to_string()));
    }
    if query.epoch > view.epoch {
        // The caller has seen a newer leader than us; our own renewal
        // will notice shortly. Refuse to serve as an authority.
        return Err(ApiError::EpochStale {
            requested: view.epoch,
            current: query.epoch,
        });
    }

    let log = state.storage.topic(&query.topic)?;
    let guard = log.read().await;
    let base_offset = query.from.min(guard.next_offset());
    let records = guard.read(base_offset, state.config.replication_batch)?;

    Ok(Json(PullResponse {
        epoch: view.epoch,
        leader: state.config.broker_info(),
        base_offset,
        records,
        hwm: guard.hwm(),
        next_offset: guard.next_offset(),
    }))
}
