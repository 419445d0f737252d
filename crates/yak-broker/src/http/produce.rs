//! Producer write path.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use yak_common::Offset;

use super::error::{ApiError, ApiResult};
use super::{require_leader, AppState};

#[derive(Debug, Deserialize)]
pub struct ProduceRequest {
    pub topic: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProduceResponse {
    /// Offset assigned to the record. Not yet necessarily committed.
    pub offset: Offset,
    /// Committed bound at the time of the append.
    pub hwm: Offset,
}

/// Append one record on the leader.
///
/// The write is acknowledged as soon as it is durable locally; the
/// returned `hwm` tells the producer how far the committed prefix
/// currently reaches.
pub async fn produce(
    State(state): State<AppState>,
    Json(req): Json<ProduceRequest>,
) -> ApiResult<Json<ProduceResponse>> {
    let epoch = require_leader(&state, "/produce")?;
    let log = state.storage.topic(&req.topic)?;
    let mut guard = log.write().await;

    // The lease may have moved while we waited for the log lock.
    let view = state.cluster.current();
    if !view.is_leader() || view.epoch != epoch {
        return Err(ApiError::NotLeader {
            leader: view
                .leader
                .filter(|l| l.broker_id != state.config.broker_id),
            path: "/produce",
        });
    }

    let offset = match guard.append(req.message, epoch) {
        Ok(offset) => offset,
        Err(e @ yak_storage::StorageError::Io(_)) => {
            // A leader that cannot write its log must stop taking
            // writes; the lease manager re-evaluates the role from
            // there.
            error!(topic = %req.topic, epoch, error = %e, "append failed, stepping down");
            state.cluster.demote_from(epoch);
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    info!(topic = %req.topic, offset, epoch, "appended record");
    Ok(Json(ProduceResponse {
        offset,
        hwm: guard.hwm(),
    }))
}
