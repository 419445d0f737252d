//! Consumer read path.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use yak_common::{Offset, Record};

use super::error::ApiResult;
use super::AppState;

const DEFAULT_CONSUME_BATCH: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ConsumeParams {
    pub topic: String,
    #[serde(default)]
    pub offset: Offset,
    pub max: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeResponse {
    pub messages: Vec<Record>,
    pub hwm: Offset,
    /// Committed records available at or after the requested offset,
    /// regardless of the batch cap.
    pub total_available: u64,
    pub requested_offset: Offset,
}

/// Read committed records from the local log.
///
/// Served by any broker: the committed prefix is immutable, so a
/// follower's answer is correct up to its own hwm.
pub async fn consume(
    State(state): State<AppState>,
    Query(params): Query<ConsumeParams>,
) -> ApiResult<Json<ConsumeResponse>> {
    let log = state.storage.topic(&params.topic)?;
    let guard = log.read().await;

    let max = params.max.unwrap_or(DEFAULT_CONSUME_BATCH);
    let messages = guard.read_committed(params.offset, max)?;
    let hwm = guard.hwm();

    Ok(Json(ConsumeResponse {
        messages,
        hwm,
        total_available: hwm.saturating_sub(params.offset),
        requested_offset: params.offset,
    }))
}
