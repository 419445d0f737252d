//! Topic management endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiResult;
use super::{require_leader, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterTopicRequest {
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterTopicResponse {
    pub topic: String,
    pub created: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TopicsResponse {
    pub topics: Vec<String>,
    pub count: usize,
}

/// Create an empty topic. Leader only; followers learn about it
/// through replication.
pub async fn register_topic(
    State(state): State<AppState>,
    Json(req): Json<RegisterTopicRequest>,
) -> ApiResult<Json<RegisterTopicResponse>> {
    require_leader(&state, "/register_topic")?;
    state.storage.create_topic(&req.topic)?;
    info!(topic = %req.topic, "registered topic");
    Ok(Json(RegisterTopicResponse {
        topic: req.topic,
        created: true,
    }))
}

/// Topics known to this broker.
pub async fn list_topics(State(state): State<AppState>) -> Json<TopicsResponse> {
    let topics = state.storage.topic_names();
    let count = topics.len();
    Json(TopicsResponse { topics, count })
}
