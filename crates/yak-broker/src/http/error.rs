//! Error types for the broker HTTP API.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use yak_common::coord::CoordError;
use yak_common::{Epoch, LeaderInfo, Offset};
use yak_storage::StorageError;

use crate::replication::ApplyError;

/// Broker API error.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Epoch {requested} is stale, current epoch is {current}")]
    EpochStale { requested: Epoch, current: Epoch },

    #[error("Offset mismatch, log ends at {follower_end}")]
    OffsetMismatch {
        follower_end: Offset,
        follower_end_epoch: Epoch,
    },

    /// This broker is not the leader. Carries the leader (when known)
    /// and the request path so the redirect points at the right place.
    #[error("Not the leader")]
    NotLeader {
        leader: Option<LeaderInfo>,
        path: &'static str,
    },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broker API result type.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotLeader {
                leader: Some(leader),
                path,
            } => {
                let location = format!("{}{}", leader.base_url(), path);
                let body = Json(json!({
                    "error": "not the leader",
                    "status": StatusCode::TEMPORARY_REDIRECT.as_u16(),
                    "leader": leader,
                }));
                (
                    StatusCode::TEMPORARY_REDIRECT,
                    [(header::LOCATION, location)],
                    body,
                )
                    .into_response()
            }
            ApiError::NotLeader { leader: None, .. } => {
                let body = Json(json!({
                    "error": "no leader known",
                    "status": StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                }));
                (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
            }
            ApiError::EpochStale { requested, current } => {
                let body = Json(json!({
                    "error": format!("epoch {requested} is stale"),
                    "status": StatusCode::CONFLICT.as_u16(),
                    "current_epoch": current,
                }));
                (StatusCode::CONFLICT, body).into_response()
            }
            ApiError::OffsetMismatch {
                follower_end,
                follower_end_epoch,
            } => {
                let body = Json(json!({
                    "error": "offset mismatch",
                    "status": StatusCode::RANGE_NOT_SATISFIABLE.as_u16(),
                    "follower_end": follower_end,
                    "follower_end_epoch": follower_end_epoch,
                }));
                (StatusCode::RANGE_NOT_SATISFIABLE, body).into_response()
            }
            other => {
                let (status, message) = match other {
                    ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
                    ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
                    ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
                    ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
                    ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
                    _ => unreachable!(),
                };
                let body = Json(json!({
                    "error": message,
                    "status": status.as_u16(),
                }));
                (status, body).into_response()
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::TopicNotFound(t) => ApiError::NotFound(format!("topic '{t}'")),
            StorageError::TopicExists(t) => ApiError::Conflict(format!("topic '{t}' already exists")),
            StorageError::InvalidTopicName(t) => {
                ApiError::BadRequest(format!("invalid topic name '{t}'"))
            }
            StorageError::OffsetOutOfRange { requested, log_end } => ApiError::BadRequest(format!(
                "offset {requested} is beyond log end {log_end}"
            )),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ApplyError> for ApiError {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::EpochStale { requested, current } => {
                ApiError::EpochStale { requested, current }
            }
            ApplyError::OffsetMismatch {
                follower_end,
                follower_end_epoch,
            } => ApiError::OffsetMismatch {
                follower_end,
                follower_end_epoch,
            },
            ApplyError::Storage(e) => e.into(),
        }
    }
}

impl From<CoordError> for ApiError {
    fn from(e: CoordError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}
