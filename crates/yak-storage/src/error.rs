//! Storage error types

use std::io;
use thiserror::Error;
use yak_common::{Epoch, Offset};

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt log for topic '{topic}' at line {line}: {reason}")]
    CorruptLog {
        topic: String,
        line: usize,
        reason: String,
    },

    #[error("Offset out of range: requested {requested}, log end {log_end}")]
    OffsetOutOfRange { requested: Offset, log_end: Offset },

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Topic already exists: {0}")]
    TopicExists(String),

    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("Epoch regression: record epoch {epoch} below log end epoch {log_end_epoch}")]
    EpochRegression { epoch: Epoch, log_end_epoch: Epoch },

    #[error("Truncation below high-water mark: requested {requested}, hwm {hwm}")]
    TruncateBelowHwm { requested: Offset, hwm: Offset },

    #[error("Invalid high-water mark {requested}: current {current}, log end {log_end}")]
    InvalidHwm {
        requested: Offset,
        current: Offset,
        log_end: Offset,
    },
}

impl From<StorageError> for yak_common::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::TopicNotFound(t) => yak_common::Error::NotFound(format!("topic '{t}'")),
            other => yak_common::Error::Storage(other.to_string()),
        }
    }
}
