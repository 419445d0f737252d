//! Error types for YAK.

use thiserror::Error;

/// Result type alias for YAK operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for YAK.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Coordination store errors
    #[error("Coordination error: {0}")]
    Coordination(String),

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<crate::coord::CoordError> for Error {
    fn from(e: crate::coord::CoordError) -> Self {
        Error::Coordination(e.to_string())
    }
}
