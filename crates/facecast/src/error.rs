//! Facecast error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, FacecastError>;

/// Errors that can occur while producing or publishing face events.
#[derive(Error, Debug)]
pub enum FacecastError {
    /// Connection-related errors (WebSocket handshake, refused, reset)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The detection source has nothing to offer yet (device not ready, model loading)
    #[error("Detection source unavailable: {0}")]
    SourceUnavailable(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl FacecastError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a source-unavailable error.
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
