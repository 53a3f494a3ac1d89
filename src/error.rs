//! # Error Types
//!
//! Custom error types for Family Tracker using `thiserror`.

use thiserror::Error;

/// Main error type for Family Tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Configuration errors (parse and validation)
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Remote tabular store errors (missing partition, API rejection, bad payload)
    #[error("Store error: {0}")]
    Store(String),

    /// HTTP transport errors talking to the remote store
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Position provider errors (no fix, provider unreachable)
    #[error("Location acquisition failed: {0}")]
    Acquisition(String),

    /// A durable log line failed its structural check
    #[error("Malformed log line: {0:?}")]
    MalformedPersisted(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Family Tracker
pub type Result<T> = std::result::Result<T, TrackerError>;
