//! Error types for the quiz session engine.

use std::io;

use thiserror::Error;

/// An inbound frame could not be understood.
#[derive(Debug, Error)]
#[error("Bad message: {0}")]
pub struct CodecError(#[from] serde_json::Error);

/// Question import failed. Nothing is imported when this is returned.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported question file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid JSON question file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid workbook: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("File is not valid UTF-8")]
    Encoding,

    #[error("Question #{index}: {reason}")]
    Malformed { index: usize, reason: String },

    #[error("Question file contains no questions")]
    Empty,
}

/// Discovery collaborator failure.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to advertise '{name}': {reason}")]
    Advertise { name: String, reason: String },

    #[error("Discovery failed: {0}")]
    Search(String),
}

/// Session coordinator failure.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Room is already running")]
    AlreadyRunning,

    #[error("Failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Session client failure.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Authoritative refusal from the server, never retried.
    #[error("Join denied: {0}")]
    JoinDenied(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}
