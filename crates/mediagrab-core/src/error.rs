//! Error types for mediagrab core

use thiserror::Error;

/// Errors that can occur in mediagrab core
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Unknown download handle: {0}")]
    UnknownHandle(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Platform error: {0}")]
    Platform(String),
}

impl QueueError {
    /// Check if this error is worth retrying.
    ///
    /// The queue retries every item failure the same way; this is for
    /// callers that want to classify errors themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::Network(_) | QueueError::Io(_) | QueueError::Platform(_) => true,
            QueueError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        QueueError::Serialization(error.to_string())
    }
}
