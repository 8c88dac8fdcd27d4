//! Platform download primitive
//!
//! The queue never touches the network itself. It hands one URL and one
//! destination to a [`DownloadPlatform`], gets a handle back, and polls the
//! handle until the transfer reaches a terminal state.

mod http;
mod rate_limiter;

pub use http::*;
pub use rate_limiter::*;

use crate::error::QueueError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Opaque handle to one transfer started by a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadHandle(pub u64);

impl fmt::Display for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    InProgress,
    Complete,
    Interrupted,
}

/// Result of polling a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    pub state: TransferState,
    pub error: Option<String>,
}

impl TransferStatus {
    pub fn in_progress() -> Self {
        Self {
            state: TransferState::InProgress,
            error: None,
        }
    }

    pub fn complete() -> Self {
        Self {
            state: TransferState::Complete,
            error: None,
        }
    }

    pub fn interrupted(error: impl Into<String>) -> Self {
        Self {
            state: TransferState::Interrupted,
            error: Some(error.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state != TransferState::InProgress
    }
}

/// Something that can persist a URL to a path
#[async_trait]
pub trait DownloadPlatform: Send + Sync {
    /// Begin transferring `url` to `destination`
    async fn download(&self, url: &str, destination: &Path) -> Result<DownloadHandle, QueueError>;

    /// Current state of a transfer started by [`DownloadPlatform::download`]
    async fn query_status(&self, handle: DownloadHandle) -> Result<TransferStatus, QueueError>;

    /// Stop a transfer. Unknown or finished handles are ignored.
    async fn abort(&self, handle: DownloadHandle);
}
