//! HTTP implementation of the download primitive
//!
//! Each transfer runs in its own tokio task that streams the response body
//! straight into the destination file. Status lives in a shared table the
//! queue polls through [`DownloadPlatform::query_status`].

use super::{DownloadHandle, DownloadPlatform, RateLimiter, TransferStatus};
use crate::error::QueueError;
use async_trait::async_trait;
use futures::StreamExt;
use mediagrab_types::{ConflictAction, Settings};
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Transfer {
    path: PathBuf,
    status: TransferStatus,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

type TransferTable = Arc<Mutex<HashMap<DownloadHandle, Transfer>>>;

/// A failed fetch, and whether the destination file was opened for writing
struct FetchFailure {
    error: QueueError,
    file_written: bool,
}

impl FetchFailure {
    fn before_write(error: impl Into<QueueError>) -> Self {
        Self {
            error: error.into(),
            file_written: false,
        }
    }

    fn after_write(error: impl Into<QueueError>) -> Self {
        Self {
            error: error.into(),
            file_written: true,
        }
    }

    fn aborted(file_written: bool) -> Self {
        Self {
            error: QueueError::Platform("Transfer aborted".to_string()),
            file_written,
        }
    }
}

/// Downloads over HTTP(S) with reqwest
pub struct HttpPlatform {
    client: Client,
    rate_limiter: RateLimiter,
    conflict_action: ConflictAction,
    next_handle: AtomicU64,
    transfers: TransferTable,
}

impl HttpPlatform {
    pub fn new(client: Client, rate_limiter: RateLimiter, conflict_action: ConflictAction) -> Self {
        Self {
            client,
            rate_limiter,
            conflict_action,
            next_handle: AtomicU64::new(1),
            transfers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build a platform from user settings
    pub fn from_settings(settings: &Settings) -> Result<Self, QueueError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()?;

        let rate_limiter = RateLimiter::from_limit(settings.speed_limit);
        if !rate_limiter.is_unlimited() {
            info!("Limiting downloads to {} bytes/sec", settings.speed_limit.unwrap_or_default());
        }

        Ok(Self::new(client, rate_limiter, settings.conflict_action))
    }

    /// Number of transfers not yet reported as finished
    pub fn tracked(&self) -> usize {
        self.transfers.lock().len()
    }

    /// Pick the path to write to and register the transfer under one lock.
    ///
    /// Paths of transfers still in flight count as taken so two items with
    /// the same name never share a file.
    fn register(&self, handle: DownloadHandle, requested: &Path, cancel: CancellationToken) -> PathBuf {
        let mut transfers = self.transfers.lock();

        let path = match self.conflict_action {
            ConflictAction::Overwrite => requested.to_path_buf(),
            ConflictAction::Uniquify => unique_path(requested, |candidate| {
                candidate.exists() || transfers.values().any(|t| t.path == candidate)
            }),
        };

        transfers.insert(
            handle,
            Transfer {
                path: path.clone(),
                status: TransferStatus::in_progress(),
                cancel,
                task: None,
            },
        );
        path
    }
}

/// First of `name.ext`, `name (1).ext`, `name (2).ext`, ... for which
/// `taken` returns false
pub fn unique_path(requested: &Path, taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !taken(requested) {
        return requested.to_path_buf();
    }

    let stem = requested
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let extension = requested
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = requested.parent().unwrap_or_else(|| Path::new(""));

    let mut counter = 1u32;
    loop {
        let candidate = parent.join(format!("{} ({}){}", stem, counter, extension));
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Stream `url` into `path`.
///
/// The file is created only after a success status, and `cancel` is never
/// observed while it is being created.
async fn fetch_to_file(
    client: &Client,
    rate_limiter: &RateLimiter,
    url: &str,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<u64, FetchFailure> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(FetchFailure::before_write)?;
    }

    let response = tokio::select! {
        response = client.get(url).send() => response.map_err(FetchFailure::before_write)?,
        _ = cancel.cancelled() => return Err(FetchFailure::aborted(false)),
    };
    let status = response.status();
    if !status.is_success() {
        return Err(FetchFailure::before_write(QueueError::ServerError {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("Unexpected status").to_string(),
        }));
    }
    if cancel.is_cancelled() {
        return Err(FetchFailure::aborted(false));
    }

    let mut file = File::create(path).await.map_err(FetchFailure::before_write)?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => return Err(FetchFailure::aborted(true)),
        };
        let Some(chunk) = chunk else {
            break;
        };
        let chunk = chunk.map_err(FetchFailure::after_write)?;

        tokio::select! {
            _ = rate_limiter.acquire(chunk.len() as u64) => {}
            _ = cancel.cancelled() => return Err(FetchFailure::aborted(true)),
        }
        file.write_all(&chunk).await.map_err(FetchFailure::after_write)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(FetchFailure::after_write)?;
    file.sync_all().await.map_err(FetchFailure::after_write)?;
    Ok(written)
}

#[async_trait]
impl DownloadPlatform for HttpPlatform {
    async fn download(&self, url: &str, destination: &Path) -> Result<DownloadHandle, QueueError> {
        let parsed = url::Url::parse(url).map_err(|e| QueueError::Platform(format!("Invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(QueueError::Platform(format!("Unsupported scheme: {}", parsed.scheme())));
        }

        let handle = DownloadHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        // Registered before spawning so the task always finds its entry
        let path = self.register(handle, destination, cancel.clone());

        let client = self.client.clone();
        let rate_limiter = self.rate_limiter.clone();
        let transfers = Arc::clone(&self.transfers);
        let url = url.to_string();

        let task = tokio::spawn(async move {
            let result = fetch_to_file(&client, &rate_limiter, &url, &path, &cancel).await;
            let status = match result {
                Ok(bytes) => {
                    debug!("Transfer {} finished: {} bytes to {}", handle, bytes, path.display());
                    TransferStatus::complete()
                }
                Err(failure) => {
                    warn!("Transfer {} of {} failed: {}", handle, url, failure.error);
                    // Never remove a file this transfer did not write
                    if failure.file_written && tokio::fs::remove_file(&path).await.is_ok() {
                        debug!("Removed partial file {}", path.display());
                    }
                    TransferStatus::interrupted(failure.error.to_string())
                }
            };
            if let Some(transfer) = transfers.lock().get_mut(&handle) {
                transfer.status = status;
                transfer.task = None;
            }
        });

        if let Some(transfer) = self.transfers.lock().get_mut(&handle) {
            if !transfer.status.is_terminal() {
                transfer.task = Some(task);
            }
        }

        Ok(handle)
    }

    async fn query_status(&self, handle: DownloadHandle) -> Result<TransferStatus, QueueError> {
        let mut transfers = self.transfers.lock();
        let status = transfers
            .get(&handle)
            .map(|t| t.status.clone())
            .ok_or(QueueError::UnknownHandle(handle.0))?;

        // Terminal states are reported once, then forgotten
        if status.is_terminal() {
            transfers.remove(&handle);
        }
        Ok(status)
    }

    /// Signal the transfer task and wait for it to clean up its partial file
    async fn abort(&self, handle: DownloadHandle) {
        let removed = self.transfers.lock().remove(&handle);
        let Some(transfer) = removed else {
            return;
        };

        transfer.cancel.cancel();
        if let Some(task) = transfer.task {
            if let Err(e) = task.await {
                warn!("Transfer {} task ended abnormally: {}", handle, e);
            }
        }
        info!("Aborted transfer {}", handle);
    }
}
