//! Download queue manager
//!
//! Drives a bounded-concurrency pipeline over a list of items:
//! - FIFO slot filling, with retried items jumping to the front
//! - Cooperative pause/resume (in-flight transfers keep going)
//! - Hard cancellation that drops pending work immediately
//! - A progress event after every state transition
//!
//! Every item lives in exactly one of four collections (queued, active,
//! completed, failed). All moves between them happen under one lock, so
//! any snapshot an observer sees is conserved.

use crate::error::QueueError;
use crate::filename::{derive_filename, normalize_filename, sanitize_subfolder};
use crate::platform::{DownloadHandle, DownloadPlatform, TransferState};
use chrono::Utc;
use futures::FutureExt;
use mediagrab_types::{
    DownloadItem, ItemStatus, ProgressSnapshot, QueueEvent, RawItem, RunStatus, Settings,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

/// Configuration for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of simultaneous downloads
    pub max_concurrent: usize,
    /// How long a slot stays occupied after its item settles
    pub inter_item_delay: Duration,
    /// Retries allowed per item before it is marked failed
    pub max_retries: u32,
    /// Directory all destination paths are relative to
    pub base_path: PathBuf,
    /// Tick for the driving loop and for polling transfer status
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            inter_item_delay: Duration::from_millis(200),
            max_retries: 3,
            base_path: PathBuf::from("."),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl QueueConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent,
            inter_item_delay: Duration::from_millis(settings.inter_item_delay_ms),
            max_retries: settings.max_retries,
            base_path: settings.download_dir.clone(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_concurrent == 0 {
            return Err(QueueError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(QueueError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Copy of every item in a run, grouped by collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunItems {
    pub queued: Vec<DownloadItem>,
    pub active: Vec<DownloadItem>,
    pub completed: Vec<DownloadItem>,
    pub failed: Vec<DownloadItem>,
}

struct ActiveEntry {
    item: DownloadItem,
    handle: Option<DownloadHandle>,
}

#[derive(Default)]
struct QueueState {
    queued: VecDeque<DownloadItem>,
    /// Keyed by a per-dispatch ticket, since caller-supplied ids may repeat
    active: HashMap<u64, ActiveEntry>,
    completed: Vec<DownloadItem>,
    failed: Vec<DownloadItem>,
    paused: bool,
    cancelled: bool,
    running: bool,
    /// Slots whose item settled but whose inter-item delay is still running
    settling: usize,
    next_ticket: u64,
}

impl QueueState {
    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.queued.len() + self.active.len() + self.completed.len() + self.failed.len(),
            queued: self.queued.len(),
            downloading: self.active.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
            failed_filenames: self.failed.iter().map(|i| i.filename.clone()).collect(),
            paused: self.paused,
            cancelled: self.cancelled,
        }
    }

    fn status(&self) -> RunStatus {
        if self.cancelled {
            RunStatus::Cancelled
        } else if self.paused {
            RunStatus::Paused
        } else if self.queued.is_empty() && self.active.is_empty() {
            RunStatus::Idle
        } else {
            RunStatus::Downloading
        }
    }

    fn drained(&self) -> bool {
        self.queued.is_empty() && self.active.is_empty()
    }
}

struct Inner {
    config: QueueConfig,
    platform: Arc<dyn DownloadPlatform>,
    state: Mutex<QueueState>,
    event_tx: broadcast::Sender<QueueEvent>,
    wake: Notify,
    cancel_token: CancellationToken,
}

impl Inner {
    fn emit(&self, event: QueueEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Clears the running flag however `start` exits
struct RunGuard<'a>(&'a Inner);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().running = false;
    }
}

/// Bounded-concurrency download queue for a single run.
///
/// Cloning is cheap and every clone controls the same run.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl QueueManager {
    /// Create a fresh run
    pub fn new(config: QueueConfig, platform: Arc<dyn DownloadPlatform>) -> Result<Self, QueueError> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                platform,
                state: Mutex::new(QueueState::default()),
                event_tx,
                wake: Notify::new(),
                cancel_token: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.event_tx.subscribe()
    }

    // ========================================================================
    // Enqueue
    // ========================================================================

    /// Normalize and append items in input order. Returns how many were added.
    pub fn enqueue(&self, items: Vec<RawItem>) -> usize {
        let normalized: Vec<DownloadItem> = items.into_iter().map(normalize_item).collect();
        let count = normalized.len();

        {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                warn!("Ignoring {} item(s) enqueued after cancellation", count);
                return 0;
            }
            state.queued.extend(normalized);
            self.inner.emit(QueueEvent::Progress(state.snapshot()));
        }

        debug!("Enqueued {} item(s)", count);
        self.inner.wake.notify_one();
        count
    }

    // ========================================================================
    // Run
    // ========================================================================

    /// Run until every item has settled or the run is cancelled.
    ///
    /// Sends [`QueueEvent::Complete`] only when the queue drains naturally.
    pub async fn start(&self) -> Result<ProgressSnapshot, QueueError> {
        {
            let mut state = self.inner.state.lock();
            if state.running {
                return Err(QueueError::AlreadyRunning);
            }
            if state.cancelled {
                return Ok(state.snapshot());
            }
            state.running = true;
        }
        let _guard = RunGuard(&self.inner);

        let config = &self.inner.config;
        info!(
            "Starting run: {} queued (max_concurrent: {}, max_retries: {}, base: {})",
            self.progress().queued,
            config.max_concurrent,
            config.max_retries,
            config.base_path.display()
        );

        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            if self.inner.cancel_token.is_cancelled() || self.inner.state.lock().drained() {
                break;
            }

            self.fill_slots(&mut tasks);

            tokio::select! {
                _ = self.inner.cancel_token.cancelled() => break,
                _ = self.inner.wake.notified() => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }

        if self.inner.cancel_token.is_cancelled() {
            // In-flight tasks notice the token themselves and discard their results
            tasks.detach_all();
            let snapshot = self.progress();
            info!("Run cancelled: {} completed, {} failed", snapshot.completed, snapshot.failed);
            return Ok(snapshot);
        }

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        let state = self.inner.state.lock();
        let snapshot = state.snapshot();
        if !state.cancelled {
            self.inner.emit(QueueEvent::Complete(snapshot.clone()));
            info!(
                "Run complete: {} of {} downloaded, {} failed",
                snapshot.completed, snapshot.total, snapshot.failed
            );
        }
        Ok(snapshot)
    }

    /// Move items from the head of the queue into free slots
    fn fill_slots(&self, tasks: &mut JoinSet<()>) {
        let max = self.inner.config.max_concurrent;

        loop {
            let (ticket, item) = {
                let mut state = self.inner.state.lock();
                if state.paused || state.cancelled || state.active.len() + state.settling >= max {
                    return;
                }
                let Some(mut item) = state.queued.pop_front() else {
                    return;
                };

                item.status = ItemStatus::Downloading;
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.active.insert(
                    ticket,
                    ActiveEntry {
                        item: item.clone(),
                        handle: None,
                    },
                );
                self.inner.emit(QueueEvent::Progress(state.snapshot()));
                (ticket, item)
            };

            debug!("Dispatching {} (attempt {})", item.filename, item.retry_count + 1);
            let manager = self.clone();
            tasks.spawn(async move { manager.process_item(ticket, item).await });
        }
    }

    /// Download one item, record the outcome and hold the slot for the
    /// inter-item delay
    async fn process_item(self, ticket: u64, item: DownloadItem) {
        self.inner.emit(QueueEvent::FileStarted {
            id: item.id.clone(),
            filename: item.filename.clone(),
        });

        let destination = self.inner.config.base_path.join(item.destination_path());
        let outcome = match AssertUnwindSafe(self.transfer(ticket, &item.source_url, &destination))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Download of {} panicked", item.filename);
                self.abort_registered(ticket).await;
                Err("Download task panicked".to_string())
            }
        };

        if !self.settle(ticket, outcome) {
            return;
        }

        let delay = self.inner.config.inter_item_delay;
        if !delay.is_zero() {
            tokio::select! {
                _ = self.inner.cancel_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        {
            let mut state = self.inner.state.lock();
            state.settling = state.settling.saturating_sub(1);
        }
        self.inner.wake.notify_one();
    }

    /// Start the platform transfer and poll it to a terminal state
    async fn transfer(&self, ticket: u64, url: &str, destination: &Path) -> Result<(), String> {
        let platform = &self.inner.platform;
        let handle = platform.download(url, destination).await.map_err(|e| e.to_string())?;

        let registered = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                false
            } else if let Some(entry) = state.active.get_mut(&ticket) {
                entry.handle = Some(handle);
                true
            } else {
                false
            }
        };
        if !registered {
            // Cancelled while the transfer was being started
            platform.abort(handle).await;
            return Err("Download cancelled".to_string());
        }

        loop {
            let status = platform.query_status(handle).await.map_err(|e| e.to_string())?;
            match status.state {
                TransferState::Complete => return Ok(()),
                TransferState::Interrupted => {
                    return Err(status.error.unwrap_or_else(|| "Download interrupted".to_string()))
                }
                TransferState::InProgress => {}
            }

            tokio::select! {
                _ = self.inner.cancel_token.cancelled() => {
                    return Err("Download cancelled".to_string());
                }
                _ = tokio::time::sleep(self.inner.config.poll_interval) => {}
            }
        }
    }

    /// Abort the platform transfer registered for `ticket`, if any
    async fn abort_registered(&self, ticket: u64) {
        let handle = self
            .inner
            .state
            .lock()
            .active
            .get_mut(&ticket)
            .and_then(|entry| entry.handle.take());
        if let Some(handle) = handle {
            self.inner.platform.abort(handle).await;
        }
    }

    /// Record the outcome of a transfer. Returns false when the result was
    /// discarded because the run was cancelled.
    fn settle(&self, ticket: u64, outcome: Result<(), String>) -> bool {
        let max_retries = self.inner.config.max_retries;
        let mut state = self.inner.state.lock();
        if state.cancelled {
            return false;
        }
        let Some(entry) = state.active.remove(&ticket) else {
            return false;
        };
        let mut item = entry.item;

        match outcome {
            Ok(()) => {
                debug!("Downloaded {}", item.filename);
                item.status = ItemStatus::Completed;
                item.finished_at = Some(Utc::now());
                state.completed.push(item);
            }
            Err(message) if item.retry_count < max_retries => {
                item.retry_count += 1;
                item.status = ItemStatus::Queued;
                warn!(
                    "Download of {} failed ({}), retry {}/{}",
                    item.filename, message, item.retry_count, max_retries
                );
                state.queued.push_front(item);
            }
            Err(message) => {
                error!("Giving up on {} after {} retries: {}", item.filename, item.retry_count, message);
                item.status = ItemStatus::Failed;
                item.last_error = Some(message.clone());
                item.finished_at = Some(Utc::now());
                self.inner.emit(QueueEvent::Error {
                    item: item.clone(),
                    message,
                });
                state.failed.push(item);
            }
        }

        state.settling += 1;
        self.inner.emit(QueueEvent::Progress(state.snapshot()));
        true
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Withhold new slot fills. In-flight downloads are not interrupted.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if state.cancelled || state.paused {
            return;
        }
        state.paused = true;
        info!("Run paused");
        self.inner.emit(QueueEvent::Progress(state.snapshot()));
    }

    pub fn resume(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.cancelled || !state.paused {
                return;
            }
            state.paused = false;
            info!("Run resumed");
            self.inner.emit(QueueEvent::Progress(state.snapshot()));
        }
        self.inner.wake.notify_one();
    }

    /// Drop all pending work and abort in-flight transfers.
    ///
    /// Queued and active collections are empty when this returns; aborts
    /// are requested but their effect is not awaited.
    pub async fn cancel(&self) {
        let handles: Vec<DownloadHandle> = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            let dropped = state.queued.len() + state.active.len();
            state.queued.clear();
            let handles = state.active.drain().filter_map(|(_, entry)| entry.handle).collect();
            info!("Run cancelled, dropped {} pending item(s)", dropped);
            self.inner.emit(QueueEvent::Progress(state.snapshot()));
            handles
        };

        self.inner.cancel_token.cancel();
        self.inner.wake.notify_one();

        for handle in handles {
            self.inner.platform.abort(handle).await;
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn progress(&self) -> ProgressSnapshot {
        self.inner.state.lock().snapshot()
    }

    pub fn status(&self) -> RunStatus {
        self.inner.state.lock().status()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Copy of every item, grouped by collection
    pub fn items(&self) -> RunItems {
        let state = self.inner.state.lock();
        RunItems {
            queued: state.queued.iter().cloned().collect(),
            active: state.active.values().map(|e| e.item.clone()).collect(),
            completed: state.completed.clone(),
            failed: state.failed.clone(),
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Download task panicked: {}", e);
        }
    }
}

fn normalize_item(raw: RawItem) -> DownloadItem {
    let id = raw
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let fallback_stem: String = id.chars().filter(|c| c.is_ascii_alphanumeric()).take(8).collect();

    let filename = match raw.filename.as_deref() {
        Some(name) if !name.trim().is_empty() => normalize_filename(name, &raw.url, &fallback_stem),
        _ => derive_filename(&raw.url, &fallback_stem),
    };
    let subfolder = raw.subfolder.as_deref().and_then(sanitize_subfolder);

    DownloadItem::with_id(id, raw.url, filename, subfolder)
}
