//! Shared types for mediagrab
//!
//! This crate contains the data structures shared between the queue
//! engine and the command-line front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Item Types
// ============================================================================

/// An item as handed over by the discovery layer, before normalization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub subfolder: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl RawItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.subfolder = Some(subfolder.into());
        self
    }
}

/// One unit of download work: one media URL to one destination file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub source_url: String,
    pub filename: String,
    pub subfolder: Option<String>,
    pub retry_count: u32,
    pub status: ItemStatus,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DownloadItem {
    pub fn new(source_url: String, filename: String, subfolder: Option<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), source_url, filename, subfolder)
    }

    pub fn with_id(
        id: String,
        source_url: String,
        filename: String,
        subfolder: Option<String>,
    ) -> Self {
        Self {
            id,
            source_url,
            filename,
            subfolder,
            retry_count: 0,
            status: ItemStatus::Queued,
            last_error: None,
            enqueued_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Path relative to the run's base directory
    pub fn destination_path(&self) -> PathBuf {
        match self.subfolder.as_deref() {
            Some(sub) if !sub.is_empty() => PathBuf::from(sub).join(&self.filename),
            _ => PathBuf::from(&self.filename),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ItemStatus::Completed | ItemStatus::Failed)
    }
}

/// Status of a single item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Queued,
    Downloading,
    Completed,
    Failed,
}

// ============================================================================
// Run Types
// ============================================================================

/// Point-in-time progress of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub queued: usize,
    pub downloading: usize,
    pub completed: usize,
    pub failed: usize,
    pub failed_filenames: Vec<String>,
    pub paused: bool,
    pub cancelled: bool,
}

impl ProgressSnapshot {
    /// Items that reached a terminal state
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.finished() as f64 / self.total as f64) * 100.0
    }
}

/// Overall state of a run, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Cancelled,
    Paused,
    Idle,
    Downloading,
}

// ============================================================================
// Event Types
// ============================================================================

/// Events published by the queue manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum QueueEvent {
    /// Emitted after every state transition
    Progress(ProgressSnapshot),
    /// An item began downloading
    FileStarted { id: String, filename: String },
    /// An item exhausted its retries
    Error { item: DownloadItem, message: String },
    /// The run drained naturally (never sent on cancellation)
    Complete(ProgressSnapshot),
}

// ============================================================================
// Settings Types
// ============================================================================

/// Persisted user settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub download_dir: PathBuf,
    pub max_concurrent: usize,
    pub inter_item_delay_ms: u64,
    pub max_retries: u32,
    /// Global speed limit in bytes/sec (None = unlimited)
    pub speed_limit: Option<u64>,
    pub conflict_action: ConflictAction,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir()
                .map(|p| p.join("mediagrab"))
                .unwrap_or_else(|| PathBuf::from(".")),
            max_concurrent: 3,
            inter_item_delay_ms: 200,
            max_retries: 3,
            speed_limit: None,
            conflict_action: ConflictAction::Uniquify,
            user_agent: format!("mediagrab/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 120,
        }
    }
}

/// What to do when the destination file already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictAction {
    #[default]
    Uniquify,
    Overwrite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_path_includes_subfolder() {
        let item = DownloadItem::new(
            "https://cdn.example/a.jpg".to_string(),
            "a.jpg".to_string(),
            Some("album".to_string()),
        );
        assert_eq!(item.destination_path(), PathBuf::from("album").join("a.jpg"));

        let flat = DownloadItem::new("https://cdn.example/b.jpg".to_string(), "b.jpg".to_string(), None);
        assert_eq!(flat.destination_path(), PathBuf::from("b.jpg"));
    }

    #[test]
    fn raw_item_accepts_bare_url_json() {
        let items: Vec<RawItem> =
            serde_json::from_str(r#"[{"url":"https://x/1.png"},{"url":"https://x/2","filename":"two.gif"}]"#)
                .unwrap();
        assert_eq!(items[0], RawItem::new("https://x/1.png"));
        assert_eq!(items[1].filename.as_deref(), Some("two.gif"));
    }

    #[test]
    fn settings_fill_missing_fields_from_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"max_retries":7}"#).unwrap();
        assert_eq!(settings.max_retries, 7);
        assert_eq!(settings.max_concurrent, 3);
        assert_eq!(settings.inter_item_delay_ms, 200);
        assert_eq!(settings.conflict_action, ConflictAction::Uniquify);
    }

    #[test]
    fn events_are_tagged() {
        let json = serde_json::to_value(QueueEvent::Progress(ProgressSnapshot::default())).unwrap();
        assert_eq!(json["type"], "Progress");
        assert_eq!(json["payload"]["total"], 0);
    }
}
