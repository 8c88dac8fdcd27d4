//! Storage layer for settings and run reports (JSON files)

use crate::error::QueueError;
use crate::queue::QueueManager;
use chrono::{DateTime, Utc};
use mediagrab_types::{DownloadItem, ProgressSnapshot, RunStatus, Settings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const SETTINGS_FILE: &str = "settings.json";
const REPORTS_DIR: &str = "reports";

/// Summary of a finished (or cancelled) run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub snapshot: ProgressSnapshot,
    pub completed: Vec<DownloadItem>,
    pub failed: Vec<DownloadItem>,
}

impl RunReport {
    /// Capture the current state of a run
    pub fn capture(manager: &QueueManager, started_at: DateTime<Utc>) -> Self {
        let items = manager.items();
        Self {
            started_at,
            finished_at: Utc::now(),
            status: manager.status(),
            snapshot: manager.progress(),
            completed: items.completed,
            failed: items.failed,
        }
    }
}

/// Storage manager for mediagrab data
#[derive(Clone, Debug)]
pub struct Storage {
    /// Data directory
    data_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance
    pub async fn new(data_dir: PathBuf) -> Result<Self, QueueError> {
        fs::create_dir_all(&data_dir).await?;
        fs::create_dir_all(data_dir.join(REPORTS_DIR)).await?;

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Load settings, falling back to defaults when none were saved
    pub async fn load_settings(&self) -> Result<Settings, QueueError> {
        let path = self.settings_path();
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&path).await?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<(), QueueError> {
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.settings_path(), content).await?;
        Ok(())
    }

    /// Remove saved settings and return the defaults
    pub async fn reset_settings(&self) -> Result<Settings, QueueError> {
        let path = self.settings_path();
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(Settings::default())
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Write a run report and return its path
    pub async fn save_report(&self, report: &RunReport) -> Result<PathBuf, QueueError> {
        let name = format!(
            "run-{}-{}.json",
            report.finished_at.format("%Y%m%dT%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let path = self.data_dir.join(REPORTS_DIR).join(name);

        let content = serde_json::to_string_pretty(report)?;
        fs::write(&path, content).await?;
        info!("Saved run report to {}", path.display());

        Ok(path)
    }

    /// Load every saved report, oldest first
    pub async fn load_reports(&self) -> Result<Vec<RunReport>, QueueError> {
        let dir = self.data_dir.join(REPORTS_DIR);
        let mut reports = Vec::new();

        if !dir.exists() {
            return Ok(reports);
        }

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(content) = fs::read_to_string(&path).await {
                    if let Ok(report) = serde_json::from_str::<RunReport>(&content) {
                        reports.push(report);
                    }
                }
            }
        }

        reports.sort_by_key(|r| r.finished_at);
        Ok(reports)
    }
}
