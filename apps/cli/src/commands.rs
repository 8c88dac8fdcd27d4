//! CLI command implementations

use crate::manifest::{apply_default_subfolder, items_from_urls, load_manifest};
use crate::output::{format_speed_limit, print_json, truncate};
use crate::progress::RunProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use console::style;
use mediagrab_core::{HttpPlatform, QueueConfig, QueueManager, RunReport, Storage};
use mediagrab_types::{ConflictAction, DownloadItem, QueueEvent, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Flags of the `run` command that override saved settings
#[derive(Debug, Default)]
pub struct RunArgs {
    pub urls: Vec<String>,
    pub manifest: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub subfolder: Option<String>,
    pub max_concurrent: Option<usize>,
    pub delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub speed_limit: Option<u64>,
    pub overwrite: bool,
}

impl RunArgs {
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(dir) = &self.output_dir {
            settings.download_dir = dir.clone();
        }
        if let Some(n) = self.max_concurrent {
            settings.max_concurrent = n;
        }
        if let Some(ms) = self.delay_ms {
            settings.inter_item_delay_ms = ms;
        }
        if let Some(n) = self.max_retries {
            settings.max_retries = n;
        }
        if let Some(limit) = self.speed_limit {
            settings.speed_limit = (limit > 0).then_some(limit);
        }
        if self.overwrite {
            settings.conflict_action = ConflictAction::Overwrite;
        }
    }
}

// ============================================================================
// Run Command
// ============================================================================

pub async fn run_downloads(storage: &Storage, args: RunArgs, format: OutputFormat) -> Result<()> {
    let mut settings = storage.load_settings().await?;
    args.apply_to(&mut settings);

    let mut items = match &args.manifest {
        Some(path) => load_manifest(path).await?,
        None => Vec::new(),
    };
    items.extend(items_from_urls(&args.urls)?);
    apply_default_subfolder(&mut items, args.subfolder.as_deref());

    if items.is_empty() {
        bail!("Nothing to download: pass URLs or --manifest");
    }

    let platform = HttpPlatform::from_settings(&settings).context("Failed to build HTTP client")?;
    let manager = QueueManager::new(QueueConfig::from_settings(&settings), Arc::new(platform))?;
    let mut events = manager.subscribe();

    let count = manager.enqueue(items);
    info!("Queued {} items into {}", count, settings.download_dir.display());

    let progress = RunProgress::new(count, !matches!(format, OutputFormat::Json));
    let started_at = Utc::now();
    let mut interrupted = false;

    let run = manager.start();
    tokio::pin!(run);

    let snapshot = loop {
        tokio::select! {
            result = &mut run => break result?,

            event = events.recv() => match event {
                Ok(event) => progress.handle_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!("Progress display skipped {} events", skipped),
                Err(RecvError::Closed) => {}
            },

            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                if interrupted {
                    std::process::exit(130);
                }
                interrupted = true;
                progress.println(format!("{} Cancelling, press Ctrl-C again to quit", style("○").dim()));
                manager.cancel().await;
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        if !matches!(event, QueueEvent::Progress(_)) {
            progress.handle_event(&event);
        }
    }
    progress.finish(&snapshot);

    let report = RunReport::capture(&manager, started_at);
    let report_path = storage.save_report(&report).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_item_table(&report.completed, &report.failed);
            print_summary(&report, &settings, &report_path);
        }
        OutputFormat::Human => {
            for item in &report.failed {
                println!(
                    "{} {} ({})",
                    style("✗").red(),
                    item.filename,
                    style(item.last_error.as_deref().unwrap_or("Unknown error")).red()
                );
            }
            print_summary(&report, &settings, &report_path);
        }
    }

    if snapshot.cancelled {
        bail!("Run cancelled");
    }
    if snapshot.failed > 0 {
        bail!("{} of {} items failed", snapshot.failed, snapshot.total);
    }
    Ok(())
}

fn print_summary(report: &RunReport, settings: &Settings, report_path: &std::path::Path) {
    let snapshot = &report.snapshot;
    let mark = if snapshot.failed == 0 && !snapshot.cancelled {
        style("✓").green().bold()
    } else {
        style("!").yellow().bold()
    };
    println!(
        "{} Downloaded {} of {} files to {}",
        mark,
        snapshot.completed,
        snapshot.total,
        style(settings.download_dir.display()).cyan()
    );
    if snapshot.failed > 0 {
        println!("  Failed: {}", style(snapshot.failed).red());
    }
    println!("  Report: {}", report_path.display());
}

fn print_item_table(completed: &[DownloadItem], failed: &[DownloadItem]) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct ItemRow {
        file: String,
        status: String,
        retries: u32,
        error: String,
    }

    let rows: Vec<ItemRow> = completed
        .iter()
        .chain(failed)
        .map(|item| ItemRow {
            file: truncate(&item.destination_path().display().to_string(), 40),
            status: format!("{:?}", item.status),
            retries: item.retry_count,
            error: truncate(item.last_error.as_deref().unwrap_or("-"), 40),
        })
        .collect();

    if rows.is_empty() {
        println!("No items finished");
    } else {
        println!("{}", Table::new(rows));
    }
}

// ============================================================================
// Report Commands
// ============================================================================

/// The `limit` most recent reports, oldest first
async fn recent_reports(storage: &Storage, limit: usize) -> Result<Vec<RunReport>> {
    let mut reports = storage.load_reports().await?;
    let skip = reports.len().saturating_sub(limit);
    Ok(reports.split_off(skip))
}

pub async fn list_reports(storage: &Storage, limit: usize, format: OutputFormat) -> Result<()> {
    let reports = recent_reports(storage, limit).await?;

    match format {
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ReportRow {
                finished: String,
                status: String,
                total: usize,
                completed: usize,
                failed: usize,
            }

            let rows: Vec<ReportRow> = reports
                .iter()
                .map(|r| ReportRow {
                    finished: r.finished_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    status: format!("{:?}", r.status),
                    total: r.snapshot.total,
                    completed: r.snapshot.completed,
                    failed: r.snapshot.failed,
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if reports.is_empty() {
                println!("No runs recorded yet");
                return Ok(());
            }

            for report in &reports {
                let snapshot = &report.snapshot;
                let mark = if snapshot.cancelled {
                    style("○").dim()
                } else if snapshot.failed > 0 {
                    style("!").yellow().bold()
                } else {
                    style("✓").green().bold()
                };
                println!(
                    "{} {}  {} of {} downloaded",
                    mark,
                    report.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    snapshot.completed,
                    snapshot.total
                );
                for name in &snapshot.failed_filenames {
                    println!("    {} {}", style("✗").red(), style(name).dim());
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

const CONFIG_KEYS: &[&str] = &[
    "download_dir",
    "max_concurrent",
    "inter_item_delay_ms",
    "max_retries",
    "speed_limit",
    "conflict_action",
    "user_agent",
    "request_timeout_secs",
];

pub async fn config_action(
    storage: &Storage,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = storage.load_settings().await?;

            match format {
                OutputFormat::Json => print_json(&settings)?,
                OutputFormat::Table => {
                    use tabled::{Table, Tabled};

                    #[derive(Tabled)]
                    struct SettingRow {
                        key: &'static str,
                        value: String,
                    }

                    let rows = CONFIG_KEYS
                        .iter()
                        .map(|&key| {
                            Ok(SettingRow {
                                key,
                                value: get_setting(&settings, key)?,
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    println!("{}", Table::new(rows));
                }
                OutputFormat::Human => {
                    println!("mediagrab Configuration:");
                    println!();
                    println!("  Download directory: {}", settings.download_dir.display());
                    println!("  Max concurrent downloads: {}", settings.max_concurrent);
                    println!("  Delay between items: {} ms", settings.inter_item_delay_ms);
                    println!("  Max retries: {}", settings.max_retries);
                    println!("  Speed limit: {}", format_speed_limit(settings.speed_limit));
                    println!("  On existing file: {:?}", settings.conflict_action);
                    println!("  User agent: {}", settings.user_agent);
                    println!("  Request timeout: {}s", settings.request_timeout_secs);
                    println!();
                    println!("  Stored in: {}", storage.settings_path().display());
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = storage.load_settings().await?;
            println!("{}", get_setting(&settings, &key)?);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = storage.load_settings().await?;
            set_setting(&mut settings, &key, &value)?;
            storage.save_settings(&settings).await?;
            println!("{} {} = {}", style("✓").green().bold(), key, get_setting(&settings, &key)?);
        }

        Some(ConfigAction::Reset { yes }) => {
            let confirmed = yes
                || dialoguer::Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                storage.reset_settings().await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}

fn get_setting(settings: &Settings, key: &str) -> Result<String> {
    let value = match key {
        "download_dir" => settings.download_dir.display().to_string(),
        "max_concurrent" => settings.max_concurrent.to_string(),
        "inter_item_delay_ms" => settings.inter_item_delay_ms.to_string(),
        "max_retries" => settings.max_retries.to_string(),
        "speed_limit" => settings
            .speed_limit
            .map(|limit| limit.to_string())
            .unwrap_or_else(|| "none".to_string()),
        "conflict_action" => match settings.conflict_action {
            ConflictAction::Uniquify => "uniquify".to_string(),
            ConflictAction::Overwrite => "overwrite".to_string(),
        },
        "user_agent" => settings.user_agent.clone(),
        "request_timeout_secs" => settings.request_timeout_secs.to_string(),
        _ => return Err(unknown_key(key)),
    };
    Ok(value)
}

fn set_setting(settings: &mut Settings, key: &str, value: &str) -> Result<()> {
    let value = value.trim();
    match key {
        "download_dir" => settings.download_dir = PathBuf::from(value),
        "max_concurrent" => settings.max_concurrent = value.parse()?,
        "inter_item_delay_ms" => settings.inter_item_delay_ms = value.parse()?,
        "max_retries" => settings.max_retries = value.parse()?,
        "speed_limit" => {
            settings.speed_limit = match value {
                "none" | "unlimited" | "0" => None,
                _ => Some(value.parse()?),
            }
        }
        "conflict_action" => {
            settings.conflict_action = match value.to_lowercase().as_str() {
                "uniquify" => ConflictAction::Uniquify,
                "overwrite" => ConflictAction::Overwrite,
                other => bail!("conflict_action must be 'uniquify' or 'overwrite', got '{}'", other),
            }
        }
        "user_agent" => settings.user_agent = value.to_string(),
        "request_timeout_secs" => settings.request_timeout_secs = value.parse()?,
        _ => return Err(unknown_key(key)),
    }

    QueueConfig::from_settings(settings).validate()?;
    Ok(())
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!("Unknown config key: {} (expected one of: {})", key, CONFIG_KEYS.join(", "))
}
