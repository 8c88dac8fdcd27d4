//! Progress display for a download run

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use mediagrab_types::{ProgressSnapshot, QueueEvent};
use std::cell::Cell;
use std::time::Duration;

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {wide_msg}";

/// Renders queue events as an overall bar plus a line per failure
pub struct RunProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    paused: Cell<bool>,
}

impl RunProgress {
    pub fn new(total: usize, visible: bool) -> Self {
        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let overall = multi.add(ProgressBar::new(total as u64));
        overall.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        overall.enable_steady_tick(Duration::from_millis(120));

        Self {
            multi,
            overall,
            paused: Cell::new(false),
        }
    }

    pub fn handle_event(&self, event: &QueueEvent) {
        match event {
            QueueEvent::Progress(snapshot) => {
                self.overall.set_length(snapshot.total as u64);
                self.overall.set_position(snapshot.finished() as u64);
                if snapshot.paused != self.paused.replace(snapshot.paused) {
                    if snapshot.paused {
                        self.overall.set_message(format!("{} Paused", style("⏸").yellow()));
                    } else {
                        self.overall.set_message("");
                    }
                }
            }

            QueueEvent::FileStarted { filename, .. } => {
                self.overall.set_message(filename.clone());
            }

            QueueEvent::Error { item, message } => {
                self.println(format!(
                    "{} {}: {}",
                    style("✗").red().bold(),
                    item.filename,
                    style(message).red()
                ));
            }

            QueueEvent::Complete(snapshot) => {
                self.overall.set_position(snapshot.finished() as u64);
                self.overall.finish_with_message(format!(
                    "{} {} downloaded, {} failed",
                    style("✓").green().bold(),
                    snapshot.completed,
                    snapshot.failed
                ));
            }
        }
    }

    /// Print a line above the bars without tearing them
    pub fn println(&self, message: impl AsRef<str>) {
        if self.multi.println(message.as_ref()).is_err() {
            eprintln!("{}", message.as_ref());
        }
    }

    /// Close the bar if no `Complete` event did
    pub fn finish(&self, snapshot: &ProgressSnapshot) {
        if self.overall.is_finished() {
            return;
        }
        if snapshot.cancelled {
            self.overall
                .abandon_with_message(format!("{} Cancelled", style("○").dim()));
        } else {
            self.overall.finish_and_clear();
        }
    }
}
