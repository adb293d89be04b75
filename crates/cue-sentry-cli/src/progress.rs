use colored::*;
use cue_sentry_core::aggregate::ResultSummary;
use cue_sentry_core::classify::severity::severity_label;
use cue_sentry_core::classify::Severity;
use cue_sentry_core::queue::ClassificationJob;
use cue_sentry_core::{ProgressReporter, ScanStats};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

/// CLI progress reporter: a spinner while the scanner walks, one colored
/// log line per finished job.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.guard().take() {
            pb.finish_and_clear();
        }
    }
}

pub fn paint_severity(severity: Option<Severity>) -> ColoredString {
    let label = severity_label(severity);
    match severity {
        Some(Severity::Severe) => label.red().bold(),
        Some(Severity::Moderate) => label.yellow(),
        Some(Severity::Mild) => label.cyan(),
        None => label.green(),
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self, folders: usize) {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        pb.set_style(style);
        pb.set_message(format!("Scanning {} folders...", folders));
        pb.enable_steady_tick(Duration::from_millis(80));

        let mut guard = self.guard();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn on_scan_progress(&self, files_seen: usize, _current_path: &str) {
        if let Some(pb) = self.guard().as_ref() {
            pb.set_message(format!("Scanning... {} files checked", files_seen));
        }
    }

    fn on_scan_complete(&self, stats: &ScanStats, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} Scan complete: {} files checked, {} queued in {:.2}s",
            "✓".green(),
            stats.files_seen,
            format!("{}", stats.files_enqueued).cyan(),
            duration_secs
        );
    }

    fn on_job_complete(&self, job: &ClassificationJob, summary: &ResultSummary) {
        info!(
            "{} -> {} triggers, highest {}, risk {}",
            job.file_path,
            summary.total_triggers,
            paint_severity(summary.highest_severity),
            format!("{:.1}", summary.overall_risk_score).bold()
        );
    }

    fn on_job_failed(&self, job: &ClassificationJob, error: &str) {
        warn!("{} -> {}", job.file_path, error.red());
    }
}
