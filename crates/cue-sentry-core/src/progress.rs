use crate::aggregate::ResultSummary;
use crate::queue::ClassificationJob;
use crate::scanner::ScanStats;

/// Hooks for surfacing pipeline progress.
///
/// The CLI implements these with indicatif and tracing. All methods have
/// default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self, _folders: usize) {}
    fn on_scan_progress(&self, _files_seen: usize, _current_path: &str) {}
    fn on_scan_complete(&self, _stats: &ScanStats, _duration_secs: f64) {}
    fn on_job_start(&self, _job: &ClassificationJob) {}
    fn on_job_complete(&self, _job: &ClassificationJob, _summary: &ResultSummary) {}
    fn on_job_failed(&self, _job: &ClassificationJob, _error: &str) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
