mod walk;

pub use walk::{collect_candidates, WalkFilter};

use crate::config::{non_overlapping_directories, AppConfig};
use crate::engine::Shutdown;
use crate::error::Result;
use crate::fingerprint::{extension_of, Fingerprinter};
use crate::progress::ProgressReporter;
use crate::queue::{Broker, ClassificationJob, SCAN_PRIORITY};
use crate::storage::models::{FileObservation, MediaFile, ScanStatus};
use crate::storage::Store;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Why a file was picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyReason {
    New,
    Modified,
    ContentChanged,
    NotQueued,
    StaleClaim,
    NeverScanned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Process(DirtyReason),
    Skip,
}

/// Decide whether an observed file needs classification, given its stored
/// record. Checked in order: unknown path, newer mtime, changed fingerprint,
/// then the stored status. Unchanged files that failed before stay failed
/// until an explicit rescan; files already queued or processing are left
/// alone unless the claim is older than `stale_claim`.
pub fn decide(
    existing: Option<&MediaFile>,
    observed: &FileObservation,
    stale_claim: Duration,
    now: DateTime<Utc>,
) -> Decision {
    let Some(file) = existing else {
        return Decision::Process(DirtyReason::New);
    };
    if observed.last_modified_ns > file.last_modified_ns {
        return Decision::Process(DirtyReason::Modified);
    }
    if observed.fingerprint.is_some() && observed.fingerprint != file.fingerprint {
        return Decision::Process(DirtyReason::ContentChanged);
    }
    match file.scan_status {
        ScanStatus::Error => return Decision::Skip,
        ScanStatus::Pending => return Decision::Process(DirtyReason::NotQueued),
        status if status.is_in_flight() => {
            return if claim_is_stale(&file.status_changed_at, stale_claim, now) {
                Decision::Process(DirtyReason::StaleClaim)
            } else {
                Decision::Skip
            };
        }
        _ => {}
    }
    if file.last_scanned.is_none() {
        return Decision::Process(DirtyReason::NeverScanned);
    }
    Decision::Skip
}

fn claim_is_stale(changed_at: &str, stale_claim: Duration, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(changed_at) {
        Ok(at) => {
            let age = now.signed_duration_since(at.with_timezone(&Utc));
            age.num_milliseconds() >= stale_claim.as_millis() as i64
        }
        Err(_) => true,
    }
}

/// Counters for one scanner pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub folders_scanned: usize,
    pub folders_skipped: usize,
    pub files_seen: usize,
    pub files_enqueued: usize,
    pub files_failed: usize,
}

/// Walks the active scan folders and enqueues every dirty file exactly once.
pub struct Scanner {
    store: Arc<dyn Store>,
    queue: Arc<dyn Broker>,
    fingerprinter: Fingerprinter,
    filter: WalkFilter,
    stale_claim: Duration,
}

impl Scanner {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn Broker>, config: &AppConfig) -> Self {
        Self {
            store,
            queue,
            fingerprinter: Fingerprinter::new(&config.fingerprint),
            filter: WalkFilter::new(&config.extensions, &config.ignore_patterns),
            stale_claim: Duration::from_secs(config.stale_claim_secs),
        }
    }

    /// One pass over every active folder, highest priority first. A missing
    /// folder or an unreadable file is logged and skipped; only store and
    /// queue failures abort the pass.
    pub fn run_once(
        &self,
        shutdown: &Shutdown,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanStats> {
        let started = Instant::now();
        let folders = self.store.active_folders()?;
        let roots = non_overlapping_directories(folders.into_iter().map(|f| f.path).collect());
        reporter.on_scan_start(roots.len());

        let mut stats = ScanStats::default();
        for root in &roots {
            if shutdown.is_triggered() {
                break;
            }
            let candidates = match collect_candidates(Path::new(root), &self.filter) {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Skipping folder {} this pass: {}", root, e);
                    stats.folders_skipped += 1;
                    continue;
                }
            };
            stats.folders_scanned += 1;

            for path in candidates {
                if shutdown.is_triggered() {
                    break;
                }
                stats.files_seen += 1;
                let path_str = path.to_string_lossy().into_owned();
                reporter.on_scan_progress(stats.files_seen, &path_str);

                let observed = match observe(&path, &self.fingerprinter) {
                    Ok(observed) => observed,
                    Err(e) => {
                        warn!("Skipping {}: {}", path.display(), e);
                        stats.files_failed += 1;
                        continue;
                    }
                };
                if self.consider(observed)? {
                    stats.files_enqueued += 1;
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        info!(
            "Scan pass: {} folders, {} files seen, {} enqueued, {} unreadable ({:.2}s)",
            stats.folders_scanned, stats.files_seen, stats.files_enqueued, stats.files_failed, elapsed
        );
        reporter.on_scan_complete(&stats, elapsed);
        Ok(stats)
    }

    /// Apply the decision rule to one observation; returns true when a job
    /// was enqueued.
    fn consider(&self, observed: FileObservation) -> Result<bool> {
        let existing = self.store.find_file_by_path(&observed.path)?;
        let reason = match decide(existing.as_ref(), &observed, self.stale_claim, Utc::now()) {
            Decision::Skip => return Ok(false),
            Decision::Process(reason) => reason,
        };
        debug!("{} is dirty ({:?})", observed.path, reason);

        let file = self.store.upsert_queued_file(&observed)?;
        let job = ClassificationJob::new(file.id, &file.path, &file.file_type, SCAN_PRIORITY);
        if let Err(e) = self.queue.enqueue(job) {
            // Parked as pending so the next pass retries it.
            self.store
                .set_file_status(file.id, ScanStatus::Pending, Some(&e.to_string()))?;
            return Err(e);
        }
        Ok(true)
    }
}

/// Stat and fingerprint one file.
pub fn observe(path: &Path, fingerprinter: &Fingerprinter) -> std::io::Result<FileObservation> {
    let metadata = fs::metadata(path)?;
    let modified = metadata.modified()?;
    let last_modified_ns = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    Ok(FileObservation {
        path: path.to_string_lossy().into_owned(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_type: extension_of(path),
        file_size: metadata.len() as i64,
        fingerprint: Some(fingerprinter.fingerprint(path)?),
        last_modified_ns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(status: ScanStatus, last_scanned: Option<&str>, changed_at: &str) -> MediaFile {
        MediaFile {
            id: 1,
            path: "/media/a.srt".to_string(),
            file_name: "a.srt".to_string(),
            file_type: ".srt".to_string(),
            file_size: 10,
            fingerprint: Some("abc".to_string()),
            last_modified_ns: 100,
            last_scanned: last_scanned.map(str::to_string),
            scan_status: status,
            status_changed_at: changed_at.to_string(),
            error_message: None,
            created_at: changed_at.to_string(),
        }
    }

    fn observed(mtime: i64, fingerprint: &str) -> FileObservation {
        FileObservation {
            path: "/media/a.srt".to_string(),
            file_name: "a.srt".to_string(),
            file_type: ".srt".to_string(),
            file_size: 10,
            fingerprint: Some(fingerprint.to_string()),
            last_modified_ns: mtime,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00.000Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_unknown_modified_and_changed_files_are_dirty() {
        let done = stored(ScanStatus::Completed, Some("2024-05-01T11:00:00.000Z"), "2024-05-01T11:00:00.000Z");
        assert_eq!(
            decide(None, &observed(100, "abc"), HOUR, now()),
            Decision::Process(DirtyReason::New)
        );
        assert_eq!(
            decide(Some(&done), &observed(101, "abc"), HOUR, now()),
            Decision::Process(DirtyReason::Modified)
        );
        assert_eq!(
            decide(Some(&done), &observed(100, "xyz"), HOUR, now()),
            Decision::Process(DirtyReason::ContentChanged)
        );
        assert_eq!(decide(Some(&done), &observed(100, "abc"), HOUR, now()), Decision::Skip);
    }

    #[test]
    fn test_in_flight_claims_expire() {
        let fresh = stored(ScanStatus::Queued, None, "2024-05-01T11:30:00.000Z");
        let stale = stored(ScanStatus::Processing, None, "2024-05-01T10:00:00.000Z");
        assert_eq!(decide(Some(&fresh), &observed(100, "abc"), HOUR, now()), Decision::Skip);
        assert_eq!(
            decide(Some(&stale), &observed(100, "abc"), HOUR, now()),
            Decision::Process(DirtyReason::StaleClaim)
        );
    }

    #[test]
    fn test_failed_file_waits_for_rescan_unless_changed() {
        let failed = stored(ScanStatus::Error, None, "2024-05-01T11:00:00.000Z");
        assert_eq!(decide(Some(&failed), &observed(100, "abc"), HOUR, now()), Decision::Skip);
        assert_eq!(
            decide(Some(&failed), &observed(100, "new"), HOUR, now()),
            Decision::Process(DirtyReason::ContentChanged)
        );
    }

    #[test]
    fn test_pending_and_never_scanned() {
        let pending = stored(ScanStatus::Pending, Some("2024-05-01T09:00:00.000Z"), "2024-05-01T11:59:00.000Z");
        assert_eq!(
            decide(Some(&pending), &observed(100, "abc"), HOUR, now()),
            Decision::Process(DirtyReason::NotQueued)
        );
        let odd = stored(ScanStatus::Completed, None, "2024-05-01T11:59:00.000Z");
        assert_eq!(
            decide(Some(&odd), &observed(100, "abc"), HOUR, now()),
            Decision::Process(DirtyReason::NeverScanned)
        );
    }
}
