use cue_sentry_core::queue::{JobQueue, MemoryBroker};
use cue_sentry_core::scanner::Scanner;
use cue_sentry_core::storage::models::ScanStatus;
use cue_sentry_core::storage::{Database, FileRepository, FolderRepository};
use cue_sentry_core::{AppConfig, Shutdown, SilentReporter};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

const CUE: &str = "1\n00:00:01,000 --> 00:00:02,500\nHello there.\n\n";

fn create_test_tree(root: &Path) {
    fs::create_dir_all(root.join("show/season1")).unwrap();
    fs::write(root.join("show/season1/e01.srt"), CUE).unwrap();
    fs::write(root.join("show/season1/e02.vtt"), format!("WEBVTT\n\n{}", CUE)).unwrap();
    fs::write(root.join("show/notes.txt"), "not a subtitle").unwrap();
    fs::write(root.join("show/sample_clip.srt"), CUE).unwrap();
    fs::write(root.join("show/empty.srt"), "").unwrap();
}

struct Fixture {
    db: Arc<Database>,
    broker: Arc<MemoryBroker>,
    scanner: Scanner,
}

fn fixture(root: &Path) -> Fixture {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = Arc::new(MemoryBroker::new(100, Duration::from_millis(10)));
    db.add_folder(&root.to_string_lossy(), 0).unwrap();
    let scanner = Scanner::new(db.clone(), broker.clone(), &AppConfig::default());
    Fixture {
        db,
        broker,
        scanner,
    }
}

fn scan(fx: &Fixture) -> cue_sentry_core::ScanStats {
    fx.scanner
        .run_once(&Shutdown::new(), &SilentReporter)
        .unwrap()
}

fn drain(broker: &MemoryBroker) -> Vec<String> {
    let mut paths = Vec::new();
    while let Some(job) = broker.dequeue(Duration::ZERO).unwrap() {
        paths.push(job.file_path);
    }
    paths
}

#[test]
fn test_first_pass_enqueues_matching_files() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let fx = fixture(dir.path());

    let stats = scan(&fx);
    assert_eq!(stats.folders_scanned, 1);
    assert_eq!(stats.files_seen, 2);
    assert_eq!(stats.files_enqueued, 2);

    let queued = drain(&fx.broker);
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().all(|p| !p.contains("sample")));

    let file = fx
        .db
        .find_file_by_path(&dir.path().join("show/season1/e01.srt").to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(file.scan_status, ScanStatus::Queued);
    assert_eq!(file.file_type, ".srt");
    assert!(file.fingerprint.is_some());
}

#[test]
fn test_queued_files_are_not_enqueued_twice() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let fx = fixture(dir.path());

    scan(&fx);
    let second = scan(&fx);
    assert_eq!(second.files_seen, 2);
    assert_eq!(second.files_enqueued, 0);
    assert_eq!(fx.broker.len().unwrap(), 2);
}

#[test]
fn test_completed_files_only_return_when_changed() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let fx = fixture(dir.path());
    scan(&fx);
    drain(&fx.broker);

    let e01 = dir.path().join("show/season1/e01.srt");
    let e02 = dir.path().join("show/season1/e02.vtt");
    for path in [&e01, &e02] {
        let file = fx
            .db
            .find_file_by_path(&path.to_string_lossy())
            .unwrap()
            .unwrap();
        fx.db
            .connection()
            .execute(
                "UPDATE media_file SET scan_status = 'completed', last_scanned = created_at \
                 WHERE id = ?1",
                [file.id],
            )
            .unwrap();
    }
    assert_eq!(scan(&fx).files_enqueued, 0);

    // Same bytes, newer mtime.
    fs::File::options()
        .write(true)
        .open(&e01)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();
    // New bytes.
    fs::write(&e02, format!("WEBVTT\n\n{}2\n00:00:03.000 --> 00:00:04.000\nBye.\n", CUE)).unwrap();

    let stats = scan(&fx);
    assert_eq!(stats.files_enqueued, 2);
    let mut queued = drain(&fx.broker);
    queued.sort();
    assert_eq!(
        queued,
        vec![
            e01.to_string_lossy().into_owned(),
            e02.to_string_lossy().into_owned()
        ]
    );
}

#[test]
fn test_failed_file_waits_for_explicit_rescan() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let fx = fixture(dir.path());
    scan(&fx);
    drain(&fx.broker);

    let e01 = dir.path().join("show/season1/e01.srt");
    let file = fx
        .db
        .find_file_by_path(&e01.to_string_lossy())
        .unwrap()
        .unwrap();
    fx.db
        .set_file_status(file.id, ScanStatus::Error, Some("no subtitle text found"))
        .unwrap();
    fx.db
        .set_file_status(
            fx.db
                .find_file_by_path(&dir.path().join("show/season1/e02.vtt").to_string_lossy())
                .unwrap()
                .unwrap()
                .id,
            ScanStatus::Pending,
            None,
        )
        .unwrap();

    // The pending file is picked up again; the failed one is not.
    let stats = scan(&fx);
    assert_eq!(stats.files_enqueued, 1);
    let queued = drain(&fx.broker);
    assert!(queued[0].ends_with("e02.vtt"));
}

#[test]
fn test_missing_folder_is_skipped() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let elsewhere = tempdir().unwrap();
    let fx = fixture(dir.path());
    fx.db
        .add_folder(&elsewhere.path().join("gone").to_string_lossy(), 5)
        .unwrap();

    let stats = scan(&fx);
    assert_eq!(stats.folders_skipped, 1);
    assert_eq!(stats.folders_scanned, 1);
    assert_eq!(stats.files_enqueued, 2);
}

#[test]
fn test_nested_folders_are_walked_once() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let fx = fixture(dir.path());
    fx.db
        .add_folder(&dir.path().join("show").to_string_lossy(), 9)
        .unwrap();

    let stats = scan(&fx);
    assert_eq!(stats.folders_scanned, 1);
    assert_eq!(stats.files_enqueued, 2);
}

#[test]
fn test_full_queue_parks_file_as_pending() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = Arc::new(MemoryBroker::new(1, Duration::from_millis(10)));
    db.add_folder(&dir.path().to_string_lossy(), 0).unwrap();
    let scanner = Scanner::new(db.clone(), broker.clone(), &AppConfig::default());

    assert!(scanner.run_once(&Shutdown::new(), &SilentReporter).is_err());
    let parked = db
        .find_file_by_path(&dir.path().join("show/season1/e02.vtt").to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(parked.scan_status, ScanStatus::Pending);
    assert!(parked.error_message.is_some());

    // Once there is room the parked file goes through.
    drain(&broker);
    let stats = scanner.run_once(&Shutdown::new(), &SilentReporter).unwrap();
    assert_eq!(stats.files_enqueued, 1);
}
