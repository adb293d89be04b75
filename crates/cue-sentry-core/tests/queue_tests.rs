use cue_sentry_core::queue::{
    ClassificationJob, ControlChannel, ControlSignal, JobQueue, SqliteBroker, RESCAN_PRIORITY,
    SCAN_PRIORITY,
};
use cue_sentry_core::Error;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn job(file_id: i64, priority: i64) -> ClassificationJob {
    ClassificationJob::new(file_id, &format!("/media/{}.srt", file_id), ".srt", priority)
}

fn broker(capacity: usize) -> SqliteBroker {
    SqliteBroker::open_in_memory(capacity, Duration::from_millis(20)).unwrap()
}

#[test]
fn test_rescans_jump_ahead_of_scanner_jobs() {
    let queue = broker(10);
    queue.enqueue(job(1, SCAN_PRIORITY)).unwrap();
    queue.enqueue(job(2, SCAN_PRIORITY)).unwrap();
    queue.enqueue(job(3, RESCAN_PRIORITY)).unwrap();
    queue.enqueue(job(4, SCAN_PRIORITY)).unwrap();
    assert_eq!(queue.len().unwrap(), 4);

    let order: Vec<i64> = std::iter::from_fn(|| queue.dequeue(Duration::ZERO).unwrap())
        .map(|j| j.file_id)
        .collect();
    assert_eq!(order, vec![3, 1, 2, 4]);
    assert!(queue.is_empty().unwrap());
}

#[test]
fn test_jobs_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let path = path.to_string_lossy();
    {
        let queue = SqliteBroker::open(&path, 10, Duration::from_millis(20)).unwrap();
        queue.enqueue(job(1, SCAN_PRIORITY)).unwrap();
        queue.enqueue(job(2, RESCAN_PRIORITY)).unwrap();
        queue
            .signal(ControlSignal::Stop, Duration::from_secs(60))
            .unwrap();
    }

    let reopened = SqliteBroker::open(&path, 10, Duration::from_millis(20)).unwrap();
    assert_eq!(reopened.len().unwrap(), 2);
    assert_eq!(reopened.current().unwrap(), Some(ControlSignal::Stop));
    assert_eq!(
        reopened.dequeue(Duration::ZERO).unwrap().map(|j| j.file_id),
        Some(2)
    );
}

#[test]
fn test_full_queue_times_out() {
    let queue = broker(2);
    queue.enqueue(job(1, SCAN_PRIORITY)).unwrap();
    queue.enqueue(job(2, SCAN_PRIORITY)).unwrap();

    let started = Instant::now();
    let outcome = queue.enqueue(job(3, SCAN_PRIORITY));
    assert!(matches!(outcome, Err(Error::QueueFull(2))));
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(queue.len().unwrap(), 2);
}

#[test]
fn test_empty_dequeue_waits_for_timeout() {
    let queue = broker(2);
    let started = Instant::now();
    assert!(queue.dequeue(Duration::from_millis(100)).unwrap().is_none());
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn test_waiting_consumer_gets_new_job() {
    let queue = Arc::new(broker(10));
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.dequeue(Duration::from_secs(5)).unwrap())
    };
    thread::sleep(Duration::from_millis(50));
    queue.enqueue(job(42, SCAN_PRIORITY)).unwrap();
    assert_eq!(consumer.join().unwrap().map(|j| j.file_id), Some(42));
}

#[test]
fn test_control_signal_replaces_and_expires() {
    let queue = broker(2);
    assert_eq!(queue.current().unwrap(), None);
    assert!(!queue.is_paused().unwrap());

    queue
        .signal(ControlSignal::Stop, Duration::from_secs(60))
        .unwrap();
    assert!(queue.is_paused().unwrap());

    queue
        .signal(ControlSignal::Start, Duration::from_millis(50))
        .unwrap();
    assert_eq!(queue.current().unwrap(), Some(ControlSignal::Start));
    assert!(!queue.is_paused().unwrap());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(queue.current().unwrap(), None);

    queue
        .signal(ControlSignal::Stop, Duration::from_secs(60))
        .unwrap();
    queue.clear().unwrap();
    assert!(!queue.is_paused().unwrap());
}
