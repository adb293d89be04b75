use crate::aggregate::{self, ResultSummary, RunInfo};
use crate::classify::ModelRegistry;
use crate::config::{ClassificationSettings, RiskSettings};
use crate::engine::Shutdown;
use crate::error::{Error, Result};
use crate::extract::extract_spans;
use crate::progress::ProgressReporter;
use crate::queue::{Broker, ClassificationJob};
use crate::storage::models::ScanStatus;
use crate::storage::Store;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const BACKOFF_START: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const PAUSE_POLL: Duration = Duration::from_secs(1);

/// Exponential delay for retrying a failing broker.
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: BACKOFF_START,
        }
    }
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(BACKOFF_MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.next = BACKOFF_START;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Run until shutdown.
    Continuous,
    /// Exit once the queue is empty (or paused).
    Drain,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        result_id: i64,
        summary: ResultSummary,
    },
    /// The file could not be classified; it is marked `error`.
    Failed(String),
    /// The file row no longer exists.
    Dropped,
}

/// Shared state for every worker in the pool.
pub struct Worker {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    registry: Arc<ModelRegistry>,
    settings: ClassificationSettings,
    risk: RiskSettings,
    pop_timeout: Duration,
}

impl Worker {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        registry: Arc<ModelRegistry>,
        settings: ClassificationSettings,
        risk: RiskSettings,
        pop_timeout: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            registry,
            settings,
            risk,
            pop_timeout,
        }
    }

    /// Classify one file and persist the outcome. An `Err` means the result
    /// could not be stored; the file is left as it was for a later retry.
    pub fn process_job(&self, job: &ClassificationJob) -> Result<JobOutcome> {
        let started = Instant::now();
        match self
            .store
            .set_file_status(job.file_id, ScanStatus::Processing, None)
        {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                warn!("Dropping job {}: file {} is gone", job.job_id, job.file_id);
                return Ok(JobOutcome::Dropped);
            }
            Err(e) => return Err(e),
        }

        let spans = match extract_spans(Path::new(&job.file_path), self.settings.context_window) {
            Ok(spans) => spans,
            Err(e) => {
                let message = e.to_string();
                error!("Job {} failed: {}", job.job_id, message);
                self.store
                    .set_file_status(job.file_id, ScanStatus::Error, Some(&message))?;
                return Ok(JobOutcome::Failed(message));
            }
        };

        // One snapshot for the whole file.
        let ensemble = self.registry.current();
        if ensemble.model_count() == 0 {
            warn!("No active models; {} is recorded without triggers", job.file_path);
        }

        let mut triggers = Vec::new();
        for span in &spans {
            let input = span.model_input(self.settings.score_with_context, self.settings.max_input_chars);
            let verdicts = ensemble.evaluate(&input);
            triggers.extend(aggregate::span_triggers(span, verdicts));
        }
        debug!(
            "{}: {} spans, {} triggers before persistence",
            job.file_path,
            spans.len(),
            triggers.len()
        );

        let run = RunInfo {
            file_id: job.file_id,
            model_version: ensemble.version().to_string(),
            model_count: ensemble.model_count(),
            span_count: spans.len(),
            processing_time_ms: started.elapsed().as_millis() as i64,
        };
        let (result_id, summary) = aggregate::persist(self.store.as_ref(), &run, triggers, &self.risk)?;
        Ok(JobOutcome::Completed { result_id, summary })
    }

    /// `process_job` with panics contained: a panicking file is marked
    /// `error` and the worker thread keeps running.
    pub fn process_job_guarded(&self, job: &ClassificationJob) -> Result<JobOutcome> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process_job(job))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = format!("classification panicked: {}", panic_message(payload.as_ref()));
                error!("Job {} for {}: {}", job.job_id, job.file_path, message);
                self.store
                    .set_file_status(job.file_id, ScanStatus::Error, Some(&message))?;
                Ok(JobOutcome::Failed(message))
            }
        }
    }

    /// Pull and process jobs until shutdown (or, when draining, until the
    /// queue runs dry). Broker failures are retried with backoff.
    pub fn run(
        &self,
        worker_id: usize,
        mode: WorkerMode,
        shutdown: &Shutdown,
        reporter: &dyn ProgressReporter,
    ) -> usize {
        let mut backoff = Backoff::default();
        let mut processed = 0;
        debug!("Worker {} started", worker_id);

        while !shutdown.is_triggered() {
            match self.broker.is_paused() {
                Ok(true) if mode == WorkerMode::Drain => break,
                Ok(true) => {
                    shutdown.sleep(PAUSE_POLL);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("Worker {}: control channel unavailable ({}), retrying in {:?}", worker_id, e, delay);
                    shutdown.sleep(delay);
                    continue;
                }
            }

            let job = match self.broker.dequeue(self.pop_timeout) {
                Ok(Some(job)) => job,
                Ok(None) if mode == WorkerMode::Drain => break,
                Ok(None) => continue,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("Worker {}: dequeue failed ({}), retrying in {:?}", worker_id, e, delay);
                    shutdown.sleep(delay);
                    continue;
                }
            };
            backoff.reset();

            reporter.on_job_start(&job);
            match self.process_job_guarded(&job) {
                Ok(JobOutcome::Completed { summary, .. }) => {
                    processed += 1;
                    reporter.on_job_complete(&job, &summary);
                }
                Ok(JobOutcome::Failed(reason)) => {
                    processed += 1;
                    reporter.on_job_failed(&job, &reason);
                }
                Ok(JobOutcome::Dropped) => {}
                Err(e) => {
                    error!("Job {} for {} not persisted: {}", job.job_id, job.file_path, e);
                    reporter.on_job_failed(&job, &e.to_string());
                }
            }
        }

        debug!("Worker {} stopped after {} jobs", worker_id, processed);
        processed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `workers` blocking worker loops on a dedicated rayon pool and wait for
/// all of them. Returns the number of jobs handled.
pub fn run_pool(
    worker: &Worker,
    workers: usize,
    mode: WorkerMode,
    shutdown: &Shutdown,
    reporter: &dyn ProgressReporter,
) -> Result<usize> {
    let workers = workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("cue-worker-{}", i))
        .build()
        .map_err(|e| Error::Other(format!("failed to start worker pool: {}", e)))?;

    let (tx, rx) = std::sync::mpsc::channel();
    pool.scope(|scope| {
        for id in 0..workers {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let handled = worker.run(id, mode, shutdown, reporter);
                let _ = tx.send(handled);
            });
        }
    });
    drop(tx);

    let total: usize = rx.iter().sum();
    info!("Worker pool finished: {} jobs handled", total);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u128> = (0..10).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(&delays[..4], &[250, 500, 1000, 2000]);
        assert_eq!(*delays.last().unwrap(), 30_000);
        backoff.reset();
        assert_eq!(backoff.next_delay(), BACKOFF_START);
    }

    #[test]
    fn test_panic_message_from_payload() {
        let payload = panic::catch_unwind(|| panic!("hours out of range")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "hours out of range");

        let count = 3;
        let payload = panic::catch_unwind(move || panic!("bad cue {}", count)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bad cue 3");

        let payload = panic::catch_unwind(|| std::panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
