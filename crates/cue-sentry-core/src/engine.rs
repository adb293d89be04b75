use crate::classify::ModelRegistry;
use crate::config::AppConfig;
use crate::control::Control;
use crate::error::Result;
use crate::progress::ProgressReporter;
use crate::queue::{Broker, SqliteBroker};
use crate::scanner::{ScanStats, Scanner};
use crate::storage::{Database, Store};
use crate::worker::{self, Worker, WorkerMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Process-wide stop flag. The scanner finishes its current file and each
/// worker its current job before returning.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless shutdown is triggered first. Returns true
    /// when the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// The assembled pipeline: store, broker, model registry and configuration.
pub struct Pipeline {
    config: AppConfig,
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    registry: Arc<ModelRegistry>,
}

impl Pipeline {
    pub fn new(config: AppConfig, store: Arc<dyn Store>, broker: Arc<dyn Broker>) -> Self {
        let registry = Arc::new(ModelRegistry::new(config.classification.global_threshold));
        Self {
            config,
            store,
            broker,
            registry,
        }
    }

    /// Open the SQLite store and the durable queue named in `config`. Either
    /// being unreachable is fatal.
    pub fn open(config: AppConfig) -> Result<Self> {
        let store = Database::open(&config.database_path)?;
        let broker = SqliteBroker::open(
            &config.queue_path,
            config.queue_capacity,
            Duration::from_millis(config.pop_timeout_ms),
        )?;
        info!(
            "Opened store {} and queue {}",
            config.database_path, config.queue_path
        );
        Ok(Self::new(config, Arc::new(store), Arc::new(broker)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn control(&self) -> Control {
        Control::new(
            Arc::clone(&self.store),
            Arc::clone(&self.broker),
            Duration::from_secs(self.config.control_ttl_secs),
        )
    }

    /// Seed configured categories, models and root folders that the store
    /// does not know yet, then load the ensemble.
    pub fn bootstrap(&self) -> Result<()> {
        let mut seeded = 0;
        for category in self.config.category_seeds()? {
            if self.store.seed_category(&category)? {
                seeded += 1;
            }
        }
        for model in self.config.model_seeds()? {
            if self.store.seed_model(&model)? {
                seeded += 1;
            }
        }
        let known: Vec<String> = self
            .store
            .list_folders()?
            .into_iter()
            .map(|f| f.path)
            .collect();
        for root in &self.config.root_paths {
            if !known.contains(root) {
                self.store.add_folder(root, 0)?;
                seeded += 1;
            }
        }
        debug!("Bootstrap seeded {} rows", seeded);
        self.registry.refresh(self.store.as_ref())?;
        Ok(())
    }

    pub fn scanner(&self) -> Scanner {
        Scanner::new(Arc::clone(&self.store), Arc::clone(&self.broker), &self.config)
    }

    fn worker(&self) -> Worker {
        Worker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.broker),
            Arc::clone(&self.registry),
            self.config.classification.clone(),
            self.config.risk.clone(),
            Duration::from_millis(self.config.pop_timeout_ms),
        )
    }

    /// One scanner tick: reload models, then walk the folders. Skipped while
    /// a `stop` signal is active.
    pub fn scan_once(
        &self,
        shutdown: &Shutdown,
        reporter: &dyn ProgressReporter,
    ) -> Result<Option<ScanStats>> {
        if self.broker.is_paused()? {
            info!("Pipeline stopped by control signal, skipping scan");
            return Ok(None);
        }
        self.registry.refresh(self.store.as_ref())?;
        self.scanner().run_once(shutdown, reporter).map(Some)
    }

    /// Run the worker pool in the calling thread until shutdown or, when
    /// draining, until the queue is empty.
    pub fn work(
        &self,
        mode: WorkerMode,
        shutdown: &Shutdown,
        reporter: &dyn ProgressReporter,
    ) -> Result<usize> {
        worker::run_pool(&self.worker(), self.config.workers, mode, shutdown, reporter)
    }

    /// Scanner on its own thread (one pass now, then every interval) and the
    /// worker pool on the calling thread. Returns after shutdown.
    pub fn run(&self, shutdown: &Shutdown, reporter: &dyn ProgressReporter) -> Result<()> {
        let interval = Duration::from_secs(self.config.scan_interval_secs);
        info!(
            "Pipeline running: {} workers, scan every {:?}",
            self.config.workers, interval
        );

        thread::scope(|scope| {
            let scanner = thread::Builder::new()
                .name("cue-scanner".to_string())
                .spawn_scoped(scope, || {
                    while !shutdown.is_triggered() {
                        if let Err(e) = self.scan_once(shutdown, reporter) {
                            error!("Scan pass failed: {}", e);
                        }
                        shutdown.sleep(interval);
                    }
                    debug!("Scanner stopped");
                });
            if let Err(e) = &scanner {
                error!("Could not start scanner thread: {}", e);
                shutdown.trigger();
            }

            let result = self.work(WorkerMode::Continuous, shutdown, reporter);
            if result.is_err() {
                shutdown.trigger();
            }
            if let Ok(handle) = scanner {
                if handle.join().is_err() {
                    warn!("Scanner thread panicked");
                }
            }
            result.map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_interrupts_sleep() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.trigger();
        });
        let start = Instant::now();
        assert!(!shutdown.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
