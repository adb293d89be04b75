use super::{ClassificationJob, ControlChannel, ControlSignal, JobQueue};
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound on how long a waiting consumer goes without re-checking the
/// table, so jobs from other processes are picked up.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

const QUEUE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS job_queue (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    priority    INTEGER NOT NULL,
    payload     TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_job_queue_order ON job_queue(priority DESC, seq);

CREATE TABLE IF NOT EXISTS control_signal (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    signal        TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL
);
";

/// Durable broker backed by its own SQLite file. Jobs survive a restart and
/// several processes may share the file.
pub struct SqliteBroker {
    conn: Mutex<Connection>,
    wake: (Mutex<u64>, Condvar),
    capacity: usize,
    enqueue_wait: Duration,
}

impl SqliteBroker {
    pub fn open(path: &str, capacity: usize, enqueue_wait: Duration) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, capacity, enqueue_wait)
    }

    pub fn open_in_memory(capacity: usize, enqueue_wait: Duration) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, capacity, enqueue_wait)
    }

    fn with_connection(conn: Connection, capacity: usize, enqueue_wait: Duration) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(QUEUE_SCHEMA)?;
        debug!("Queue tables ready");
        Ok(Self {
            conn: Mutex::new(conn),
            wake: (Mutex::new(0), Condvar::new()),
            capacity: capacity.max(1),
            enqueue_wait,
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        let (lock, cvar) = &self.wake;
        let mut generation = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *generation = generation.wrapping_add(1);
        cvar.notify_all();
    }

    /// Sleep until notified, `POLL_INTERVAL` passes, or `deadline`.
    fn wait(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        let (lock, cvar) = &self.wake;
        let guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = cvar
            .wait_timeout(guard, remaining.min(POLL_INTERVAL))
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    fn try_pop(&self) -> Result<Option<ClassificationJob>> {
        let mut conn = self.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let next: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, payload FROM job_queue ORDER BY priority DESC, seq LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((seq, payload)) = next else {
            return Ok(None);
        };
        tx.execute("DELETE FROM job_queue WHERE seq = ?1", params![seq])?;
        tx.commit()?;
        Ok(Some(serde_json::from_str(&payload)?))
    }

    fn try_push(&self, job: &ClassificationJob) -> Result<bool> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let len: i64 = tx.query_row("SELECT COUNT(*) FROM job_queue", [], |row| row.get(0))?;
        if len as usize >= self.capacity {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO job_queue (priority, payload, enqueued_at) VALUES (?1, ?2, ?3)",
            params![job.priority, payload, job.enqueued_at],
        )?;
        tx.commit()?;
        Ok(true)
    }
}

impl JobQueue for SqliteBroker {
    fn enqueue(&self, job: ClassificationJob) -> Result<()> {
        let deadline = Instant::now() + self.enqueue_wait;
        loop {
            if self.try_push(&job)? {
                self.notify();
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::QueueFull(self.capacity));
            }
            self.wait(deadline);
        }
    }

    fn dequeue(&self, timeout: Duration) -> Result<Option<ClassificationJob>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_pop()? {
                self.notify();
                return Ok(Some(job));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.wait(deadline);
        }
    }

    fn len(&self) -> Result<usize> {
        let len: i64 =
            self.connection()
                .query_row("SELECT COUNT(*) FROM job_queue", [], |row| row.get(0))?;
        Ok(len as usize)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ControlChannel for SqliteBroker {
    fn signal(&self, signal: ControlSignal, ttl: Duration) -> Result<()> {
        let expires = now_ms() + ttl.as_millis() as i64;
        self.connection().execute(
            "INSERT OR REPLACE INTO control_signal (id, signal, expires_at_ms) VALUES (1, ?1, ?2)",
            params![signal.as_str(), expires],
        )?;
        self.notify();
        Ok(())
    }

    fn current(&self) -> Result<Option<ControlSignal>> {
        let signal: Option<String> = self
            .connection()
            .query_row(
                "SELECT signal FROM control_signal WHERE id = 1 AND expires_at_ms > ?1",
                params![now_ms()],
                |row| row.get(0),
            )
            .optional()?;
        signal.map(|s| s.parse()).transpose()
    }

    fn clear(&self) -> Result<()> {
        self.connection()
            .execute("DELETE FROM control_signal", [])?;
        Ok(())
    }
}
