//! Hand-off between the scanner and the workers. Job transport and the
//! start/stop control signal are separate interfaces; a [`Broker`] carries
//! both.

mod memory;
mod sqlite;

pub use memory::MemoryBroker;
pub use sqlite::SqliteBroker;

use crate::error::{Error, Result};
use crate::storage::now_timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Priority of jobs found by the scanner.
pub const SCAN_PRIORITY: i64 = 1;
/// Priority of operator-requested rescans; they jump ahead of scanner work.
pub const RESCAN_PRIORITY: i64 = 2;

static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationJob {
    pub job_id: String,
    pub file_id: i64,
    pub file_path: String,
    pub file_type: String,
    pub priority: i64,
    pub enqueued_at: String,
}

impl ClassificationJob {
    pub fn new(file_id: i64, file_path: &str, file_type: &str, priority: i64) -> Self {
        let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            job_id: format!(
                "job-{}-{}-{}",
                file_id,
                chrono::Utc::now().timestamp_millis(),
                seq
            ),
            file_id,
            file_path: file_path.to_string(),
            file_type: file_type.to_string(),
            priority,
            enqueued_at: now_timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    Start,
    Stop,
}

impl ControlSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlSignal::Start => "start",
            ControlSignal::Stop => "stop",
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlSignal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(ControlSignal::Start),
            "stop" => Ok(ControlSignal::Stop),
            other => Err(Error::Queue(format!("unknown control signal '{}'", other))),
        }
    }
}

/// Priority work queue: highest priority first, FIFO within a priority.
pub trait JobQueue: Send + Sync {
    /// Add a job. A full queue waits briefly for room, then fails with
    /// [`Error::QueueFull`].
    fn enqueue(&self, job: ClassificationJob) -> Result<()>;
    /// Take the next job, waiting at most `timeout` for one to arrive.
    fn dequeue(&self, timeout: Duration) -> Result<Option<ClassificationJob>>;
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Side-band start/stop signal. A signal expires after its TTL so a stale
/// `stop` cannot wedge the pipeline.
pub trait ControlChannel: Send + Sync {
    fn signal(&self, signal: ControlSignal, ttl: Duration) -> Result<()>;
    /// The unexpired signal, if any.
    fn current(&self) -> Result<Option<ControlSignal>>;
    fn clear(&self) -> Result<()>;

    fn is_paused(&self) -> Result<bool> {
        Ok(self.current()? == Some(ControlSignal::Stop))
    }
}

pub trait Broker: JobQueue + ControlChannel {}

impl<T: JobQueue + ControlChannel> Broker for T {}
