pub mod aggregate;
pub mod classify;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod progress;
pub mod queue;
pub mod scanner;
pub mod storage;
pub mod worker;

pub use config::AppConfig;
pub use control::{Control, PipelineStatus};
pub use engine::{Pipeline, Shutdown};
pub use error::{Error, Result};
pub use progress::{ProgressReporter, SilentReporter};
pub use scanner::ScanStats;
pub use worker::WorkerMode;
