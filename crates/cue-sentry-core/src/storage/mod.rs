pub mod models;
mod queries;
pub mod repository;
mod sqlite;

pub use repository::{
    CategoryRepository, FileRepository, FolderRepository, ModelRepository, ScanResultRepository,
    StatsRepository, Store,
};
pub use sqlite::{Database, SCHEMA_VERSION};

use chrono::{SecondsFormat, Utc};

/// UTC timestamp with fixed millisecond precision, so stored values sort
/// lexicographically in time order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
