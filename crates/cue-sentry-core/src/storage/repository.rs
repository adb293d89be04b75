//! Data-access interfaces, one per entity. The pipeline depends on these
//! traits; [`super::Database`] is the SQLite implementation.

use super::models::*;
use crate::classify::Severity;
use crate::error::Result;

pub trait FolderRepository {
    /// Insert a folder, or reactivate it and update its priority.
    fn add_folder(&self, path: &str, priority: i64) -> Result<ScanFolder>;
    fn remove_folder(&self, path: &str) -> Result<bool>;
    fn set_folder_active(&self, path: &str, active: bool) -> Result<bool>;
    fn list_folders(&self) -> Result<Vec<ScanFolder>>;
    /// Active folders, highest priority first.
    fn active_folders(&self) -> Result<Vec<ScanFolder>>;
}

pub trait FileRepository {
    fn get_file(&self, id: i64) -> Result<Option<MediaFile>>;
    fn find_file_by_path(&self, path: &str) -> Result<Option<MediaFile>>;
    /// Insert or refresh the row keyed by path and move it to `queued`.
    fn upsert_queued_file(&self, observed: &FileObservation) -> Result<MediaFile>;
    /// Last-write-wins status update.
    fn set_file_status(&self, id: i64, status: ScanStatus, error_message: Option<&str>)
        -> Result<()>;
}

pub trait CategoryRepository {
    /// Insert the category unless one with the same name exists.
    fn seed_category(&self, category: &ModelCategory) -> Result<bool>;
    /// Insert the category or replace every field of the existing row.
    fn upsert_category(&self, category: &ModelCategory) -> Result<()>;
    fn list_categories(&self) -> Result<Vec<ModelCategory>>;
    fn active_categories(&self) -> Result<Vec<ModelCategory>>;
}

pub trait ModelRepository {
    fn insert_model(&self, model: &NewModel) -> Result<NlpModel>;
    /// Insert the model unless its identifier is already registered.
    fn seed_model(&self, model: &NewModel) -> Result<bool>;
    fn get_model(&self, id: i64) -> Result<Option<NlpModel>>;
    fn list_models(&self) -> Result<Vec<NlpModel>>;
    fn active_models(&self) -> Result<Vec<NlpModel>>;
    fn set_model_status(&self, id: i64, status: ModelStatus, error_message: Option<&str>)
        -> Result<()>;
    fn set_model_active(&self, id: i64, active: bool) -> Result<bool>;
    /// Replace the model's definition and send it back to `pending`.
    fn update_model(&self, id: i64, model: &NewModel) -> Result<NlpModel>;
}

pub trait ScanResultRepository {
    /// Write the result, its triggers and the file's `completed` transition
    /// atomically. Returns the new result id.
    fn record_scan_result(&self, result: &NewScanResult, triggers: &[Trigger]) -> Result<i64>;
    fn latest_result(&self, file_id: i64) -> Result<Option<ScanResult>>;
    fn results_for_file(&self, file_id: i64) -> Result<Vec<ScanResult>>;
    /// Latest result of each file matching `filter`, riskiest first, plus
    /// the number of matches before paging.
    fn list_latest_results(
        &self,
        filter: &ResultFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ResultRow>, i64)>;
    fn triggers_for_result(&self, scan_result_id: i64) -> Result<Vec<Trigger>>;
    fn override_latest_result(
        &self,
        file_id: i64,
        overall_risk_score: f64,
        highest_severity: Option<Severity>,
        notes: &str,
    ) -> Result<ScanResult>;
    fn update_trigger(
        &self,
        trigger_id: i64,
        severity: Option<Severity>,
        confidence_score: Option<f64>,
    ) -> Result<Trigger>;
}

pub trait StatsRepository {
    fn status_counts(&self) -> Result<Vec<(ScanStatus, i64)>>;
    fn last_activity(&self) -> Result<Option<String>>;
    fn overview(&self) -> Result<OverviewStats>;
    fn category_counts(&self) -> Result<Vec<CategoryCount>>;
    fn timeline(&self, days: i64) -> Result<Vec<TimelineDay>>;
}

/// Everything the pipeline needs from persistence.
pub trait Store:
    FolderRepository
    + FileRepository
    + CategoryRepository
    + ModelRepository
    + ScanResultRepository
    + StatsRepository
    + Send
    + Sync
{
}

impl<T> Store for T where
    T: FolderRepository
        + FileRepository
        + CategoryRepository
        + ModelRepository
        + ScanResultRepository
        + StatsRepository
        + Send
        + Sync
{
}
