use crate::classify::{ModelConfig, Severity, SeverityMapping};
use crate::error::Error;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing state of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Queued => "queued",
            ScanStatus::Processing => "processing",
            ScanStatus::Completed => "completed",
            ScanStatus::Error => "error",
        }
    }

    /// Waiting in the queue or held by a worker.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ScanStatus::Queued | ScanStatus::Processing)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "queued" => Ok(ScanStatus::Queued),
            "processing" => Ok(ScanStatus::Processing),
            "completed" => Ok(ScanStatus::Completed),
            "error" => Ok(ScanStatus::Error),
            other => Err(Error::Other(format!("unknown scan status '{}'", other))),
        }
    }
}

impl ToSql for ScanStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ScanStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

/// Load state of a registered model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Pending,
    Loading,
    Ready,
    Error,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Pending => "pending",
            ModelStatus::Loading => "loading",
            ModelStatus::Ready => "ready",
            ModelStatus::Error => "error",
        }
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ModelStatus::Pending),
            "loading" => Ok(ModelStatus::Loading),
            "ready" => Ok(ModelStatus::Ready),
            "error" => Ok(ModelStatus::Error),
            other => Err(Error::Other(format!("unknown model status '{}'", other))),
        }
    }
}

impl ToSql for ModelStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ModelStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

/// A configured root directory.
#[derive(Debug, Clone, Serialize)]
pub struct ScanFolder {
    pub id: i64,
    pub path: String,
    pub active: bool,
    pub priority: i64,
    pub created_at: String,
}

/// A media or subtitle file known to the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct MediaFile {
    pub id: i64,
    pub path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub fingerprint: Option<String>,
    pub last_modified_ns: i64,
    pub last_scanned: Option<String>,
    pub scan_status: ScanStatus,
    pub status_changed_at: String,
    pub error_message: Option<String>,
    pub created_at: String,
}

/// What the scanner saw on disk for one file.
#[derive(Debug, Clone)]
pub struct FileObservation {
    pub path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub fingerprint: Option<String>,
    pub last_modified_ns: i64,
}

/// A sensitive-content category.
#[derive(Debug, Clone, Serialize)]
pub struct ModelCategory {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub default_threshold: f64,
    pub severity_mapping: SeverityMapping,
    pub active: bool,
}

/// A registered classifier.
#[derive(Debug, Clone, Serialize)]
pub struct NlpModel {
    pub id: i64,
    pub name: String,
    pub identifier: String,
    pub task_type: String,
    pub categories: Vec<String>,
    pub weight: f64,
    pub config: ModelConfig,
    pub active: bool,
    pub status: ModelStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewModel {
    pub name: String,
    pub identifier: String,
    pub categories: Vec<String>,
    pub weight: f64,
    pub config: ModelConfig,
}

/// One detected category occurrence inside a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trigger {
    pub id: i64,
    pub scan_result_id: i64,
    pub category: String,
    pub severity: Severity,
    pub confidence_score: f64,
    pub timestamp_start_ms: i64,
    pub timestamp_end_ms: i64,
    pub subtitle_text: String,
    pub context_before: String,
    pub context_after: String,
    pub manually_edited: bool,
}

/// One classification run for one file.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub id: i64,
    pub file_id: i64,
    pub scan_date: String,
    pub model_version: String,
    pub processing_time_ms: i64,
    pub overall_risk_score: f64,
    pub highest_severity: Option<Severity>,
    pub total_triggers: i64,
    pub metadata: serde_json::Value,
}

impl ScanResult {
    /// True when an operator replaced the computed verdict.
    pub fn is_overridden(&self) -> bool {
        self.metadata.get("override").is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewScanResult {
    pub file_id: i64,
    pub model_version: String,
    pub processing_time_ms: i64,
    pub overall_risk_score: f64,
    pub highest_severity: Option<Severity>,
    pub total_triggers: i64,
    pub metadata: serde_json::Value,
}

/// A file with its most recent result and that result's triggers.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: MediaFile,
    pub latest: Option<ScanResult>,
    pub triggers: Vec<Trigger>,
}

/// Narrows a results listing to latest results with this highest severity
/// and/or at least one trigger in this category.
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub severity: Option<Severity>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub file: MediaFile,
    pub result: ScanResult,
}

/// One page of a results listing. `page` is 1-based.
#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub rows: Vec<ResultRow>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OverviewStats {
    pub total_files: i64,
    pub scanned_files: i64,
    pub total_triggers: i64,
    pub average_risk_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub severity: Severity,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineDay {
    pub date: String,
    pub files_scanned: i64,
    pub triggers_found: i64,
}
