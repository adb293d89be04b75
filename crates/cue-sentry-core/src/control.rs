//! Operator actions: pipeline start/stop, folder and model configuration,
//! rescans, manual overrides and status views.

use crate::classify::Severity;
use crate::config::validate_new_model;
use crate::error::{Error, Result};
use crate::queue::{Broker, ClassificationJob, ControlSignal, RESCAN_PRIORITY};
use crate::storage::models::{
    FileReport, MediaFile, ModelCategory, ModelStatus, NewModel, NlpModel, ResultFilter,
    ResultPage, ScanFolder, ScanResult, ScanStatus, Trigger,
};
use crate::storage::Store;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub queue_depth: usize,
    pub status_counts: Vec<(ScanStatus, i64)>,
    pub last_activity: Option<String>,
    pub control: Option<ControlSignal>,
}

pub struct Control {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    signal_ttl: Duration,
}

impl Control {
    pub fn new(store: Arc<dyn Store>, broker: Arc<dyn Broker>, signal_ttl: Duration) -> Self {
        Self {
            store,
            broker,
            signal_ttl,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.broker.signal(ControlSignal::Start, self.signal_ttl)?;
        info!("Start signal sent (expires in {:?})", self.signal_ttl);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.broker.signal(ControlSignal::Stop, self.signal_ttl)?;
        info!("Stop signal sent (expires in {:?})", self.signal_ttl);
        Ok(())
    }

    // ── Folders ──────────────────────────────────────────────

    pub fn add_folder(&self, path: &str, priority: i64) -> Result<ScanFolder> {
        if !std::path::Path::new(path).is_dir() {
            warn!("Folder {} does not exist yet; it is skipped until it does", path);
        }
        self.store.add_folder(path, priority)
    }

    pub fn remove_folder(&self, path: &str) -> Result<()> {
        if !self.store.remove_folder(path)? {
            return Err(Error::NotFound(format!("folder {}", path)));
        }
        Ok(())
    }

    pub fn set_folder_active(&self, path: &str, active: bool) -> Result<()> {
        if !self.store.set_folder_active(path, active)? {
            return Err(Error::NotFound(format!("folder {}", path)));
        }
        Ok(())
    }

    pub fn list_folders(&self) -> Result<Vec<ScanFolder>> {
        self.store.list_folders()
    }

    // ── Models and categories ────────────────────────────────

    /// Register a model after validating its weight and configuration. It
    /// is loaded on the next registry refresh.
    pub fn add_model(&self, model: &NewModel) -> Result<NlpModel> {
        self.check_model(model)?;
        self.store.insert_model(model)
    }

    /// Replace a registered model's definition. The model goes back to
    /// `pending` and the next registry refresh loads the new version.
    pub fn update_model(&self, id: i64, model: &NewModel) -> Result<NlpModel> {
        self.check_model(model)?;
        let updated = self.store.update_model(id, model)?;
        info!("Model {} ({}) updated", updated.id, updated.identifier);
        Ok(updated)
    }

    fn check_model(&self, model: &NewModel) -> Result<()> {
        validate_new_model(model)?;
        let known = self.store.list_categories()?;
        for category in &model.categories {
            if !known.iter().any(|c| &c.name == category) {
                warn!("Model {} targets unknown category '{}'", model.identifier, category);
            }
        }
        Ok(())
    }

    pub fn set_model_active(&self, id: i64, active: bool) -> Result<()> {
        if !self.store.set_model_active(id, active)? {
            return Err(Error::NotFound(format!("model {}", id)));
        }
        Ok(())
    }

    /// Send the model back to `pending` so the next refresh reloads it.
    pub fn reload_model(&self, id: i64) -> Result<()> {
        if self.store.get_model(id)?.is_none() {
            return Err(Error::NotFound(format!("model {}", id)));
        }
        self.store.set_model_status(id, ModelStatus::Pending, None)
    }

    pub fn list_models(&self) -> Result<Vec<NlpModel>> {
        self.store.list_models()
    }

    pub fn list_categories(&self) -> Result<Vec<ModelCategory>> {
        self.store.list_categories()
    }

    /// Create or edit a category. Takes effect on the next registry refresh.
    pub fn update_category(&self, category: &ModelCategory) -> Result<()> {
        if category.name.trim().is_empty() {
            return Err(Error::InvalidConfig("category name is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&category.default_threshold) {
            return Err(Error::InvalidConfig(format!(
                "category '{}': default threshold must be in [0, 1], got {}",
                category.name, category.default_threshold
            )));
        }
        category
            .severity_mapping
            .validate()
            .map_err(|e| Error::InvalidConfig(format!("category '{}': {}", category.name, e)))?;
        self.store.upsert_category(category)?;
        info!("Category {} saved", category.name);
        Ok(())
    }

    // ── Files and results ────────────────────────────────────

    pub fn file(&self, id: i64) -> Result<MediaFile> {
        self.store
            .get_file(id)?
            .ok_or_else(|| Error::NotFound(format!("file {}", id)))
    }

    pub fn file_by_path(&self, path: &str) -> Result<MediaFile> {
        self.store
            .find_file_by_path(path)?
            .ok_or_else(|| Error::NotFound(format!("file {}", path)))
    }

    /// Queue a file regardless of its fingerprint or status.
    pub fn rescan(&self, file_id: i64) -> Result<ClassificationJob> {
        let file = self.file(file_id)?;
        self.store.set_file_status(file.id, ScanStatus::Queued, None)?;
        let job = ClassificationJob::new(file.id, &file.path, &file.file_type, RESCAN_PRIORITY);
        if let Err(e) = self.broker.enqueue(job.clone()) {
            self.store
                .set_file_status(file.id, ScanStatus::Pending, Some(&e.to_string()))?;
            return Err(e);
        }
        info!("Rescan of {} queued as {}", file.path, job.job_id);
        Ok(job)
    }

    /// The file with its latest result and that result's triggers.
    pub fn report(&self, file_id: i64) -> Result<FileReport> {
        let file = self.file(file_id)?;
        let latest = self.store.latest_result(file.id)?;
        let triggers = match &latest {
            Some(result) => self.store.triggers_for_result(result.id)?,
            None => Vec::new(),
        };
        Ok(FileReport {
            file,
            latest,
            triggers,
        })
    }

    /// Every result recorded for the file, newest first.
    pub fn history(&self, file_id: i64) -> Result<Vec<ScanResult>> {
        let file = self.file(file_id)?;
        self.store.results_for_file(file.id)
    }

    /// Files with their latest result, riskiest first. `page` starts at 1;
    /// a `limit` outside 1..=100 falls back to 50.
    pub fn list_results(&self, filter: &ResultFilter, page: i64, limit: i64) -> Result<ResultPage> {
        let page = page.max(1);
        let limit = if (1..=MAX_PAGE_SIZE).contains(&limit) {
            limit
        } else {
            DEFAULT_PAGE_SIZE
        };
        let offset = (page - 1).saturating_mul(limit);
        let (rows, total) = self.store.list_latest_results(filter, limit, offset)?;
        Ok(ResultPage {
            rows,
            total,
            page,
            limit,
            total_pages: (total + limit - 1) / limit,
        })
    }

    /// Replace the computed verdict on the file's latest result. Triggers
    /// are left untouched; the result's metadata records the override.
    pub fn override_result(
        &self,
        file_id: i64,
        overall_risk_score: f64,
        highest_severity: Option<Severity>,
        notes: &str,
    ) -> Result<ScanResult> {
        if !(0.0..=100.0).contains(&overall_risk_score) {
            return Err(Error::InvalidConfig(format!(
                "risk score must be within 0..=100, got {}",
                overall_risk_score
            )));
        }
        let result =
            self.store
                .override_latest_result(file_id, overall_risk_score, highest_severity, notes)?;
        info!("Result {} of file {} overridden", result.id, file_id);
        Ok(result)
    }

    pub fn update_trigger(
        &self,
        trigger_id: i64,
        severity: Option<Severity>,
        confidence_score: Option<f64>,
    ) -> Result<Trigger> {
        if let Some(c) = confidence_score {
            if !(0.0..=1.0).contains(&c) {
                return Err(Error::InvalidConfig(format!(
                    "confidence must be within [0, 1], got {}",
                    c
                )));
            }
        }
        self.store
            .update_trigger(trigger_id, severity, confidence_score)
    }

    pub fn status(&self) -> Result<PipelineStatus> {
        Ok(PipelineStatus {
            queue_depth: self.broker.len()?,
            status_counts: self.store.status_counts()?,
            last_activity: self.store.last_activity()?,
            control: self.broker.current()?,
        })
    }
}
