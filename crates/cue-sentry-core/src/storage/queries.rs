use super::models::*;
use super::now_timestamp;
use super::repository::*;
use super::sqlite::Database;
use crate::classify::severity::{parse_severity_label, severity_label};
use crate::classify::{ModelConfig, Severity, SeverityMapping};
use crate::error::{Error, Result};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::json;
use tracing::debug;

const FOLDER_COLUMNS: &str = "id, path, is_active, priority, created_at";

const FILE_COLUMNS: &str = "id, path, file_name, file_type, file_size, fingerprint, \
     last_modified_ns, last_scanned, scan_status, status_changed_at, error_message, created_at";

const CATEGORY_COLUMNS: &str =
    "name, display_name, description, default_threshold, severity_mapping, is_active";

const MODEL_COLUMNS: &str = "id, name, identifier, task_type, categories, weight, model_config, \
     is_active, status, error_message, created_at, updated_at";

const RESULT_COLUMNS: &str = "id, file_id, scan_date, model_version, processing_time_ms, \
     overall_risk_score, highest_severity, total_triggers, metadata";

const TRIGGER_COLUMNS: &str = "id, scan_result_id, category, severity, confidence_score, \
     timestamp_start_ms, timestamp_end_ms, subtitle_text, context_before, context_after, \
     manually_edited";

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_folder(row: &Row<'_>) -> rusqlite::Result<ScanFolder> {
    Ok(ScanFolder {
        id: row.get(0)?,
        path: row.get(1)?,
        active: row.get(2)?,
        priority: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_file(row: &Row<'_>) -> rusqlite::Result<MediaFile> {
    map_file_at(row, 0)
}

fn map_file_at(row: &Row<'_>, at: usize) -> rusqlite::Result<MediaFile> {
    Ok(MediaFile {
        id: row.get(at)?,
        path: row.get(at + 1)?,
        file_name: row.get(at + 2)?,
        file_type: row.get(at + 3)?,
        file_size: row.get(at + 4)?,
        fingerprint: row.get(at + 5)?,
        last_modified_ns: row.get(at + 6)?,
        last_scanned: row.get(at + 7)?,
        scan_status: row.get(at + 8)?,
        status_changed_at: row.get(at + 9)?,
        error_message: row.get(at + 10)?,
        created_at: row.get(at + 11)?,
    })
}

fn map_category(row: &Row<'_>) -> rusqlite::Result<ModelCategory> {
    Ok(ModelCategory {
        name: row.get(0)?,
        display_name: row.get(1)?,
        description: row.get(2)?,
        default_threshold: row.get(3)?,
        severity_mapping: json_column::<SeverityMapping>(row, 4)?,
        active: row.get(5)?,
    })
}

fn map_model(row: &Row<'_>) -> rusqlite::Result<NlpModel> {
    Ok(NlpModel {
        id: row.get(0)?,
        name: row.get(1)?,
        identifier: row.get(2)?,
        task_type: row.get(3)?,
        categories: json_column::<Vec<String>>(row, 4)?,
        weight: row.get(5)?,
        config: json_column::<ModelConfig>(row, 6)?,
        active: row.get(7)?,
        status: row.get(8)?,
        error_message: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn map_result(row: &Row<'_>) -> rusqlite::Result<ScanResult> {
    map_result_at(row, 0)
}

fn map_result_at(row: &Row<'_>, at: usize) -> rusqlite::Result<ScanResult> {
    let severity: String = row.get(at + 6)?;
    let highest_severity = parse_severity_label(&severity).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(at + 6, Type::Text, Box::new(e))
    })?;
    Ok(ScanResult {
        id: row.get(at)?,
        file_id: row.get(at + 1)?,
        scan_date: row.get(at + 2)?,
        model_version: row.get(at + 3)?,
        processing_time_ms: row.get(at + 4)?,
        overall_risk_score: row.get(at + 5)?,
        highest_severity,
        total_triggers: row.get(at + 7)?,
        metadata: json_column::<serde_json::Value>(row, at + 8)?,
    })
}

/// `a, b` -> `t.a, t.b` for selecting from joined tables.
fn qualified(columns: &str, table: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{}.{}", table, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_trigger(row: &Row<'_>) -> rusqlite::Result<Trigger> {
    Ok(Trigger {
        id: row.get(0)?,
        scan_result_id: row.get(1)?,
        category: row.get(2)?,
        severity: row.get(3)?,
        confidence_score: row.get(4)?,
        timestamp_start_ms: row.get(5)?,
        timestamp_end_ms: row.get(6)?,
        subtitle_text: row.get(7)?,
        context_before: row.get(8)?,
        context_after: row.get(9)?,
        manually_edited: row.get(10)?,
    })
}

// ── Scan Folders ─────────────────────────────────────────────

impl FolderRepository for Database {
    fn add_folder(&self, path: &str, priority: i64) -> Result<ScanFolder> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO scan_folder (path, is_active, priority, created_at) \
             VALUES (?1, 1, ?2, ?3) \
             ON CONFLICT(path) DO UPDATE SET is_active = 1, priority = excluded.priority",
            params![path, priority, now_timestamp()],
        )?;
        let folder = conn.query_row(
            &format!("SELECT {} FROM scan_folder WHERE path = ?1", FOLDER_COLUMNS),
            params![path],
            map_folder,
        )?;
        Ok(folder)
    }

    fn remove_folder(&self, path: &str) -> Result<bool> {
        let removed = self
            .connection()
            .execute("DELETE FROM scan_folder WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    fn set_folder_active(&self, path: &str, active: bool) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE scan_folder SET is_active = ?1 WHERE path = ?2",
            params![active, path],
        )?;
        Ok(updated > 0)
    }

    fn list_folders(&self) -> Result<Vec<ScanFolder>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scan_folder ORDER BY priority DESC, id",
            FOLDER_COLUMNS
        ))?;
        let folders = stmt
            .query_map([], map_folder)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(folders)
    }

    fn active_folders(&self) -> Result<Vec<ScanFolder>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scan_folder WHERE is_active = 1 ORDER BY priority DESC, id",
            FOLDER_COLUMNS
        ))?;
        let folders = stmt
            .query_map([], map_folder)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(folders)
    }
}

// ── Media Files ──────────────────────────────────────────────

impl FileRepository for Database {
    fn get_file(&self, id: i64) -> Result<Option<MediaFile>> {
        let file = self
            .connection()
            .query_row(
                &format!("SELECT {} FROM media_file WHERE id = ?1", FILE_COLUMNS),
                params![id],
                map_file,
            )
            .optional()?;
        Ok(file)
    }

    fn find_file_by_path(&self, path: &str) -> Result<Option<MediaFile>> {
        match self.connection().query_row(
            &format!("SELECT {} FROM media_file WHERE path = ?1", FILE_COLUMNS),
            params![path],
            map_file,
        ) {
            Ok(file) => Ok(Some(file)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn upsert_queued_file(&self, observed: &FileObservation) -> Result<MediaFile> {
        let conn = self.connection();
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO media_file \
             (path, file_name, file_type, file_size, fingerprint, last_modified_ns, \
              scan_status, status_changed_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', ?7, ?7) \
             ON CONFLICT(path) DO UPDATE SET \
                 file_name = excluded.file_name, \
                 file_type = excluded.file_type, \
                 file_size = excluded.file_size, \
                 fingerprint = excluded.fingerprint, \
                 last_modified_ns = excluded.last_modified_ns, \
                 scan_status = 'queued', \
                 status_changed_at = excluded.status_changed_at, \
                 error_message = NULL",
            params![
                observed.path,
                observed.file_name,
                observed.file_type,
                observed.file_size,
                observed.fingerprint,
                observed.last_modified_ns,
                now,
            ],
        )?;
        let file = conn.query_row(
            &format!("SELECT {} FROM media_file WHERE path = ?1", FILE_COLUMNS),
            params![observed.path],
            map_file,
        )?;
        debug!("Upserted {} as file {}", observed.path, file.id);
        Ok(file)
    }

    fn set_file_status(
        &self,
        id: i64,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let updated = self.connection().execute(
            "UPDATE media_file SET scan_status = ?1, error_message = ?2, status_changed_at = ?3 \
             WHERE id = ?4",
            params![status, error_message, now_timestamp(), id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("file {}", id)));
        }
        Ok(())
    }
}

// ── Categories ───────────────────────────────────────────────

impl CategoryRepository for Database {
    fn seed_category(&self, category: &ModelCategory) -> Result<bool> {
        let inserted = self.connection().execute(
            "INSERT OR IGNORE INTO model_category \
             (name, display_name, description, default_threshold, severity_mapping, is_active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                category.name,
                category.display_name,
                category.description,
                category.default_threshold,
                serde_json::to_string(&category.severity_mapping)?,
                category.active,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn upsert_category(&self, category: &ModelCategory) -> Result<()> {
        self.connection().execute(
            "INSERT INTO model_category \
             (name, display_name, description, default_threshold, severity_mapping, is_active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(name) DO UPDATE SET \
                 display_name = excluded.display_name, \
                 description = excluded.description, \
                 default_threshold = excluded.default_threshold, \
                 severity_mapping = excluded.severity_mapping, \
                 is_active = excluded.is_active",
            params![
                category.name,
                category.display_name,
                category.description,
                category.default_threshold,
                serde_json::to_string(&category.severity_mapping)?,
                category.active,
            ],
        )?;
        Ok(())
    }

    fn list_categories(&self) -> Result<Vec<ModelCategory>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM model_category ORDER BY display_name",
            CATEGORY_COLUMNS
        ))?;
        let categories = stmt
            .query_map([], map_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    fn active_categories(&self) -> Result<Vec<ModelCategory>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM model_category WHERE is_active = 1 ORDER BY name",
            CATEGORY_COLUMNS
        ))?;
        let categories = stmt
            .query_map([], map_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }
}

// ── Models ───────────────────────────────────────────────────

impl Database {
    /// Returns the number of rows inserted and the new row id.
    fn insert_model_row(&self, model: &NewModel, or_ignore: bool) -> Result<(usize, i64)> {
        let now = now_timestamp();
        let verb = if or_ignore {
            "INSERT OR IGNORE"
        } else {
            "INSERT"
        };
        let conn = self.connection();
        let inserted = conn.execute(
            &format!(
                "{} INTO nlp_model \
                 (name, identifier, task_type, categories, weight, model_config, \
                  is_active, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 'pending', ?7, ?7)",
                verb
            ),
            params![
                model.name,
                model.identifier,
                model.config.task_type(),
                serde_json::to_string(&model.categories)?,
                model.weight,
                serde_json::to_string(&model.config)?,
                now,
            ],
        )?;
        Ok((inserted, conn.last_insert_rowid()))
    }
}

impl ModelRepository for Database {
    fn insert_model(&self, model: &NewModel) -> Result<NlpModel> {
        let (_, id) = self.insert_model_row(model, false)?;
        self.get_model(id)?
            .ok_or_else(|| Error::NotFound(format!("model {}", id)))
    }

    fn seed_model(&self, model: &NewModel) -> Result<bool> {
        let (inserted, _) = self.insert_model_row(model, true)?;
        Ok(inserted > 0)
    }

    fn get_model(&self, id: i64) -> Result<Option<NlpModel>> {
        let model = self
            .connection()
            .query_row(
                &format!("SELECT {} FROM nlp_model WHERE id = ?1", MODEL_COLUMNS),
                params![id],
                map_model,
            )
            .optional()?;
        Ok(model)
    }

    fn list_models(&self) -> Result<Vec<NlpModel>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM nlp_model ORDER BY weight DESC, id",
            MODEL_COLUMNS
        ))?;
        let models = stmt
            .query_map([], map_model)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(models)
    }

    fn active_models(&self) -> Result<Vec<NlpModel>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM nlp_model WHERE is_active = 1 ORDER BY weight DESC, id",
            MODEL_COLUMNS
        ))?;
        let models = stmt
            .query_map([], map_model)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(models)
    }

    fn set_model_status(
        &self,
        id: i64,
        status: ModelStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.connection().execute(
            "UPDATE nlp_model SET status = ?1, error_message = ?2, updated_at = ?3 WHERE id = ?4",
            params![status, error_message, now_timestamp(), id],
        )?;
        Ok(())
    }

    fn set_model_active(&self, id: i64, active: bool) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE nlp_model SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, now_timestamp(), id],
        )?;
        Ok(updated > 0)
    }

    fn update_model(&self, id: i64, model: &NewModel) -> Result<NlpModel> {
        let updated = self.connection().execute(
            "UPDATE nlp_model SET name = ?1, identifier = ?2, task_type = ?3, categories = ?4, \
             weight = ?5, model_config = ?6, status = 'pending', error_message = NULL, \
             updated_at = ?7 WHERE id = ?8",
            params![
                model.name,
                model.identifier,
                model.config.task_type(),
                serde_json::to_string(&model.categories)?,
                model.weight,
                serde_json::to_string(&model.config)?,
                now_timestamp(),
                id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("model {}", id)));
        }
        self.get_model(id)?
            .ok_or_else(|| Error::NotFound(format!("model {}", id)))
    }
}

// ── Scan Results & Triggers ──────────────────────────────────

impl ScanResultRepository for Database {
    fn record_scan_result(&self, result: &NewScanResult, triggers: &[Trigger]) -> Result<i64> {
        let metadata = serde_json::to_string(&result.metadata)?;
        let now = now_timestamp();

        let mut conn = self.connection();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO scan_result \
             (file_id, scan_date, model_version, processing_time_ms, overall_risk_score, \
              highest_severity, total_triggers, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                result.file_id,
                now,
                result.model_version,
                result.processing_time_ms,
                result.overall_risk_score,
                severity_label(result.highest_severity),
                result.total_triggers,
                metadata,
            ],
        )?;
        let result_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO scan_trigger \
                 (scan_result_id, category, severity, confidence_score, timestamp_start_ms, \
                  timestamp_end_ms, subtitle_text, context_before, context_after) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for trigger in triggers {
                stmt.execute(params![
                    result_id,
                    trigger.category,
                    trigger.severity,
                    trigger.confidence_score,
                    trigger.timestamp_start_ms,
                    trigger.timestamp_end_ms,
                    trigger.subtitle_text,
                    trigger.context_before,
                    trigger.context_after,
                ])?;
            }
        }
        let updated = tx.execute(
            "UPDATE media_file SET scan_status = 'completed', last_scanned = ?1, \
             status_changed_at = ?1, error_message = NULL WHERE id = ?2",
            params![now, result.file_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("file {}", result.file_id)));
        }
        tx.commit()?;

        debug!(
            "Recorded scan result {} for file {} ({} triggers)",
            result_id,
            result.file_id,
            triggers.len()
        );
        Ok(result_id)
    }

    fn latest_result(&self, file_id: i64) -> Result<Option<ScanResult>> {
        let result = self
            .connection()
            .query_row(
                &format!(
                    "SELECT {} FROM scan_result WHERE file_id = ?1 ORDER BY id DESC LIMIT 1",
                    RESULT_COLUMNS
                ),
                params![file_id],
                map_result,
            )
            .optional()?;
        Ok(result)
    }

    fn results_for_file(&self, file_id: i64) -> Result<Vec<ScanResult>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scan_result WHERE file_id = ?1 ORDER BY id DESC",
            RESULT_COLUMNS
        ))?;
        let results = stmt
            .query_map(params![file_id], map_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    fn list_latest_results(
        &self,
        filter: &ResultFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ResultRow>, i64)> {
        const MATCHES: &str = "FROM scan_result r JOIN media_file f ON f.id = r.file_id \
             WHERE r.id IN (SELECT MAX(id) FROM scan_result GROUP BY file_id) \
             AND (?1 IS NULL OR r.highest_severity = ?1) \
             AND (?2 IS NULL OR EXISTS (SELECT 1 FROM scan_trigger t \
                  WHERE t.scan_result_id = r.id AND t.category = ?2))";

        let severity = filter.severity.map(|s| severity_label(Some(s)));
        let category = filter.category.as_deref();

        let conn = self.connection();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) {}", MATCHES),
            params![severity, category],
            |row| row.get(0),
        )?;

        let file_width = FILE_COLUMNS.split(',').count();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} {} ORDER BY r.overall_risk_score DESC, r.id DESC LIMIT ?3 OFFSET ?4",
            qualified(FILE_COLUMNS, "f"),
            qualified(RESULT_COLUMNS, "r"),
            MATCHES
        ))?;
        let rows = stmt
            .query_map(params![severity, category, limit, offset], |row| {
                Ok(ResultRow {
                    file: map_file_at(row, 0)?,
                    result: map_result_at(row, file_width)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((rows, total))
    }

    fn triggers_for_result(&self, scan_result_id: i64) -> Result<Vec<Trigger>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scan_trigger WHERE scan_result_id = ?1 \
             ORDER BY timestamp_start_ms, timestamp_end_ms, id",
            TRIGGER_COLUMNS
        ))?;
        let triggers = stmt
            .query_map(params![scan_result_id], map_trigger)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(triggers)
    }

    fn override_latest_result(
        &self,
        file_id: i64,
        overall_risk_score: f64,
        highest_severity: Option<Severity>,
        notes: &str,
    ) -> Result<ScanResult> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;

        let current = tx
            .query_row(
                &format!(
                    "SELECT {} FROM scan_result WHERE file_id = ?1 ORDER BY id DESC LIMIT 1",
                    RESULT_COLUMNS
                ),
                params![file_id],
                map_result,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("scan result for file {}", file_id)))?;

        let mut metadata = match current.metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        metadata.insert(
            "override".to_string(),
            json!({
                "timestamp": now_timestamp(),
                "notes": notes,
                "previous": {
                    "overall_risk_score": current.overall_risk_score,
                    "highest_severity": severity_label(current.highest_severity),
                },
            }),
        );
        let metadata = serde_json::Value::Object(metadata);

        tx.execute(
            "UPDATE scan_result SET overall_risk_score = ?1, highest_severity = ?2, metadata = ?3 \
             WHERE id = ?4",
            params![
                overall_risk_score,
                severity_label(highest_severity),
                serde_json::to_string(&metadata)?,
                current.id,
            ],
        )?;
        tx.commit()?;

        Ok(ScanResult {
            overall_risk_score,
            highest_severity,
            metadata,
            ..current
        })
    }

    fn update_trigger(
        &self,
        trigger_id: i64,
        severity: Option<Severity>,
        confidence_score: Option<f64>,
    ) -> Result<Trigger> {
        let conn = self.connection();
        let updated = conn.execute(
            "UPDATE scan_trigger SET severity = COALESCE(?1, severity), \
             confidence_score = COALESCE(?2, confidence_score), manually_edited = 1 \
             WHERE id = ?3",
            params![severity, confidence_score, trigger_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("trigger {}", trigger_id)));
        }
        let trigger = conn.query_row(
            &format!("SELECT {} FROM scan_trigger WHERE id = ?1", TRIGGER_COLUMNS),
            params![trigger_id],
            map_trigger,
        )?;
        Ok(trigger)
    }
}

// ── Read Views ───────────────────────────────────────────────

impl StatsRepository for Database {
    fn status_counts(&self) -> Result<Vec<(ScanStatus, i64)>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT scan_status, COUNT(*) FROM media_file GROUP BY scan_status ORDER BY scan_status",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    fn last_activity(&self) -> Result<Option<String>> {
        let last = self.connection().query_row(
            "SELECT MAX(last_scanned) FROM media_file WHERE last_scanned IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(last)
    }

    /// Trigger totals and the average risk are taken over each file's latest
    /// result only.
    fn overview(&self) -> Result<OverviewStats> {
        let conn = self.connection();
        let total_files: i64 =
            conn.query_row("SELECT COUNT(*) FROM media_file", [], |row| row.get(0))?;
        let scanned_files: i64 = conn.query_row(
            "SELECT COUNT(*) FROM media_file WHERE scan_status = 'completed'",
            [],
            |row| row.get(0),
        )?;
        let (total_triggers, average): (i64, Option<f64>) = conn.query_row(
            "SELECT COALESCE(SUM(total_triggers), 0), AVG(overall_risk_score) FROM scan_result \
             WHERE id IN (SELECT MAX(id) FROM scan_result GROUP BY file_id)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(OverviewStats {
            total_files,
            scanned_files,
            total_triggers,
            average_risk_score: average.unwrap_or(0.0),
        })
    }

    fn category_counts(&self) -> Result<Vec<CategoryCount>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT st.category, st.severity, COUNT(*) FROM scan_trigger st \
             WHERE st.scan_result_id IN (SELECT MAX(id) FROM scan_result GROUP BY file_id) \
             GROUP BY st.category, st.severity \
             ORDER BY st.category, st.severity",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(CategoryCount {
                    category: row.get(0)?,
                    severity: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    fn timeline(&self, days: i64) -> Result<Vec<TimelineDay>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(days))
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT substr(scan_date, 1, 10) AS day, COUNT(*), COALESCE(SUM(total_triggers), 0) \
             FROM scan_result WHERE scan_date >= ?1 \
             GROUP BY day ORDER BY day DESC",
        )?;
        let days = stmt
            .query_map(params![cutoff], |row| {
                Ok(TimelineDay {
                    date: row.get(0)?,
                    files_scanned: row.get(1)?,
                    triggers_found: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(days)
    }
}
