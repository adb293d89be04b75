//! Reduces one file's triggers to a persisted scan result.

use crate::classify::{CategoryVerdict, Severity};
use crate::config::RiskSettings;
use crate::error::Result;
use crate::extract::Span;
use crate::storage::models::{NewScanResult, Trigger};
use crate::storage::Store;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub total_triggers: i64,
    pub highest_severity: Option<Severity>,
    pub overall_risk_score: f64,
}

/// Risk in [0, 100): `100 * raw / (raw + saturation)` with `raw` the sum of
/// per-severity weights. Non-decreasing in every added trigger and
/// independent of trigger order.
pub fn risk_score<I>(severities: I, risk: &RiskSettings) -> f64
where
    I: IntoIterator<Item = Severity>,
{
    let raw: f64 = severities.into_iter().map(|s| risk.weight(s)).sum();
    if raw <= 0.0 {
        return 0.0;
    }
    100.0 * raw / (raw + risk.saturation)
}

pub fn summarize(triggers: &[Trigger], risk: &RiskSettings) -> ResultSummary {
    ResultSummary {
        total_triggers: triggers.len() as i64,
        highest_severity: triggers.iter().map(|t| t.severity).max(),
        overall_risk_score: risk_score(triggers.iter().map(|t| t.severity), risk),
    }
}

/// One unsaved trigger per surviving category verdict on `span`.
pub fn span_triggers(span: &Span, verdicts: Vec<CategoryVerdict>) -> Vec<Trigger> {
    verdicts
        .into_iter()
        .map(|v| Trigger {
            id: 0,
            scan_result_id: 0,
            category: v.category,
            severity: v.severity,
            confidence_score: v.score,
            timestamp_start_ms: span.start_ms,
            timestamp_end_ms: span.end_ms,
            subtitle_text: span.text.clone(),
            context_before: span.context_before.clone(),
            context_after: span.context_after.clone(),
            manually_edited: false,
        })
        .collect()
}

/// Everything the aggregator needs besides the triggers themselves.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub file_id: i64,
    pub model_version: String,
    pub model_count: usize,
    pub span_count: usize,
    pub processing_time_ms: i64,
}

/// Persist the result and its triggers in one transaction. On success the
/// file is `completed` with `last_scanned` stamped; on failure nothing is
/// written and the file keeps its previous status.
pub fn persist(
    store: &dyn Store,
    run: &RunInfo,
    mut triggers: Vec<Trigger>,
    risk: &RiskSettings,
) -> Result<(i64, ResultSummary)> {
    triggers.sort_by_key(|t| (t.timestamp_start_ms, t.timestamp_end_ms));
    let summary = summarize(&triggers, risk);

    let mut by_category: BTreeMap<&str, i64> = BTreeMap::new();
    for trigger in &triggers {
        *by_category.entry(trigger.category.as_str()).or_default() += 1;
    }
    let metadata = json!({
        "spans": run.span_count,
        "models": run.model_count,
        "categories": by_category,
    });

    let result = NewScanResult {
        file_id: run.file_id,
        model_version: run.model_version.clone(),
        processing_time_ms: run.processing_time_ms,
        overall_risk_score: summary.overall_risk_score,
        highest_severity: summary.highest_severity,
        total_triggers: summary.total_triggers,
        metadata,
    };
    let result_id = store.record_scan_result(&result, &triggers)?;
    info!(
        "File {}: {} triggers, highest {}, risk {:.1}",
        run.file_id,
        summary.total_triggers,
        crate::classify::severity::severity_label(summary.highest_severity),
        summary.overall_risk_score
    );
    Ok((result_id, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_scores_zero() {
        let summary = summarize(&[], &RiskSettings::default());
        assert_eq!(summary.total_triggers, 0);
        assert_eq!(summary.highest_severity, None);
        assert_eq!(summary.overall_risk_score, 0.0);
    }

    #[test]
    fn test_risk_score_is_bounded_and_ordered() {
        let risk = RiskSettings::default();
        let one_severe = risk_score([Severity::Severe], &risk);
        let one_mild = risk_score([Severity::Mild], &risk);
        assert!(one_severe > one_mild);
        assert!((one_severe - 100.0 * 9.0 / 19.0).abs() < 1e-9);

        let many = risk_score(std::iter::repeat(Severity::Severe).take(10_000), &risk);
        assert!(many < 100.0);
    }

    #[test]
    fn test_span_triggers_copy_span_fields() {
        let span = Span {
            index: 3,
            start_ms: 1_000,
            end_ms: 2_000,
            text: "line".to_string(),
            context_before: "prev".to_string(),
            context_after: "next".to_string(),
        };
        let triggers = span_triggers(
            &span,
            vec![CategoryVerdict {
                category: "violence".to_string(),
                score: 0.7,
                severity: Severity::Moderate,
            }],
        );
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].timestamp_start_ms, 1_000);
        assert_eq!(triggers[0].context_after, "next");
        assert!(!triggers[0].manually_edited);
    }
}
