use super::severity::{Severity, SeverityMapping};
use super::{normalize_confidence, Classifier};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{trace, warn};

pub const MIN_MODEL_WEIGHT: f64 = 0.1;
pub const MAX_MODEL_WEIGHT: f64 = 2.0;

/// An active model ready to score text.
pub struct LoadedModel {
    pub id: i64,
    pub identifier: String,
    pub weight: f64,
    pub categories: BTreeSet<String>,
    /// Serialized classifier settings; an edit changes the ensemble version.
    pub revision: Option<String>,
    classifier: Box<dyn Classifier>,
}

impl LoadedModel {
    pub fn new(
        id: i64,
        identifier: &str,
        weight: f64,
        categories: impl IntoIterator<Item = String>,
        classifier: Box<dyn Classifier>,
    ) -> Result<Self> {
        validate_weight(weight)?;
        Ok(Self {
            id,
            identifier: identifier.to_string(),
            weight,
            categories: categories.into_iter().collect(),
            revision: None,
            classifier,
        })
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

pub fn validate_weight(weight: f64) -> Result<()> {
    if !(MIN_MODEL_WEIGHT..=MAX_MODEL_WEIGHT).contains(&weight) {
        return Err(Error::InvalidConfig(format!(
            "model weight must be within {}..={}, got {}",
            MIN_MODEL_WEIGHT, MAX_MODEL_WEIGHT, weight
        )));
    }
    Ok(())
}

/// An enabled category and its severity cut points.
#[derive(Debug, Clone)]
pub struct CategoryPolicy {
    pub name: String,
    pub mapping: SeverityMapping,
}

/// The ensemble's decision for one category on one span.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryVerdict {
    pub category: String,
    pub score: f64,
    pub severity: Severity,
}

/// Weighted average `Σ(wᵢ·cᵢ) / Σwᵢ`. `None` when nothing contributed.
pub fn weighted_average(contributions: &[(f64, f64)]) -> Option<f64> {
    let total_weight: f64 = contributions.iter().map(|(w, _)| w).sum();
    if contributions.is_empty() || total_weight <= 0.0 {
        return None;
    }
    let weighted: f64 = contributions.iter().map(|(w, c)| w * c).sum();
    Some(weighted / total_weight)
}

/// A fixed set of models and category policies. Immutable once built; a
/// configuration change produces a new ensemble.
pub struct Ensemble {
    models: Vec<LoadedModel>,
    policies: BTreeMap<String, SeverityMapping>,
    global_threshold: f64,
    version: String,
}

impl Ensemble {
    pub fn new(
        mut models: Vec<LoadedModel>,
        policies: Vec<CategoryPolicy>,
        global_threshold: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&global_threshold) {
            return Err(Error::InvalidConfig(format!(
                "global confidence threshold must be in [0, 1], got {}",
                global_threshold
            )));
        }
        let mut by_name = BTreeMap::new();
        for policy in policies {
            policy.mapping.validate()?;
            by_name.insert(policy.name, policy.mapping);
        }

        models.sort_by(|a, b| a.identifier.cmp(&b.identifier).then(a.id.cmp(&b.id)));
        let version = model_set_version(&models);

        Ok(Self {
            models,
            policies: by_name,
            global_threshold,
            version,
        })
    }

    pub fn empty(global_threshold: f64) -> Self {
        Self {
            models: Vec::new(),
            policies: BTreeMap::new(),
            global_threshold,
            version: model_set_version(&[]),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn global_threshold(&self) -> f64 {
        self.global_threshold
    }

    /// Score `text` with every relevant model and reduce the outputs to one
    /// verdict per category. Verdicts come back ordered by category name.
    pub fn evaluate(&self, text: &str) -> Vec<CategoryVerdict> {
        let mut contributions: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();

        for model in &self.models {
            let targets: Vec<&str> = model
                .categories
                .iter()
                .map(String::as_str)
                .filter(|c| self.policies.contains_key(*c))
                .collect();
            if targets.is_empty() {
                continue;
            }

            let scores = match model.classifier.score(text) {
                Ok(scores) => scores,
                Err(err) => {
                    warn!(model = %model.identifier, "Model abstained: {}", err);
                    continue;
                }
            };

            for category in targets {
                let raw = scores.get(category).copied().unwrap_or(0.0);
                match normalize_confidence(raw) {
                    Some(confidence) => contributions
                        .entry(category)
                        .or_default()
                        .push((model.weight, confidence)),
                    None => warn!(
                        model = %model.identifier,
                        category,
                        "Model returned a non-finite confidence, abstaining"
                    ),
                }
            }
        }

        let mut verdicts = Vec::new();
        for (category, contribs) in contributions {
            let Some(score) = weighted_average(&contribs) else {
                continue;
            };
            if score < self.global_threshold {
                trace!(category, score, "Below global confidence threshold");
                continue;
            }
            let Some(severity) = self.policies.get(category).and_then(|m| m.classify(score))
            else {
                continue;
            };
            verdicts.push(CategoryVerdict {
                category: category.to_string(),
                score,
                severity,
            });
        }
        verdicts
    }
}

/// Stable identity of an active model set: a digest over each model's
/// identifier, weight, targets and settings revision.
fn model_set_version(models: &[LoadedModel]) -> String {
    if models.is_empty() {
        return "none".to_string();
    }
    let mut hasher = blake3::Hasher::new();
    for model in models {
        hasher.update(model.identifier.as_bytes());
        hasher.update(&model.weight.to_le_bytes());
        for category in &model.categories {
            hasher.update(b"|");
            hasher.update(category.as_bytes());
        }
        if let Some(revision) = &model.revision {
            hasher.update(b"#");
            hasher.update(revision.as_bytes());
        }
        hasher.update(b"\n");
    }
    let hex = hasher.finalize().to_hex();
    format!("ens-{}", &hex.as_str()[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CategoryScores;

    struct Fixed(Vec<(&'static str, f64)>);

    impl Classifier for Fixed {
        fn score(&self, _text: &str) -> Result<CategoryScores> {
            Ok(self.0.iter().map(|(c, s)| (c.to_string(), *s)).collect())
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn score(&self, _text: &str) -> Result<CategoryScores> {
            Err(Error::Other("backend offline".to_string()))
        }
    }

    fn model(id: i64, weight: f64, cat: &str, classifier: Box<dyn Classifier>) -> LoadedModel {
        LoadedModel::new(id, &format!("test/model-{}", id), weight, [cat.to_string()], classifier)
            .unwrap()
    }

    fn policy(name: &str, mild: f64, moderate: f64, severe: f64) -> CategoryPolicy {
        CategoryPolicy {
            name: name.to_string(),
            mapping: SeverityMapping::new(mild, moderate, severe).unwrap(),
        }
    }

    #[test]
    fn test_weighted_average_of_two_models() {
        let ensemble = Ensemble::new(
            vec![
                model(1, 0.5, "violence", Box::new(Fixed(vec![("violence", 0.4)]))),
                model(2, 1.5, "violence", Box::new(Fixed(vec![("violence", 0.8)]))),
            ],
            vec![policy("violence", 0.3, 0.6, 0.9)],
            0.0,
        )
        .unwrap();

        let verdicts = ensemble.evaluate("a fight breaks out");
        assert_eq!(verdicts.len(), 1);
        assert!((verdicts[0].score - 0.7).abs() < 1e-9);
        assert_eq!(verdicts[0].severity, Severity::Moderate);
    }

    #[test]
    fn test_abstaining_model_drops_out_of_average() {
        let ensemble = Ensemble::new(
            vec![
                model(1, 1.0, "violence", Box::new(Fixed(vec![("violence", 0.9)]))),
                model(2, 2.0, "violence", Box::new(Broken)),
            ],
            vec![policy("violence", 0.3, 0.6, 0.8)],
            0.5,
        )
        .unwrap();

        let verdicts = ensemble.evaluate("text");
        assert_eq!(verdicts.len(), 1);
        assert!((verdicts[0].score - 0.9).abs() < 1e-9);
        assert_eq!(verdicts[0].severity, Severity::Severe);
    }

    #[test]
    fn test_all_abstaining_yields_nothing() {
        let ensemble = Ensemble::new(
            vec![model(1, 1.0, "violence", Box::new(Broken))],
            vec![policy("violence", 0.3, 0.6, 0.8)],
            0.0,
        )
        .unwrap();
        assert!(ensemble.evaluate("text").is_empty());
    }

    #[test]
    fn test_global_threshold_suppresses_mild_hits() {
        let ensemble = Ensemble::new(
            vec![model(1, 1.0, "discrimination", Box::new(Fixed(vec![("discrimination", 0.45)])))],
            vec![policy("discrimination", 0.3, 0.6, 0.8)],
            0.5,
        )
        .unwrap();
        assert!(ensemble.evaluate("text").is_empty());
    }

    #[test]
    fn test_categories_tie_are_all_kept() {
        let ensemble = Ensemble::new(
            vec![LoadedModel::new(
                1,
                "test/multi",
                1.0,
                ["violence".to_string(), "hate_speech".to_string()],
                Box::new(Fixed(vec![("violence", 0.7), ("hate_speech", 0.7)])),
            )
            .unwrap()],
            vec![
                policy("violence", 0.3, 0.6, 0.8),
                policy("hate_speech", 0.3, 0.6, 0.8),
            ],
            0.5,
        )
        .unwrap();

        let verdicts = ensemble.evaluate("text");
        let names: Vec<&str> = verdicts.iter().map(|v| v.category.as_str()).collect();
        assert_eq!(names, vec!["hate_speech", "violence"]);
        assert!(verdicts.iter().all(|v| v.severity == Severity::Moderate));
    }

    #[test]
    fn test_disabled_category_is_not_scored() {
        let ensemble = Ensemble::new(
            vec![model(1, 1.0, "gore", Box::new(Fixed(vec![("gore", 1.0)])))],
            vec![policy("violence", 0.3, 0.6, 0.8)],
            0.0,
        )
        .unwrap();
        assert!(ensemble.evaluate("text").is_empty());
    }

    #[test]
    fn test_weight_bounds() {
        assert!(validate_weight(0.05).is_err());
        assert!(validate_weight(2.5).is_err());
        assert!(validate_weight(0.1).is_ok());
        assert!(validate_weight(2.0).is_ok());
    }

    #[test]
    fn test_version_is_order_independent() {
        let build = |ids: [i64; 2]| {
            Ensemble::new(
                ids.iter()
                    .map(|id| model(*id, 1.0, "violence", Box::new(Fixed(vec![]))))
                    .collect(),
                vec![],
                0.5,
            )
            .unwrap()
        };
        assert_eq!(build([1, 2]).version(), build([2, 1]).version());
        assert!(build([1, 2]).version().starts_with("ens-"));
        assert_eq!(Ensemble::empty(0.5).version(), "none");
    }
}
