use crate::classify::ensemble::validate_weight;
use crate::classify::{ModelConfig, Severity, SeverityMapping};
use crate::error::{Error, Result};
use crate::storage::models::{ModelCategory, NewModel};
use config::{Config, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    pub queue_path: String,
    pub scan_interval_secs: u64,
    pub workers: usize,
    pub pop_timeout_ms: u64,
    pub queue_capacity: usize,
    /// A file left `queued` or `processing` longer than this is treated as
    /// lost and becomes eligible for the scanner again.
    pub stale_claim_secs: u64,
    pub control_ttl_secs: u64,
    pub root_paths: Vec<String>,
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub fingerprint: FingerprintSettings,
    pub classification: ClassificationSettings,
    pub risk: RiskSettings,
    pub categories: Vec<CategorySeed>,
    pub models: Vec<ModelSeed>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "cue_sentry.db".to_string(),
            queue_path: "cue_sentry_queue.db".to_string(),
            scan_interval_secs: 300,
            workers: 4,
            pop_timeout_ms: 5000,
            queue_capacity: 10_000,
            stale_claim_secs: 3600,
            control_ttl_secs: 600,
            root_paths: Vec::new(),
            extensions: [".srt", ".vtt", ".mp4", ".mkv", ".avi"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_patterns: vec!["*sample*".to_string(), "*.tmp".to_string()],
            fingerprint: FingerprintSettings::default(),
            classification: ClassificationSettings::default(),
            risk: RiskSettings::default(),
            categories: Vec::new(),
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintSettings {
    pub prefix_bytes: usize,
    /// Extensions hashed in full rather than by prefix.
    pub full_hash_extensions: Vec<String>,
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        Self {
            prefix_bytes: 1024 * 1024,
            full_hash_extensions: vec![".srt".to_string(), ".vtt".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    pub global_threshold: f64,
    /// Neighbouring cues on each side attached to a span as context.
    pub context_window: usize,
    pub max_input_chars: usize,
    /// Score the cue joined with its context instead of the cue alone.
    pub score_with_context: bool,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            global_threshold: 0.5,
            context_window: 1,
            max_input_chars: 512,
            score_with_context: true,
        }
    }
}

/// Overall risk is `100 * raw / (raw + saturation)` where `raw` sums the
/// per-severity weight of every trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub mild: f64,
    pub moderate: f64,
    pub severe: f64,
    pub saturation: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            mild: 1.0,
            moderate: 3.0,
            severe: 9.0,
            saturation: 10.0,
        }
    }
}

impl RiskSettings {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Mild => self.mild,
            Severity::Moderate => self.moderate,
            Severity::Severe => self.severe,
        }
    }
}

/// Cut points as written in configuration; omitted values fall back to the
/// category's `default_threshold` (mild) or the stock 0.6 / 0.8.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedCuts {
    pub mild: Option<f64>,
    pub moderate: Option<f64>,
    pub severe: Option<f64>,
}

fn default_category_threshold() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySeed {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category_threshold")]
    pub default_threshold: f64,
    #[serde(default)]
    pub severity_mapping: SeedCuts,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl CategorySeed {
    pub fn new(name: &str, display_name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: Some(display_name.to_string()),
            description: description.to_string(),
            default_threshold: default_category_threshold(),
            severity_mapping: SeedCuts::default(),
            active: true,
        }
    }

    pub fn to_category(&self) -> Result<ModelCategory> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("category name is empty".to_string()));
        }
        let stock = SeverityMapping::default();
        let cuts = &self.severity_mapping;
        let mapping = SeverityMapping::new(
            cuts.mild.unwrap_or(self.default_threshold),
            cuts.moderate.unwrap_or(stock.moderate),
            cuts.severe.unwrap_or(stock.severe),
        )
        .map_err(|e| Error::InvalidConfig(format!("category '{}': {}", self.name, e)))?;
        Ok(ModelCategory {
            name: self.name.clone(),
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| self.name.clone()),
            description: self.description.clone(),
            default_threshold: self.default_threshold,
            severity_mapping: mapping,
            active: self.active,
        })
    }
}

fn default_model_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSeed {
    #[serde(default)]
    pub name: Option<String>,
    pub identifier: String,
    pub categories: Vec<String>,
    #[serde(default = "default_model_weight")]
    pub weight: f64,
    pub config: ModelConfig,
}

impl ModelSeed {
    pub fn to_new_model(&self) -> Result<NewModel> {
        let model = NewModel {
            name: self.name.clone().unwrap_or_else(|| self.identifier.clone()),
            identifier: self.identifier.clone(),
            categories: self.categories.clone(),
            weight: self.weight,
            config: self.config.clone(),
        };
        validate_new_model(&model)?;
        Ok(model)
    }
}

/// Load-time validation of a model definition: weight bounds, a non-empty
/// target set and a backend configuration that compiles.
pub fn validate_new_model(model: &NewModel) -> Result<()> {
    if model.identifier.trim().is_empty() {
        return Err(Error::InvalidConfig(
            "model identifier is empty".to_string(),
        ));
    }
    validate_weight(model.weight)?;
    model
        .config
        .build(&model.categories)
        .map_err(|e| Error::InvalidConfig(format!("model '{}': {}", model.identifier, e)))?;
    Ok(())
}

fn builtin_categories() -> Vec<CategorySeed> {
    vec![
        CategorySeed::new("violence", "Violence", "Physical violence, threats and gore"),
        CategorySeed::new("hate_speech", "Hate Speech", "Slurs and hateful language"),
        CategorySeed::new(
            "sexual_assault",
            "Sexual Assault",
            "Sexual violence and non-consent",
        ),
        CategorySeed::new("self_harm", "Self Harm", "Suicide and self-injury"),
        CategorySeed::new(
            "substance_abuse",
            "Substance Abuse",
            "Drug and alcohol abuse",
        ),
        CategorySeed::new(
            "discrimination",
            "Discrimination",
            "Prejudice against protected groups",
        ),
    ]
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if self.workers == 0 {
            return invalid("workers must be at least 1".to_string());
        }
        if self.pop_timeout_ms == 0 || self.scan_interval_secs == 0 {
            return invalid("pop_timeout_ms and scan_interval_secs must be positive".to_string());
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1".to_string());
        }
        if self.fingerprint.prefix_bytes == 0 {
            return invalid("fingerprint.prefix_bytes must be positive".to_string());
        }

        let cls = &self.classification;
        if !(0.0..=1.0).contains(&cls.global_threshold) {
            return invalid(format!(
                "classification.global_threshold must be in [0, 1], got {}",
                cls.global_threshold
            ));
        }
        if cls.max_input_chars == 0 {
            return invalid("classification.max_input_chars must be positive".to_string());
        }

        let risk = &self.risk;
        let weights = [risk.mild, risk.moderate, risk.severe];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return invalid(format!("risk weights must be non-negative: {:?}", weights));
        }
        if !(risk.mild <= risk.moderate && risk.moderate <= risk.severe) {
            return invalid(format!(
                "risk weights must not decrease with severity: {:?}",
                weights
            ));
        }
        if !(risk.saturation.is_finite() && risk.saturation > 0.0) {
            return invalid("risk.saturation must be positive".to_string());
        }

        for pattern in &self.ignore_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                Error::InvalidConfig(format!("ignore pattern '{}': {}", pattern, e))
            })?;
        }

        self.category_seeds()?;
        self.model_seeds()?;
        Ok(())
    }

    /// Lower-cased extensions with a leading dot.
    pub fn normalized_extensions(&self) -> Vec<String> {
        normalize_extensions(&self.extensions)
    }

    /// Configured categories, or the built-in set when none are configured.
    pub fn category_seeds(&self) -> Result<Vec<ModelCategory>> {
        let seeds = if self.categories.is_empty() {
            builtin_categories()
        } else {
            self.categories.clone()
        };
        seeds.iter().map(CategorySeed::to_category).collect()
    }

    pub fn model_seeds(&self) -> Result<Vec<NewModel>> {
        self.models.iter().map(ModelSeed::to_new_model).collect()
    }
}

pub fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|ext| {
            let ext = ext.trim().to_lowercase();
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{}", ext)
            }
        })
        .collect()
}

/// Load `Config.toml` (or `path`) overlaid with `CUE_SENTRY__*` environment
/// variables, then validate.
pub fn load_configuration(path: Option<&str>) -> Result<AppConfig> {
    let file = match path {
        Some(p) => ConfigFile::with_name(p).required(true),
        None => ConfigFile::with_name("Config").required(false),
    };
    let builder = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("CUE_SENTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let config = builder.try_deserialize::<AppConfig>()?;
    config.validate()?;
    Ok(config)
}

/// Remove directories that are subdirectories of other directories in the
/// list. `dirs` is in walk order; an ancestor that absorbs earlier entries
/// takes the position of the first one, so a high-priority subfolder still
/// gets its tree walked early.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|kept| dir_path.starts_with(Path::new(kept))) {
            continue;
        }
        match result
            .iter()
            .position(|kept| Path::new(kept).starts_with(dir_path))
        {
            Some(slot) => {
                result.retain(|kept| !Path::new(kept).starts_with(dir_path));
                result.insert(slot.min(result.len()), dir);
            }
            None => result.push(dir),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::pattern::{PatternConfig, PatternRule};

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            "/media/movies".to_string(),
            "/media/shows".to_string(),
            "/srv/library".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            "/media/shows/drama".to_string(),
            "/media/shows".to_string(),
            "/media/shows/comedy".to_string(),
            "/srv/library".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(
            result,
            vec!["/media/shows".to_string(), "/srv/library".to_string()]
        );
    }

    #[test]
    fn test_non_overlapping_ancestor_keeps_descendant_slot() {
        let dirs = vec![
            "/media/shows/kids".to_string(),
            "/srv/library".to_string(),
            "/media/movies".to_string(),
            "/media".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(
            result,
            vec!["/media".to_string(), "/srv/library".to_string()]
        );
    }

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.category_seeds().unwrap().len(), 6);
        assert_eq!(config.scan_interval_secs, 300);
        assert_eq!(config.fingerprint.prefix_bytes, 1 << 20);
    }

    #[test]
    fn test_category_seed_fills_missing_cuts() {
        let seed = CategorySeed {
            severity_mapping: SeedCuts {
                mild: None,
                moderate: Some(0.5),
                severe: None,
            },
            default_threshold: 0.25,
            ..CategorySeed::new("violence", "Violence", "")
        };
        let mapping = seed.to_category().unwrap().severity_mapping;
        assert_eq!(mapping, SeverityMapping::new(0.25, 0.5, 0.8).unwrap());
    }

    #[test]
    fn test_invalid_cuts_are_rejected() {
        let config = AppConfig {
            categories: vec![CategorySeed {
                severity_mapping: SeedCuts {
                    mild: Some(0.7),
                    moderate: Some(0.6),
                    severe: Some(0.9),
                },
                ..CategorySeed::new("violence", "Violence", "")
            }],
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_seed_validation() {
        let seed = |weight: f64, pattern: &str| ModelSeed {
            name: None,
            identifier: "local/violence".to_string(),
            categories: vec!["violence".to_string()],
            weight,
            config: ModelConfig::Pattern(PatternConfig {
                rules: vec![PatternRule {
                    category: "violence".to_string(),
                    pattern: pattern.to_string(),
                    confidence: 0.8,
                }],
            }),
        };
        assert!(seed(1.0, "kill").to_new_model().is_ok());
        assert!(seed(3.0, "kill").to_new_model().is_err());
        assert!(seed(1.0, "(unclosed").to_new_model().is_err());
    }

    #[test]
    fn test_normalize_extensions() {
        let exts = vec!["SRT".to_string(), ".Mkv".to_string()];
        assert_eq!(normalize_extensions(&exts), vec![".srt", ".mkv"]);
    }

    #[test]
    fn test_risk_weights_must_be_ordered() {
        let config = AppConfig {
            risk: RiskSettings {
                mild: 5.0,
                moderate: 3.0,
                ..RiskSettings::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
