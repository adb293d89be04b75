pub mod command;
pub mod ensemble;
pub mod lexicon;
pub mod pattern;
pub mod registry;
pub mod severity;

pub use ensemble::{CategoryPolicy, CategoryVerdict, Ensemble, LoadedModel};
pub use registry::ModelRegistry;
pub use severity::{Severity, SeverityMapping};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-category confidences returned by one model for one piece of text.
pub type CategoryScores = BTreeMap<String, f64>;

/// A black-box scoring function. Implementations must be deterministic for a
/// given input; an `Err` means the model abstains for this text.
pub trait Classifier: Send + Sync {
    fn score(&self, text: &str) -> Result<CategoryScores>;
}

/// Backend configuration, one variant per model kind. Stored as JSON on the
/// model row and validated by [`ModelConfig::build`] when the model loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelConfig {
    Lexicon(lexicon::LexiconConfig),
    Pattern(pattern::PatternConfig),
    Command(command::CommandConfig),
}

impl ModelConfig {
    /// Task type label recorded on the model row.
    pub fn task_type(&self) -> &'static str {
        match self {
            ModelConfig::Lexicon(_) => "lexicon",
            ModelConfig::Pattern(_) => "pattern",
            ModelConfig::Command(_) => "command",
        }
    }

    /// Compile the configuration into a runnable classifier for `targets`.
    pub fn build(&self, targets: &[String]) -> Result<Box<dyn Classifier>> {
        if targets.is_empty() {
            return Err(Error::InvalidConfig(
                "a model must target at least one category".to_string(),
            ));
        }
        match self {
            ModelConfig::Lexicon(cfg) => Ok(Box::new(lexicon::LexiconClassifier::new(cfg)?)),
            ModelConfig::Pattern(cfg) => Ok(Box::new(pattern::PatternClassifier::new(cfg)?)),
            ModelConfig::Command(cfg) => {
                Ok(Box::new(command::CommandClassifier::new(cfg, targets)?))
            }
        }
    }
}

/// Clamp a raw model confidence into [0, 1]; non-finite values are dropped.
pub(crate) fn normalize_confidence(raw: f64) -> Option<f64> {
    if raw.is_finite() {
        Some(raw.clamp(0.0, 1.0))
    } else {
        None
    }
}
