use super::{CategoryScores, Classifier};
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub category: String,
    pub pattern: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub rules: Vec<PatternRule>,
}

/// Regex rule scorer: a category's confidence is the highest confidence among
/// its matching rules, or 0 when none match.
pub struct PatternClassifier {
    rules: Vec<(String, Regex, f64)>,
}

impl PatternClassifier {
    pub fn new(config: &PatternConfig) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                if !(0.0..=1.0).contains(&rule.confidence) {
                    return Err(Error::InvalidConfig(format!(
                        "pattern confidence must be in [0, 1], got {}",
                        rule.confidence
                    )));
                }
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    Error::InvalidConfig(format!("invalid pattern '{}': {}", rule.pattern, e))
                })?;
                Ok((rule.category.clone(), regex, rule.confidence))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }
}

impl Classifier for PatternClassifier {
    fn score(&self, text: &str) -> Result<CategoryScores> {
        let mut scores = CategoryScores::new();
        for (category, regex, confidence) in &self.rules {
            let hit = if regex.is_match(text) { *confidence } else { 0.0 };
            let entry = scores.entry(category.clone()).or_insert(0.0);
            if hit > *entry {
                *entry = hit;
            }
        }
        Ok(scores)
    }
}
