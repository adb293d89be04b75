use super::{CategoryScores, Classifier};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconTerm {
    pub term: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconConfig {
    /// category -> weighted terms
    pub terms: BTreeMap<String, Vec<LexiconTerm>>,
}

/// Weighted keyword scorer. Each matched term contributes its weight and the
/// contributions combine as a noisy-or, so the confidence stays below 1 unless
/// a single term is certain.
pub struct LexiconClassifier {
    terms: Vec<(String, Vec<(String, f64)>)>,
}

impl LexiconClassifier {
    pub fn new(config: &LexiconConfig) -> Result<Self> {
        let mut terms = Vec::with_capacity(config.terms.len());
        for (category, entries) in &config.terms {
            let mut compiled = Vec::with_capacity(entries.len());
            for entry in entries {
                let term = entry.term.trim().to_lowercase();
                if term.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "empty lexicon term for category '{}'",
                        category
                    )));
                }
                if !(0.0..=1.0).contains(&entry.weight) {
                    return Err(Error::InvalidConfig(format!(
                        "lexicon weight for '{}' must be in [0, 1], got {}",
                        entry.term, entry.weight
                    )));
                }
                compiled.push((term, entry.weight));
            }
            terms.push((category.clone(), compiled));
        }
        Ok(Self { terms })
    }
}

impl Classifier for LexiconClassifier {
    fn score(&self, text: &str) -> Result<CategoryScores> {
        let haystack = text.to_lowercase();
        let mut scores = CategoryScores::new();
        for (category, entries) in &self.terms {
            let miss = entries
                .iter()
                .filter(|(term, _)| contains_word(&haystack, term))
                .fold(1.0, |acc, (_, weight)| acc * (1.0 - weight));
            scores.insert(category.clone(), 1.0 - miss);
        }
        Ok(scores)
    }
}

/// Substring match that requires non-alphanumeric characters (or the text
/// edges) on both sides of the term.
fn contains_word(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(start, _)| {
        let end = start + term.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}
