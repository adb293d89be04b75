use crate::error::Error;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discrete severity bucket. Ordering follows intensity, so `max()` over a
/// trigger set yields the file's highest severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Mild, Severity::Moderate, Severity::Severe];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mild" => Ok(Severity::Mild),
            "moderate" => Ok(Severity::Moderate),
            "severe" => Ok(Severity::Severe),
            other => Err(Error::Other(format!("unknown severity '{}'", other))),
        }
    }
}

impl ToSql for Severity {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Severity {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

/// Label stored for a result's highest severity; `none` when nothing fired.
pub fn severity_label(severity: Option<Severity>) -> &'static str {
    severity.map(|s| s.as_str()).unwrap_or("none")
}

pub fn parse_severity_label(label: &str) -> Result<Option<Severity>, Error> {
    if label.trim().eq_ignore_ascii_case("none") {
        Ok(None)
    } else {
        label.parse().map(Some)
    }
}

/// Confidence cut points for one category. A score earns the highest bucket
/// whose cut point it meets or exceeds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityMapping {
    pub mild: f64,
    pub moderate: f64,
    pub severe: f64,
}

impl Default for SeverityMapping {
    fn default() -> Self {
        Self {
            mild: 0.3,
            moderate: 0.6,
            severe: 0.8,
        }
    }
}

impl SeverityMapping {
    pub fn new(mild: f64, moderate: f64, severe: f64) -> Result<Self, Error> {
        let mapping = Self {
            mild,
            moderate,
            severe,
        };
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let cuts = [self.mild, self.moderate, self.severe];
        if cuts.iter().any(|c| !c.is_finite() || *c <= 0.0 || *c > 1.0) {
            return Err(Error::InvalidConfig(format!(
                "severity cut points must lie in (0, 1]: {:?}",
                cuts
            )));
        }
        if !(self.mild < self.moderate && self.moderate < self.severe) {
            return Err(Error::InvalidConfig(format!(
                "severity cut points must be strictly increasing (mild < moderate < severe): {:?}",
                cuts
            )));
        }
        Ok(())
    }

    pub fn classify(&self, score: f64) -> Option<Severity> {
        if score >= self.severe {
            Some(Severity::Severe)
        } else if score >= self.moderate {
            Some(Severity::Moderate)
        } else if score >= self.mild {
            Some(Severity::Mild)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_buckets() {
        let mapping = SeverityMapping::new(0.3, 0.6, 0.8).unwrap();
        assert_eq!(mapping.classify(0.29), None);
        assert_eq!(mapping.classify(0.3), Some(Severity::Mild));
        assert_eq!(mapping.classify(0.6), Some(Severity::Moderate));
        assert_eq!(mapping.classify(0.79), Some(Severity::Moderate));
        assert_eq!(mapping.classify(0.85), Some(Severity::Severe));
    }

    #[test]
    fn test_rejects_non_increasing_cuts() {
        assert!(SeverityMapping::new(0.5, 0.5, 0.9).is_err());
        assert!(SeverityMapping::new(0.7, 0.6, 0.9).is_err());
        assert!(SeverityMapping::new(0.0, 0.6, 0.9).is_err());
        assert!(SeverityMapping::new(0.3, 0.6, 1.2).is_err());
    }

    #[test]
    fn test_severity_ordering_and_labels() {
        assert!(Severity::Severe > Severity::Moderate);
        assert!(Severity::Moderate > Severity::Mild);
        assert_eq!(severity_label(None), "none");
        assert_eq!(parse_severity_label("none").unwrap(), None);
        assert_eq!(
            parse_severity_label("Severe").unwrap(),
            Some(Severity::Severe)
        );
    }
}
