use cue_sentry_core::aggregate::risk_score;
use cue_sentry_core::classify::ensemble::weighted_average;
use cue_sentry_core::classify::{
    CategoryPolicy, CategoryScores, Classifier, Ensemble, LoadedModel, Severity, SeverityMapping,
};
use cue_sentry_core::config::RiskSettings;
use cue_sentry_core::Result;
use proptest::prelude::*;

struct Fixed(f64);

impl Classifier for Fixed {
    fn score(&self, _text: &str) -> Result<CategoryScores> {
        Ok(CategoryScores::from([("violence".to_string(), self.0)]))
    }
}

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Mild),
        Just(Severity::Moderate),
        Just(Severity::Severe),
    ]
}

fn ensemble(models: &[(f64, f64)], threshold: f64) -> Ensemble {
    let loaded = models
        .iter()
        .enumerate()
        .map(|(i, (weight, confidence))| {
            LoadedModel::new(
                i as i64,
                &format!("model-{}", i),
                *weight,
                vec!["violence".to_string()],
                Box::new(Fixed(*confidence)),
            )
            .unwrap()
        })
        .collect();
    let policies = vec![CategoryPolicy {
        name: "violence".to_string(),
        mapping: SeverityMapping::default(),
    }];
    Ensemble::new(loaded, policies, threshold).unwrap()
}

proptest! {
    #[test]
    fn risk_never_drops_when_a_trigger_is_added(
        existing in prop::collection::vec(severity(), 0..40),
        added in severity(),
    ) {
        let risk = RiskSettings::default();
        let before = risk_score(existing.iter().copied(), &risk);
        let after = risk_score(existing.iter().copied().chain([added]), &risk);
        prop_assert!(after >= before);
        prop_assert!((0.0..100.0).contains(&after));
    }

    #[test]
    fn risk_ignores_trigger_order(severities in prop::collection::vec(severity(), 0..40)) {
        let risk = RiskSettings::default();
        let mut reversed = severities.clone();
        reversed.reverse();
        let a = risk_score(severities, &risk);
        let b = risk_score(reversed, &risk);
        prop_assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn weighted_average_stays_within_inputs(
        contributions in prop::collection::vec((0.1f64..=2.0, 0.0f64..=1.0), 1..8),
    ) {
        let avg = weighted_average(&contributions).unwrap();
        let lo = contributions.iter().map(|(_, c)| *c).fold(f64::INFINITY, f64::min);
        let hi = contributions.iter().map(|(_, c)| *c).fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(avg >= lo - 1e-12 && avg <= hi + 1e-12);
    }

    #[test]
    fn ensemble_is_deterministic_and_respects_threshold(
        models in prop::collection::vec((0.1f64..=2.0, 0.0f64..=1.0), 1..6),
        threshold in 0.0f64..=1.0,
        text in ".{0,40}",
    ) {
        let ensemble = ensemble(&models, threshold);
        let first = ensemble.evaluate(&text);
        let second = ensemble.evaluate(&text);
        prop_assert_eq!(&first, &second);
        for verdict in &first {
            prop_assert!(verdict.score >= threshold);
            prop_assert_eq!(
                Some(verdict.severity),
                SeverityMapping::default().classify(verdict.score)
            );
        }
    }
}
