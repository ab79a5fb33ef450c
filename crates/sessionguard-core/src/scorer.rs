//! Pluggable anomaly scoring capability.
//!
//! A scorer converts a fixed-width feature vector into an unbounded
//! anomaly margin (higher = more normal, isolation-forest style). The core
//! owns normalization of that margin into a `[0, 1]` risk score; the
//! capability may be entirely absent, in which case the anomaly rule is
//! skipped.

use crate::error::ScorerError;

/// Width of the feature vector handed to a scorer:
/// `[event_count, tab_switch_count, risk_score, duration, click_count, keypress_count]`.
pub const FEATURE_LEN: usize = 6;

/// Capability interface for anomaly scoring.
///
/// A missing or failing scorer must degrade to "no scoring contribution";
/// implementations therefore surface failures as [`ScorerError`] rather than
/// panicking.
pub trait AnomalyScorer: Send + Sync {
    /// Score a feature vector, returning a raw decision margin.
    fn score(&self, features: &[f64; FEATURE_LEN]) -> Result<f64, ScorerError>;
}

/// Normalize a raw decision margin into a `[0, 1]` risk score.
///
/// Higher risk = more anomalous. The `margin + 0.5` offset maps a neutral
/// isolation-forest margin of 0 onto a risk of 0.5.
pub fn normalize_margin(margin: f64) -> f64 {
    (1.0 - (margin + 0.5)).clamp(0.0, 1.0)
}

/// Deterministic linear scorer used as the reference implementation.
///
/// Computes `margin = bias - weights . features`. Suitable for wiring and
/// tests; a trained model implements [`AnomalyScorer`] the same way.
#[derive(Debug, Clone)]
pub struct ThresholdScorer {
    weights: [f64; FEATURE_LEN],
    bias: f64,
}

impl ThresholdScorer {
    pub fn new(weights: [f64; FEATURE_LEN], bias: f64) -> Self {
        Self { weights, bias }
    }
}

impl Default for ThresholdScorer {
    fn default() -> Self {
        // Weights chosen so that quiet sessions sit near the neutral margin
        // and bursty, high-interaction sessions sink below it.
        Self {
            weights: [0.001, 0.05, 0.2, 0.002, 0.0005, 0.0002],
            bias: 0.5,
        }
    }
}

impl AnomalyScorer for ThresholdScorer {
    fn score(&self, features: &[f64; FEATURE_LEN]) -> Result<f64, ScorerError> {
        let dot: f64 = self
            .weights
            .iter()
            .zip(features.iter())
            .map(|(w, f)| w * f)
            .sum();
        Ok(self.bias - dot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_to_unit_interval() {
        assert_eq!(normalize_margin(10.0), 0.0);
        assert_eq!(normalize_margin(-10.0), 1.0);
        let mid = normalize_margin(0.0);
        assert!((mid - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn normalize_is_monotonically_decreasing_in_margin() {
        // A lower (more anomalous) margin must never yield a lower risk.
        let mut last = normalize_margin(2.0);
        for i in 1..40 {
            let margin = 2.0 - i as f64 * 0.1;
            let risk = normalize_margin(margin);
            assert!(risk >= last);
            last = risk;
        }
    }

    #[test]
    fn threshold_scorer_quiet_session_is_near_neutral() {
        let scorer = ThresholdScorer::default();
        let margin = scorer.score(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let risk = normalize_margin(margin);
        assert!(risk < 0.7, "quiet session should not cross the default threshold, got {risk}");
    }

    #[test]
    fn threshold_scorer_bursty_session_scores_higher() {
        let scorer = ThresholdScorer::default();
        let quiet = scorer.score(&[5.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let bursty = scorer.score(&[200.0, 12.0, 0.9, 60.0, 500.0, 900.0]).unwrap();
        assert!(normalize_margin(bursty) > normalize_margin(quiet));
    }
}
