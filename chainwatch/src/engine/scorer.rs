// chainwatch/src/engine/scorer.rs
//
// Feature-vector scorer seam.
//
// Any model that maps a FeatureVector to [0, 1] plugs in through `Scorer`.
// The bundled WeightedScorer is a deterministic stand-in, not a trained model:
// a clamped weighted sum that leans on the movement features.
//
// Default weights (sum = 1.00):
//   hour          0.05
//   weekday       0.02
//   event type    0.03
//   participant   0.03
//   certs         0.02
//   time gap      0.25
//   distance      0.35   far and fast is the main thing worth a second look
//   history len   0.05
//   country       0.05
//   metadata      0.15

use crate::error::ScoreError;
use crate::features::{FeatureVector, FEATURE_COUNT};

pub const DEFAULT_WEIGHTS: [f64; FEATURE_COUNT] =
    [0.05, 0.02, 0.03, 0.03, 0.02, 0.25, 0.35, 0.05, 0.05, 0.15];

pub trait Scorer: Send + Sync {
    /// Anomaly score for one event; callers treat errors as "no opinion".
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoreError>;

    fn name(&self) -> &str {
        "scorer"
    }
}

/// Validate a raw model output: NaN / ±inf is an error, anything else is
/// clamped into [0, 1].
pub fn check_score(raw: f64) -> Result<f64, ScoreError> {
    if !raw.is_finite() {
        return Err(ScoreError::NonFinite(raw));
    }
    Ok(raw.clamp(0.0, 1.0))
}

// ── WeightedScorer ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WeightedScorer {
    weights: Vec<f64>,
}

impl WeightedScorer {
    pub fn new(weights: Vec<f64>) -> Result<Self, ScoreError> {
        if weights.len() != FEATURE_COUNT {
            return Err(ScoreError::Dimension { expected: FEATURE_COUNT, got: weights.len() });
        }
        Ok(Self { weights })
    }
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self { weights: DEFAULT_WEIGHTS.to_vec() }
    }
}

impl Scorer for WeightedScorer {
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoreError> {
        let raw: f64 = features
            .as_slice()
            .iter()
            .zip(&self.weights)
            .map(|(f, w)| f * w)
            .sum();
        check_score(raw)
    }

    fn name(&self) -> &str {
        "weighted"
    }
}

// ── FnScorer ──────────────────────────────────────────────────────────────────

/// Wrap a closure as a scorer. Handy for tests and for models loaded elsewhere.
pub struct FnScorer<F>(pub F);

impl<F> Scorer for FnScorer<F>
where
    F: Fn(&FeatureVector) -> Result<f64, ScoreError> + Send + Sync,
{
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoreError> {
        check_score((self.0)(features)?)
    }

    fn name(&self) -> &str {
        "fn"
    }
}
