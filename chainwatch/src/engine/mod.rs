pub mod detector;
pub mod scorer;

pub use detector::{Analysis, AnomalyEngine, DetectionStatus};
pub use scorer::{FnScorer, Scorer, WeightedScorer};
