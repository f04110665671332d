// chainwatch/src/engine/detector.rs
//
// Anomaly orchestrator.
//
// Runs every check against one event and its ordered prior history:
//
//   duplicate → velocity → sequence → scorer → timing → route → certification
//
// Alerts come back in that order. Detection is advisory, so it fails open:
// a scorer error or panic costs only the scorer alert, and anything worse
// costs the whole batch of alerts for this event but never reaches the
// caller as an error.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::config::{clamp_threshold, EngineConfig};
use crate::engine::scorer::{Scorer, WeightedScorer};
use crate::events::{AnomalyAlert, AnomalyType, RuleKind, Severity, SupplyChainEvent};
use crate::features::extract_features;
use crate::ledger::history::prior_events;
use crate::ledger::EventHistory;
use crate::workers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStatus {
    /// All checks ran (the scorer may be disabled).
    Complete,
    /// Rule alerts are present; the scorer errored or panicked.
    ScorerFailed,
    /// Detection itself failed; no alerts.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub alerts: Vec<AnomalyAlert>,
    pub status: DetectionStatus,
}

pub struct AnomalyEngine {
    threshold: RwLock<f64>,
    scorer:    RwLock<Option<Arc<dyn Scorer>>>,
}

impl AnomalyEngine {
    pub fn new(cfg: &EngineConfig) -> Self {
        let scorer: Option<Arc<dyn Scorer>> = if cfg.scoring_enabled {
            Some(Arc::new(WeightedScorer::default()))
        } else {
            None
        };
        Self {
            threshold: RwLock::new(clamp_threshold(cfg.threshold)),
            scorer:    RwLock::new(scorer),
        }
    }

    pub fn with_scorer(self, scorer: Arc<dyn Scorer>) -> Self {
        self.set_scorer(scorer);
        self
    }

    pub fn set_scorer(&self, scorer: Arc<dyn Scorer>) {
        *self.scorer.write() = Some(scorer);
    }

    pub fn has_scorer(&self) -> bool {
        self.scorer.read().is_some()
    }

    /// Clamp into [0, 1]. NaN leaves the current value in place.
    pub fn set_threshold(&self, threshold: f64) {
        if threshold.is_nan() {
            warn!("ignoring NaN anomaly threshold");
            return;
        }
        *self.threshold.write() = threshold.clamp(0.0, 1.0);
    }

    pub fn threshold(&self) -> f64 {
        *self.threshold.read()
    }

    /// Alerts for `event` given its prior events (ascending by timestamp).
    /// Never panics; internal failure yields an empty list.
    pub fn analyze(&self, event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Vec<AnomalyAlert> {
        self.analyze_with_status(event, prior).alerts
    }

    pub fn analyze_with_status(&self, event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Analysis {
        guarded(event, || self.run(event, prior))
    }

    /// Fetch the batch history through `history`, then analyze. A failed fetch
    /// narrows detection to the checks that need no history.
    pub async fn analyze_from_history(
        &self,
        event: &SupplyChainEvent,
        history: &dyn EventHistory,
    ) -> Vec<AnomalyAlert> {
        let prior = prior_events(history, event).await;
        self.analyze(event, &prior)
    }

    fn run(&self, event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Analysis {
        let mut alerts = workers::run_primary(event, prior);

        let status = match self.score(event, prior) {
            Ok(Some(alert)) => {
                alerts.push(alert);
                DetectionStatus::Complete
            }
            Ok(None) => DetectionStatus::Complete,
            Err(()) => DetectionStatus::ScorerFailed,
        };

        alerts.extend(workers::run_secondary(event, prior));
        debug!(event = %event.id, n = alerts.len(), ?status, "analysis complete");
        Analysis { alerts, status }
    }

    fn score(&self, event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Result<Option<AnomalyAlert>, ()> {
        // take what we need and drop the locks before calling into the model
        let scorer = self.scorer.read().clone();
        let Some(scorer) = scorer else { return Ok(None) };
        let threshold = self.threshold();

        let features = extract_features(event, prior);
        let score = match catch_unwind(AssertUnwindSafe(|| scorer.score(&features))) {
            Ok(Ok(score)) => score,
            Ok(Err(e)) => {
                warn!(event = %event.id, scorer = scorer.name(), "scorer failed: {}", e);
                return Err(());
            }
            Err(panic) => {
                warn!(event = %event.id, scorer = scorer.name(), "scorer panicked: {}", panic_message(&*panic));
                return Err(());
            }
        };

        if score <= threshold {
            return Ok(None);
        }
        Ok(Some(
            AnomalyAlert::new(
                event,
                RuleKind::Scorer,
                AnomalyType::SuspiciousPattern,
                Severity::from_score(score),
                format!("ML model detected anomaly (score: {:.3})", score),
                score,
            )
            .with_meta("scorer", json!(scorer.name()))
            .with_meta("threshold", json!(threshold))
            .with_meta("features", json!(features.as_slice())),
        ))
    }
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

/// Run one detection pass; a panic anywhere inside becomes `Degraded`.
fn guarded(event: &SupplyChainEvent, pass: impl FnOnce() -> Analysis) -> Analysis {
    match catch_unwind(AssertUnwindSafe(pass)) {
        Ok(analysis) => analysis,
        Err(panic) => {
            error!(event = %event.id, batch = %event.batch_id,
                   "anomaly detection failed: {}", panic_message(&*panic));
            Analysis { alerts: Vec::new(), status: DetectionStatus::Degraded }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scorer::FnScorer;
    use crate::error::ScoreError;
    use crate::events::{parse_timestamp, EventType, Location};
    use crate::features::FeatureVector;

    fn event(id: &str, ty: EventType, ts: &str, loc: Location) -> SupplyChainEvent {
        SupplyChainEvent::new(id, "B1", ty, parse_timestamp(ts).unwrap(), loc)
    }

    fn fixed(score: f64) -> Arc<dyn Scorer> {
        Arc::new(FnScorer(move |_: &FeatureVector| Ok::<f64, ScoreError>(score)))
    }

    fn no_scorer() -> AnomalyEngine {
        AnomalyEngine::new(&EngineConfig { scoring_enabled: false, ..Default::default() })
    }

    #[test]
    fn threshold_is_clamped_and_nan_ignored() {
        let engine = AnomalyEngine::default();
        assert_eq!(engine.threshold(), 0.7);
        engine.set_threshold(1.5);
        assert_eq!(engine.threshold(), 1.0);
        engine.set_threshold(-0.2);
        assert_eq!(engine.threshold(), 0.0);
        engine.set_threshold(f64::NAN);
        assert_eq!(engine.threshold(), 0.0);
    }

    #[test]
    fn scorer_alert_only_above_threshold() {
        let ev = event("e1", EventType::Harvest, "2024-01-18T10:00:00Z", Location::new("Brazil", "", "Santos"));

        let engine = no_scorer().with_scorer(fixed(0.95));
        let alerts = engine.analyze(&ev, &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].description, "ML model detected anomaly (score: 0.950)");
        assert_eq!(alerts[0].rule(), Some("scorer"));

        let engine = no_scorer().with_scorer(fixed(0.7));
        assert!(engine.analyze(&ev, &[]).is_empty());
    }

    #[test]
    fn scorer_alert_sits_between_primary_and_secondary_rules() {
        let prior = event("e1", EventType::Shipping, "2024-01-18T10:00:00Z", Location::new("Brazil", "", "Santos"));
        let cur = event("e2", EventType::Processing, "2024-01-18T23:30:00Z", Location::new("Brazil", "", "Santos"));
        let engine = no_scorer().with_scorer(fixed(0.85));
        let rules: Vec<_> = engine
            .analyze(&cur, &[prior])
            .iter()
            .filter_map(|a| a.rule().map(str::to_string))
            .collect();
        assert_eq!(rules, vec!["unexpected_sequence", "scorer", "time_inconsistency"]);
    }

    #[test]
    fn failing_scorer_keeps_rule_alerts() {
        let ev = event("e1", EventType::QualityCheck, "2024-01-18T10:00:00Z", Location::new("Kenya", "", "Nyeri"));
        let failing: Arc<dyn Scorer> =
            Arc::new(FnScorer(|_: &FeatureVector| Err(ScoreError::Unavailable("model not loaded".into()))));
        let analysis = no_scorer().with_scorer(failing).analyze_with_status(&ev, &[]);
        assert_eq!(analysis.status, DetectionStatus::ScorerFailed);
        assert_eq!(analysis.alerts.len(), 1); // missing certifications

        let panicking: Arc<dyn Scorer> =
            Arc::new(FnScorer(|_: &FeatureVector| -> Result<f64, ScoreError> { panic!("boom") }));
        let analysis = no_scorer().with_scorer(panicking).analyze_with_status(&ev, &[]);
        assert_eq!(analysis.status, DetectionStatus::ScorerFailed);
        assert_eq!(analysis.alerts.len(), 1);
    }

    #[test]
    fn panic_inside_a_pass_degrades_instead_of_unwinding() {
        let ev = event("e1", EventType::Harvest, "2024-01-18T10:00:00Z", Location::new("Peru", "", "Cusco"));
        let analysis = guarded(&ev, || -> Analysis { panic!("rule table corrupted") });
        assert_eq!(analysis.status, DetectionStatus::Degraded);
        assert!(analysis.alerts.is_empty());

        let clean = guarded(&ev, || AnomalyEngine::default().run(&ev, &[]));
        assert_eq!(clean.status, DetectionStatus::Complete);
    }

    #[test]
    fn default_scorer_with_empty_history() {
        let ev = event("e1", EventType::Sale, "2024-01-18T10:00:00Z", Location::new("", "", ""));
        let analysis = AnomalyEngine::default().analyze_with_status(&ev, &[]);
        assert_eq!(analysis.status, DetectionStatus::Complete);
        assert!(analysis.alerts.is_empty());
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        let engine = Arc::new(AnomalyEngine::default());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    engine.set_threshold(0.1 * i as f64);
                    let ev = event("e", EventType::Harvest, "2024-01-18T10:00:00Z", Location::new("Peru", "", "Cusco"));
                    engine.analyze(&ev, &[]).len()
                })
            })
            .collect();
        for h in handles {
            let _ = h.join().unwrap();
        }
        assert!((0.0..=1.0).contains(&engine.threshold()));
    }
}
