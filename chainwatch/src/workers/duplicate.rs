// chainwatch/src/workers/duplicate.rs
//
// Duplicate worker: the same event type at the same city within an hour of
// any prior event of the batch. Replayed submissions and double scans both
// look like this.

use serde_json::json;

use crate::events::{AnomalyAlert, AnomalyType, RuleKind, Severity, SupplyChainEvent};

pub const DUPLICATE_WINDOW_MS: i64 = 3_600_000;

pub fn analyze(event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Option<AnomalyAlert> {
    let ts = event.timestamp.timestamp_millis();
    let dup = prior.iter().find(|p| {
        p.event_type == event.event_type
            && p.location.city == event.location.city
            && (p.timestamp.timestamp_millis() - ts).abs() < DUPLICATE_WINDOW_MS
    })?;

    Some(
        AnomalyAlert::new(
            event,
            RuleKind::Duplicate,
            AnomalyType::SuspiciousPattern,
            Severity::Medium,
            "Duplicate event detected within 1 hour",
            0.8,
        )
        .with_meta("duplicate_of", json!(dup.id))
        .with_meta("gap_ms", json!((dup.timestamp.timestamp_millis() - ts).abs())),
    )
}
