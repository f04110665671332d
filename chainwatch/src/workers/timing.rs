// chainwatch/src/workers/timing.rs
//
// Timing worker.
//   backdated   : earlier than the last prior event              (high, 0.85)
//   off_hours   : processing / quality_check / packaging recorded
//                 before 06:00 or after 22:59 local time          (medium, 0.6)
// "Local" is the offset the event was recorded with. Both may fire.

use chrono::Timelike;
use serde_json::json;

use crate::events::{AnomalyAlert, AnomalyType, EventType, RuleKind, Severity, SupplyChainEvent};

const BUSINESS_EVENTS: [EventType; 3] =
    [EventType::Processing, EventType::QualityCheck, EventType::Packaging];
const OPENING_HOUR: u32 = 6;
const CLOSING_HOUR: u32 = 22;

pub fn analyze(event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Vec<AnomalyAlert> {
    let mut out = Vec::new();

    if let Some(last) = prior.last() {
        if event.timestamp < last.timestamp {
            out.push(
                AnomalyAlert::new(
                    event,
                    RuleKind::TimeInconsistency,
                    AnomalyType::TimeInconsistency,
                    Severity::High,
                    "Event timestamp is earlier than previous event",
                    0.85,
                )
                .with_meta("check", json!("backdated"))
                .with_meta("previous_timestamp", json!(last.timestamp.to_rfc3339())),
            );
        }
    }

    let hour = event.timestamp.hour();
    if BUSINESS_EVENTS.contains(&event.event_type) && (hour < OPENING_HOUR || hour > CLOSING_HOUR) {
        out.push(
            AnomalyAlert::new(
                event,
                RuleKind::TimeInconsistency,
                AnomalyType::TimeInconsistency,
                Severity::Medium,
                "Business event occurring outside normal hours",
                0.6,
            )
            .with_meta("check", json!("off_hours"))
            .with_meta("local_hour", json!(hour)),
        );
    }

    out
}
