// chainwatch/src/workers/sequence.rs
//
// Sequence worker: custody steps follow a loose lifecycle. Only the last
// prior event matters; types with no entry in the table (sale, certification,
// inspection, quality_check) constrain nothing after them.

use serde_json::json;

use crate::events::{AnomalyAlert, AnomalyType, EventType, RuleKind, Severity, SupplyChainEvent};

/// Allowed successors of `prev`, or None when anything may follow.
pub fn expected_next(prev: EventType) -> Option<&'static [EventType]> {
    use EventType::*;
    let next: &'static [EventType] = match prev {
        Harvest       => &[Processing, QualityCheck, Packaging],
        Processing    => &[QualityCheck, Packaging, Storage],
        Packaging     => &[Shipping, Storage],
        Shipping      => &[Storage, RetailArrival],
        Storage       => &[Shipping, RetailArrival, QualityCheck],
        RetailArrival => &[Sale],
        _ => return None,
    };
    Some(next)
}

pub fn analyze(event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Option<AnomalyAlert> {
    let last = prior.last()?;
    let allowed = expected_next(last.event_type)?;
    if allowed.contains(&event.event_type) {
        return None;
    }

    Some(
        AnomalyAlert::new(
            event,
            RuleKind::UnexpectedSequence,
            AnomalyType::SuspiciousPattern,
            Severity::Medium,
            format!("Unexpected event sequence: {} → {}", last.event_type, event.event_type),
            0.7,
        )
        .with_meta("previous_type", json!(last.event_type))
        .with_meta("previous_event", json!(last.id)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::fixtures::{at, event};

    fn after(prev: EventType, cur: EventType) -> Option<AnomalyAlert> {
        let p = event("e1", prev, "2024-01-18T08:00:00Z", at("Brazil", "Santos"));
        let c = event("e2", cur, "2024-01-19T08:00:00Z", at("Brazil", "Santos"));
        analyze(&c, &[p])
    }

    #[test]
    fn processing_after_shipping_fires() {
        let alert = after(EventType::Shipping, EventType::Processing).unwrap();
        assert_eq!(alert.description, "Unexpected event sequence: shipping → processing");
        assert_eq!(alert.score, 0.7);
        assert_eq!(alert.severity, Severity::Medium);
    }

    #[test]
    fn processing_after_harvest_is_expected() {
        assert!(after(EventType::Harvest, EventType::Processing).is_none());
    }

    #[test]
    fn unconstrained_predecessors() {
        assert!(after(EventType::Sale, EventType::Harvest).is_none());
        assert!(after(EventType::Inspection, EventType::Shipping).is_none());
        assert!(after(EventType::QualityCheck, EventType::Sale).is_none());
    }

    #[test]
    fn needs_history() {
        let c = event("e2", EventType::Sale, "2024-01-19T08:00:00Z", at("Brazil", "Santos"));
        assert!(analyze(&c, &[]).is_none());
    }
}
