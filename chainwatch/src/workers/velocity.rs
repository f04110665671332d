// chainwatch/src/workers/velocity.rs
//
// Velocity worker: implied transport speed between the last prior event and
// this one. Anything above MAX_SPEED_KMH is faster than a cargo flight door
// to door. Needs coordinates on both sides and forward time.

use serde_json::json;

use crate::events::{AnomalyAlert, AnomalyType, RuleKind, Severity, SupplyChainEvent};
use crate::geo;

pub const MAX_SPEED_KMH: f64 = 1000.0;

pub fn analyze(event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Option<AnomalyAlert> {
    let last = prior.last()?;
    let km = geo::distance(&last.location, &event.location);
    let hours = (event.timestamp.timestamp_millis() - last.timestamp.timestamp_millis()) as f64
        / 3_600_000.0;
    if km <= 0.0 || hours <= 0.0 {
        return None;
    }

    let speed = km / hours;
    if speed <= MAX_SPEED_KMH {
        return None;
    }

    Some(
        AnomalyAlert::new(
            event,
            RuleKind::ImpossibleSpeed,
            AnomalyType::LocationJump,
            Severity::High,
            format!("Impossible transport speed: {:.2} km/h", speed),
            0.9,
        )
        .with_meta("speed_kmh", json!(speed))
        .with_meta("distance_km", json!(km))
        .with_meta("hours", json!(hours))
        .with_meta("from_event", json!(last.id)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, Location};
    use crate::workers::fixtures::event;

    fn yirgacheffe() -> Location {
        Location::new("Ethiopia", "Sidama", "Yirgacheffe").with_coordinates(6.1629, 38.2070)
    }

    fn hamburg() -> Location {
        Location::new("Germany", "Hamburg", "Hamburg").with_coordinates(53.5511, 9.9937)
    }

    #[test]
    fn ethiopia_to_germany_in_two_hours() {
        let prior = event("e1", EventType::Shipping, "2024-01-18T08:00:00Z", yirgacheffe());
        let cur = event("e2", EventType::Storage, "2024-01-18T10:00:00Z", hamburg());
        let alert = analyze(&cur, &[prior]).unwrap();
        assert_eq!(alert.anomaly_type, AnomalyType::LocationJump);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.score, 0.9);
        assert!(alert.description.starts_with("Impossible transport speed: "));
        assert!(alert.metadata["speed_kmh"].as_f64().unwrap() > 2500.0);
    }

    #[test]
    fn plausible_sea_freight() {
        let prior = event("e1", EventType::Shipping, "2024-01-01T08:00:00Z", yirgacheffe());
        let cur = event("e2", EventType::Storage, "2024-01-25T08:00:00Z", hamburg());
        assert!(analyze(&cur, &[prior]).is_none());
    }

    #[test]
    fn skipped_without_coordinates_or_forward_time() {
        let prior = event("e1", EventType::Shipping, "2024-01-18T08:00:00Z", Location::new("Ethiopia", "", ""));
        let cur = event("e2", EventType::Storage, "2024-01-18T08:10:00Z", hamburg());
        assert!(analyze(&cur, &[prior]).is_none());

        let prior = event("e1", EventType::Shipping, "2024-01-18T10:00:00Z", yirgacheffe());
        let cur = event("e2", EventType::Storage, "2024-01-18T10:00:00Z", hamburg());
        assert!(analyze(&cur, &[prior]).is_none());
        assert!(analyze(&cur, &[]).is_none());
    }
}
