// chainwatch/src/workers/route.rs
//
// Country route worker.
//
// Looks at the countries of the last three prior events. Staying within them
// is fine. Entering a new country is fine when the move from the most recent
// country follows a known export route (either direction); otherwise the
// batch is flagged as having jumped somewhere unexpected.

use serde_json::json;

use crate::events::{AnomalyAlert, AnomalyType, RuleKind, Severity, SupplyChainEvent};

const RECENT: usize = 3;

// Producer → importing markets.
const TRADE_ROUTES: &[(&str, &[&str])] = &[
    ("Brazil",   &["USA", "Germany", "Netherlands", "Japan"]),
    ("Colombia", &["USA", "Germany", "Netherlands", "Japan"]),
    ("Ethiopia", &["USA", "Germany", "Italy", "Japan"]),
    ("Vietnam",  &["USA", "Germany", "Japan", "South Korea"]),
    ("China",    &["USA", "Germany", "Japan", "South Korea"]),
    ("India",    &["USA", "Germany", "UAE", "UK"]),
];

fn exports_to(from: &str, to: &str) -> bool {
    TRADE_ROUTES
        .iter()
        .any(|(origin, markets)| *origin == from && markets.contains(&to))
}

pub fn is_known_route(from: &str, to: &str) -> bool {
    from == to || exports_to(from, to) || exports_to(to, from)
}

pub fn analyze(event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Option<AnomalyAlert> {
    let recent = &prior[prior.len().saturating_sub(RECENT)..];
    let from = &recent.last()?.location.country;
    let to = &event.location.country;

    if recent.iter().any(|e| &e.location.country == to) || is_known_route(from, to) {
        return None;
    }

    Some(
        AnomalyAlert::new(
            event,
            RuleKind::CountryRoute,
            AnomalyType::LocationJump,
            Severity::Medium,
            format!("Unexpected country transition: {} → {}", from, to),
            0.7,
        )
        .with_meta("from_country", json!(from))
        .with_meta("to_country", json!(to)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::workers::fixtures::{at, event};

    fn hop(countries: &[&str], to: &str) -> Option<AnomalyAlert> {
        let prior: Vec<_> = countries
            .iter()
            .enumerate()
            .map(|(i, c)| event(&format!("p{i}"), EventType::Storage, "2024-01-10T10:00:00Z", at(c, "x")))
            .collect();
        let cur = event("cur", EventType::Storage, "2024-01-18T10:00:00Z", at(to, "y"));
        analyze(&cur, &prior)
    }

    #[test]
    fn known_routes_either_direction() {
        assert!(hop(&["Ethiopia"], "Germany").is_none());
        assert!(hop(&["Japan"], "Brazil").is_none());
        assert!(hop(&["India"], "UAE").is_none());
    }

    #[test]
    fn off_route_jump_fires() {
        let alert = hop(&["Brazil"], "Italy").unwrap();
        assert_eq!(alert.description, "Unexpected country transition: Brazil → Italy");
        assert_eq!(alert.anomaly_type, AnomalyType::LocationJump);
        assert_eq!(alert.severity, Severity::Medium);
    }

    #[test]
    fn returning_to_a_recent_country_is_fine() {
        assert!(hop(&["Italy", "Ethiopia", "Germany"], "Italy").is_none());
        // Italy fell out of the last three
        assert!(hop(&["Italy", "Ethiopia", "Germany", "Netherlands"], "Italy").is_some());
    }

    #[test]
    fn empty_history_is_silent() {
        assert!(hop(&[], "Narnia").is_none());
    }
}
