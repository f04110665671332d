pub mod certification;
pub mod duplicate;
pub mod route;
pub mod sequence;
pub mod timing;
pub mod velocity;

use crate::events::{AnomalyAlert, SupplyChainEvent};

/// Rule checks that run before the scorer, in reporting order.
pub fn run_primary(event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Vec<AnomalyAlert> {
    [
        duplicate::analyze(event, prior),
        velocity::analyze(event, prior),
        sequence::analyze(event, prior),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Rule checks that run after the scorer, in reporting order.
pub fn run_secondary(event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Vec<AnomalyAlert> {
    let mut out = timing::analyze(event, prior);
    out.extend(route::analyze(event, prior));
    out.extend(certification::analyze(event, prior));
    out
}

/// Every rule check, no scorer. Workers with nothing to report are dropped.
pub fn run_all(event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> Vec<AnomalyAlert> {
    let mut out = run_primary(event, prior);
    out.extend(run_secondary(event, prior));
    out
}


#[cfg(test)]
mod tests {
    use super::fixtures::{at, event};
    use super::*;
    use crate::events::{EventType, RuleKind};

    #[test]
    fn rules_report_in_fixed_order() {
        // duplicate + sequence (primary), off-hours + route + missing cert (secondary)
        let prior = event("p", EventType::QualityCheck, "2024-01-18T22:40:00Z", at("Brazil", "Santos"));
        let prior2 = event("p2", EventType::Shipping, "2024-01-18T22:45:00Z", at("Brazil", "Santos"));
        let cur = event("c", EventType::QualityCheck, "2024-01-18T23:05:00Z", at("Kenya", "Santos"));
        let rules: Vec<String> = run_all(&cur, &[prior, prior2])
            .iter()
            .filter_map(|a| a.rule().map(str::to_string))
            .collect();
        assert_eq!(
            rules,
            vec![
                RuleKind::Duplicate.to_string(),
                RuleKind::UnexpectedSequence.to_string(),
                RuleKind::TimeInconsistency.to_string(),
                RuleKind::CountryRoute.to_string(),
                RuleKind::Certification.to_string(),
            ]
        );
    }

    #[test]
    fn clean_event_has_no_alerts() {
        let prior = event("p", EventType::Harvest, "2024-01-16T09:00:00Z", at("Ethiopia", "Yirgacheffe"));
        let cur = event("c", EventType::Processing, "2024-01-17T09:00:00Z", at("Ethiopia", "Hawassa"));
        assert!(run_all(&cur, &[prior]).is_empty());
    }
}
