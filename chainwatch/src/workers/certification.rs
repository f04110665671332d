// chainwatch/src/workers/certification.rs
//
// Certification worker.
//   missing  : certification / quality_check event carrying no certs (medium, 0.6)
//   expired  : any cert whose expiry precedes the event; one alert
//              for however many there are                          (high, 0.8)

use serde_json::json;

use crate::events::{AnomalyAlert, AnomalyType, EventType, RuleKind, Severity, SupplyChainEvent};

pub fn analyze(event: &SupplyChainEvent, _prior: &[SupplyChainEvent]) -> Vec<AnomalyAlert> {
    let mut out = Vec::new();
    let certs = event.certifications();

    let expects_certs = matches!(event.event_type, EventType::Certification | EventType::QualityCheck);
    if expects_certs && certs.is_empty() {
        out.push(
            AnomalyAlert::new(
                event,
                RuleKind::Certification,
                AnomalyType::CertificationMismatch,
                Severity::Medium,
                "Expected certifications missing for certification event",
                0.6,
            )
            .with_meta("check", json!("missing")),
        );
    }

    let expired: Vec<&str> = certs
        .iter()
        .filter(|c| c.is_expired_at(&event.timestamp))
        .map(|c| c.certificate_id.as_str())
        .collect();
    if !expired.is_empty() {
        out.push(
            AnomalyAlert::new(
                event,
                RuleKind::Certification,
                AnomalyType::CertificationMismatch,
                Severity::High,
                format!("{} expired certification(s) detected", expired.len()),
                0.8,
            )
            .with_meta("check", json!("expired"))
            .with_meta("expired_count", json!(expired.len()))
            .with_meta("certificate_ids", json!(expired)),
        );
    }

    out
}
