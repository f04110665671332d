// chainwatch/src/events.rs
//
// Shared domain types flowing through chainwatch.
// Wire shape mirrors the JSON payloads written to the ledger topic:
// camelCase keys, snake_case enum values, RFC 3339 timestamps.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Opaque metadata attached to events and alerts. Only ever key-counted or
/// stringified; no schema is enforced.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Parse an ISO-8601 / RFC 3339 timestamp, keeping the recorded offset.
pub fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
}

// ── Enumerations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Harvest,
    Processing,
    Packaging,
    Shipping,
    QualityCheck,
    Storage,
    RetailArrival,
    Sale,
    Certification,
    Inspection,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Harvest       => "harvest",
            Self::Processing    => "processing",
            Self::Packaging     => "packaging",
            Self::Shipping      => "shipping",
            Self::QualityCheck  => "quality_check",
            Self::Storage       => "storage",
            Self::RetailArrival => "retail_arrival",
            Self::Sale          => "sale",
            Self::Certification => "certification",
            Self::Inspection    => "inspection",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantType {
    #[default]
    Farmer,
    Processor,
    Distributor,
    Retailer,
    Certifier,
    Inspector,
    Consumer,
}

impl std::fmt::Display for ParticipantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Farmer      => write!(f, "farmer"),
            Self::Processor   => write!(f, "processor"),
            Self::Distributor => write!(f, "distributor"),
            Self::Retailer    => write!(f, "retailer"),
            Self::Certifier   => write!(f, "certifier"),
            Self::Inspector   => write!(f, "inspector"),
            Self::Consumer    => write!(f, "consumer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationType {
    Organic,
    FairTrade,
    RainforestAlliance,
    Utz,
    BirdFriendly,
    DirectTrade,
    Kosher,
    Halal,
}

// ── Location ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

impl Location {
    pub fn new(country: &str, region: &str, city: &str) -> Self {
        Self {
            country: country.to_string(),
            region: region.to_string(),
            city: city.to_string(),
            address: None,
            coordinates: None,
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.coordinates = Some(Coordinates { latitude, longitude });
        self
    }
}

// ── Certifications ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certification {
    #[serde(rename = "type")]
    pub kind: CertificationType,
    pub issued_by: String,
    pub issued_date: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<FixedOffset>>,
    pub certificate_id: String,
    #[serde(default)]
    pub is_valid: bool,
}

impl Certification {
    /// A certification without an expiry date never expires.
    pub fn is_expired_at(&self, at: &DateTime<FixedOffset>) -> bool {
        self.expiry_date.map(|exp| exp < *at).unwrap_or(false)
    }
}

// ── Supply chain event ────────────────────────────────────────────────────────

/// One custody record for a batch. Immutable once written to the ledger;
/// `anomaly_score` / `is_anomaly` are filled in after detection runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyChainEvent {
    pub id: String,
    pub batch_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<FixedOffset>,
    pub location: Location,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub participant_type: ParticipantType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certifications: Option<Vec<Certification>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, alias = "hederaTransactionId", skip_serializing_if = "Option::is_none")]
    pub ledger_transaction_id: Option<String>,
    #[serde(default, alias = "hederaTopicId", skip_serializing_if = "Option::is_none")]
    pub ledger_topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_anomaly: Option<bool>,
}

impl SupplyChainEvent {
    pub fn new(
        id: &str,
        batch_id: &str,
        event_type: EventType,
        timestamp: DateTime<FixedOffset>,
        location: Location,
    ) -> Self {
        Self {
            id: id.to_string(),
            batch_id: batch_id.to_string(),
            event_type,
            timestamp,
            location,
            description: String::new(),
            participant_id: String::new(),
            participant_type: ParticipantType::default(),
            certifications: None,
            metadata: None,
            ledger_transaction_id: None,
            ledger_topic_id: None,
            sequence_number: None,
            previous_event_id: None,
            anomaly_score: None,
            is_anomaly: None,
        }
    }

    pub fn with_participant(mut self, participant_id: &str, kind: ParticipantType) -> Self {
        self.participant_id = participant_id.to_string();
        self.participant_type = kind;
        self
    }

    pub fn with_certifications(mut self, certs: Vec<Certification>) -> Self {
        self.certifications = Some(certs);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.to_string(), value);
        self
    }

    /// Certifications attached to the event; absent and empty are the same.
    pub fn certifications(&self) -> &[Certification] {
        self.certifications.as_deref().unwrap_or(&[])
    }

    pub fn metadata_len(&self) -> usize {
        self.metadata.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    /// Copy of the event carrying the detection verdict: highest alert score
    /// and whether anything fired.
    pub fn annotated(&self, alerts: &[AnomalyAlert]) -> Self {
        let mut out = self.clone();
        let top = alerts.iter().map(|a| a.score).fold(0.0f64, f64::max);
        out.anomaly_score = Some(top);
        out.is_anomaly = Some(!alerts.is_empty());
        out
    }
}

// ── Detection types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    TimeInconsistency,
    LocationJump,
    UnexpectedParticipant,
    CertificationMismatch,
    SuspiciousPattern,
    QualityDeviation,
    QuantityMismatch,
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeInconsistency     => write!(f, "time_inconsistency"),
            Self::LocationJump          => write!(f, "location_jump"),
            Self::UnexpectedParticipant => write!(f, "unexpected_participant"),
            Self::CertificationMismatch => write!(f, "certification_mismatch"),
            Self::SuspiciousPattern     => write!(f, "suspicious_pattern"),
            Self::QualityDeviation      => write!(f, "quality_deviation"),
            Self::QuantityMismatch      => write!(f, "quantity_mismatch"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Tiering used on the scorer path; rule alerts carry a fixed severity.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Critical
        } else if score >= 0.8 {
            Self::High
        } else if score >= 0.6 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low      => write!(f, "LOW"),
            Self::Medium   => write!(f, "MEDIUM"),
            Self::High     => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which check produced an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Duplicate,         // same type + city within an hour
    ImpossibleSpeed,   // > 1000 km/h between consecutive events
    UnexpectedSequence,
    Scorer,            // feature-vector model above threshold
    TimeInconsistency,
    CountryRoute,      // country change off the known trade routes
    Certification,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate          => write!(f, "duplicate"),
            Self::ImpossibleSpeed    => write!(f, "impossible_speed"),
            Self::UnexpectedSequence => write!(f, "unexpected_sequence"),
            Self::Scorer             => write!(f, "scorer"),
            Self::TimeInconsistency  => write!(f, "time_inconsistency"),
            Self::CountryRoute       => write!(f, "country_route"),
            Self::Certification      => write!(f, "certification"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyAlert {
    pub id: String,
    pub batch_id: String,
    pub event_id: String,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub score: f64,
    pub is_resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl AnomalyAlert {
    pub fn new(
        event: &SupplyChainEvent,
        rule: RuleKind,
        anomaly_type: AnomalyType,
        severity: Severity,
        description: impl Into<String>,
        score: f64,
    ) -> Self {
        let detected_at = Utc::now();
        let mut metadata = Metadata::new();
        metadata.insert("rule".into(), serde_json::json!(rule.to_string()));
        Self {
            id: alert_id(&event.id, rule, &detected_at),
            batch_id: event.batch_id.clone(),
            event_id: event.id.clone(),
            anomaly_type,
            severity,
            description: description.into(),
            detected_at,
            score,
            is_resolved: false,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            metadata,
        }
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Name of the check that raised this alert.
    pub fn rule(&self) -> Option<&str> {
        self.metadata.get("rule").and_then(|v| v.as_str())
    }

    pub fn resolve(&mut self, resolved_by: &str, notes: Option<&str>) {
        self.is_resolved = true;
        self.resolved_by = Some(resolved_by.to_string());
        self.resolved_at = Some(Utc::now());
        self.resolution_notes = notes.map(str::to_string);
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `anomaly-{event}-{sha256[:6]}`, unique even when several checks fire on
/// the same event within one millisecond.
fn alert_id(event_id: &str, rule: RuleKind, at: &DateTime<Utc>) -> String {
    use sha2::{Digest, Sha256};
    let mut h = Sha256::new();
    h.update(b"cw_alert:");
    h.update(event_id.as_bytes());
    h.update(b":");
    h.update(rule.to_string().as_bytes());
    h.update(at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    format!("anomaly-{}-{}", event_id, hex::encode(&h.finalize()[..6]))
}
