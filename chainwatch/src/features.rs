// chainwatch/src/features.rs
//
// Feature extraction for the scorer path.
//
// Ten features, each roughly in [0, 1], in a fixed order the scorer weights
// depend on:
//
//   0  hour of day / 24              (event's own offset)
//   1  weekday, Sunday = 0 / 7
//   2  event type index / 8          (−1 when not in EVENT_TYPES)
//   3  participant type index / 5    (−1 when not in PARTICIPANT_TYPES)
//   4  certification count / 10
//   5  hours since last prior / 168, capped at 1
//   6  km from last prior / 10000, capped at 1
//   7  prior count / 100, capped at 1
//   8  first char code of country / 255
//   9  metadata key count / 10, capped at 1

use chrono::{Datelike, Timelike};

use crate::events::{EventType, ParticipantType, SupplyChainEvent};
use crate::geo;

pub const FEATURE_COUNT: usize = 10;

pub const EVENT_TYPES: [EventType; 8] = [
    EventType::Harvest,
    EventType::Processing,
    EventType::Packaging,
    EventType::Shipping,
    EventType::QualityCheck,
    EventType::Storage,
    EventType::RetailArrival,
    EventType::Sale,
];

pub const PARTICIPANT_TYPES: [ParticipantType; 5] = [
    ParticipantType::Farmer,
    ParticipantType::Processor,
    ParticipantType::Distributor,
    ParticipantType::Retailer,
    ParticipantType::Certifier,
];

const HOURS_PER_WEEK: f64 = 168.0;
const DISTANCE_SCALE_KM: f64 = 10_000.0;
const HISTORY_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn hour(&self) -> f64            { self.0[0] }
    pub fn time_gap(&self) -> f64        { self.0[5] }
    pub fn distance(&self) -> f64        { self.0[6] }
}

fn table_index<T: PartialEq>(table: &[T], value: &T) -> f64 {
    table.iter().position(|t| t == value).map(|i| i as f64).unwrap_or(-1.0)
}

pub fn extract_features(event: &SupplyChainEvent, prior: &[SupplyChainEvent]) -> FeatureVector {
    let ts = &event.timestamp;

    let (time_gap, distance) = match prior.last() {
        Some(last) => {
            let hours = (ts.timestamp_millis() - last.timestamp.timestamp_millis()) as f64 / 3_600_000.0;
            let km = geo::distance(&event.location, &last.location);
            ((hours / HOURS_PER_WEEK).min(1.0), (km / DISTANCE_SCALE_KM).min(1.0))
        }
        None => (0.0, 0.0),
    };

    let country = event.location.country.chars().next().map(|c| c as u32 as f64).unwrap_or(0.0);

    FeatureVector([
        ts.hour() as f64 / 24.0,
        ts.weekday().num_days_from_sunday() as f64 / 7.0,
        table_index(&EVENT_TYPES, &event.event_type) / EVENT_TYPES.len() as f64,
        table_index(&PARTICIPANT_TYPES, &event.participant_type) / PARTICIPANT_TYPES.len() as f64,
        event.certifications().len() as f64 / 10.0,
        time_gap,
        distance,
        (prior.len() as f64 / HISTORY_SCALE).min(1.0),
        country / 255.0,
        (event.metadata_len() as f64 / 10.0).min(1.0),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{parse_timestamp, Location};

    fn ev(ty: EventType, ts: &str, loc: Location) -> SupplyChainEvent {
        SupplyChainEvent::new("e", "B", ty, parse_timestamp(ts).unwrap(), loc)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn standalone_event() {
        let e = ev(EventType::QualityCheck, "2024-01-18T12:00:00Z", Location::new("Ethiopia", "", ""))
            .with_participant("p", ParticipantType::Processor)
            .with_metadata("k", serde_json::json!(1));
        let f = extract_features(&e, &[]).0;
        assert!(approx(f[0], 0.5));
        assert!(approx(f[1], 4.0 / 7.0)); // Thursday
        assert!(approx(f[2], 4.0 / 8.0));
        assert!(approx(f[3], 1.0 / 5.0));
        assert!(approx(f[4], 0.0));
        assert!(approx(f[5], 0.0));
        assert!(approx(f[6], 0.0));
        assert!(approx(f[7], 0.0));
        assert!(approx(f[8], 'E' as u32 as f64 / 255.0));
        assert!(approx(f[9], 0.1));
    }

    #[test]
    fn gap_and_distance_are_capped() {
        let prior = ev(EventType::Harvest, "2024-01-01T00:00:00Z",
                       Location::new("Brazil", "", "").with_coordinates(-23.0, -46.0));
        let e = ev(EventType::Shipping, "2024-02-01T00:00:00Z",
                   Location::new("Japan", "", "").with_coordinates(35.7, 139.7));
        let f = extract_features(&e, &[prior]);
        assert!(approx(f.time_gap(), 1.0));
        assert!(approx(f.distance(), 1.0));
        assert!(approx(f.0[7], 0.01));
    }

    #[test]
    fn unlisted_types_encode_negative() {
        let e = ev(EventType::Inspection, "2024-01-18T12:00:00Z", Location::new("", "", ""))
            .with_participant("p", ParticipantType::Consumer);
        let f = extract_features(&e, &[]).0;
        assert!(approx(f[2], -1.0 / 8.0));
        assert!(approx(f[3], -1.0 / 5.0));
        assert!(approx(f[8], 0.0));
    }

    #[test]
    fn hour_uses_recorded_offset() {
        let e = ev(EventType::Harvest, "2024-01-18T23:00:00-05:00", Location::new("Colombia", "", ""));
        let f = extract_features(&e, &[]);
        assert!(approx(f.hour(), 23.0 / 24.0));
    }
}
