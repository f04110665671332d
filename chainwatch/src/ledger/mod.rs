// chainwatch/src/ledger/mod.rs
//
// Ledger mirror seam.
//
// Custody events are appended to a consensus topic; a read-only mirror API
// serves them back in sequence order as base64 payloads, possibly split into
// chunks by the submitter. Everything network-facing stays behind the two
// collaborator traits below; the detector only ever sees decoded events.
//
//   LedgerMirror   raw topic messages (paged, filtered by sequence / time)
//   EventHistory   already-reassembled events for one batch

pub mod file;
pub mod history;
pub mod reassembly;
pub mod stream;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::events::SupplyChainEvent;

// ── Mirror wire types ─────────────────────────────────────────────────────────

/// Transport-level chunk marker set by the mirror itself. Payload-level
/// chunking (messageId / chunkIndex / totalChunks inside the JSON) is what
/// `reassembly` acts on; this is carried for completeness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub initial_transaction_id: String,
    pub number: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_info: Option<ChunkInfo>,
    pub consensus_timestamp: String,
    pub message: String, // base64
    #[serde(default)]
    pub payer_account_id: String,
    #[serde(default)]
    pub running_hash: String,
    #[serde(default)]
    pub running_hash_version: u32,
    pub sequence_number: u64,
    pub topic_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorLinks {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorResponse {
    pub messages: Vec<MirrorMessage>,
    #[serde(default)]
    pub links: MirrorLinks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Filters understood by the mirror's topic-messages endpoint.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub limit:               Option<usize>,
    pub order:               Order,
    pub sequence_number_gte: Option<u64>,
    pub timestamp_gte:       Option<String>, // consensus timestamp "secs.nanos"
    pub timestamp_lte:       Option<String>,
}

// ── Collaborator traits ───────────────────────────────────────────────────────

#[async_trait]
pub trait LedgerMirror: Send + Sync {
    async fn topic_messages(
        &self,
        topic_id: &str,
        query: &MessageQuery,
    ) -> Result<MirrorResponse, LedgerError>;

    /// Newest `limit` messages, newest first.
    async fn latest_messages(
        &self,
        topic_id: &str,
        limit: usize,
    ) -> Result<Vec<MirrorMessage>, LedgerError> {
        let query = MessageQuery { limit: Some(limit), order: Order::Desc, ..Default::default() };
        Ok(self.topic_messages(topic_id, &query).await?.messages)
    }

    /// Messages strictly after `sequence_number`, ascending.
    async fn messages_after_sequence(
        &self,
        topic_id: &str,
        sequence_number: u64,
        limit: usize,
    ) -> Result<Vec<MirrorMessage>, LedgerError> {
        let query = MessageQuery {
            limit: Some(limit),
            order: Order::Asc,
            sequence_number_gte: Some(sequence_number + 1),
            ..Default::default()
        };
        Ok(self.topic_messages(topic_id, &query).await?.messages)
    }

    /// Messages with `start <= consensus_timestamp <= end`, ascending.
    async fn messages_in_range(
        &self,
        topic_id: &str,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<MirrorMessage>, LedgerError> {
        let query = MessageQuery {
            limit: Some(limit),
            order: Order::Asc,
            timestamp_gte: Some(start.to_string()),
            timestamp_lte: Some(end.to_string()),
            ..Default::default()
        };
        Ok(self.topic_messages(topic_id, &query).await?.messages)
    }
}

#[async_trait]
pub trait EventHistory: Send + Sync {
    /// Previously recorded events of a batch, ascending by timestamp.
    async fn event_history(&self, batch_id: &str) -> Result<Vec<SupplyChainEvent>, LedgerError>;
}

// ── Consensus timestamps ──────────────────────────────────────────────────────
// Mirror timestamps are "seconds.nanoseconds" since the Unix epoch.

pub fn parse_consensus_timestamp(ts: &str) -> Result<DateTime<Utc>, LedgerError> {
    let bad = || LedgerError::Timestamp(ts.to_string());
    let (secs, nanos) = match ts.split_once('.') {
        Some((s, n)) => (s, n),
        None => (ts, "0"),
    };
    let secs: i64 = secs.parse().map_err(|_| bad())?;
    if nanos.is_empty() || nanos.len() > 9 || !nanos.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    // right-pad so "5" means 500_000_000 ns
    let nanos: u32 = format!("{:0<9}", nanos).parse().map_err(|_| bad())?;
    Utc.timestamp_opt(secs, nanos).single().ok_or_else(bad)
}

pub fn to_consensus_timestamp(dt: &DateTime<Utc>) -> String {
    format!("{}.{:09}", dt.timestamp(), dt.timestamp_subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consensus_timestamp_roundtrip() {
        let dt = parse_consensus_timestamp("1705305600.123456789").unwrap();
        assert_eq!(dt.timestamp(), 1_705_305_600);
        assert_eq!(dt.timestamp_subsec_nanos(), 123_456_789);
        assert_eq!(to_consensus_timestamp(&dt), "1705305600.123456789");
    }

    #[test]
    fn consensus_timestamp_short_fraction() {
        let dt = parse_consensus_timestamp("10.5").unwrap();
        assert_eq!(dt.timestamp_subsec_nanos(), 500_000_000);
        let whole = parse_consensus_timestamp("10").unwrap();
        assert_eq!(to_consensus_timestamp(&whole), "10.000000000");
    }

    #[test]
    fn consensus_timestamp_rejects_garbage() {
        assert!(parse_consensus_timestamp("abc.1").is_err());
        assert!(parse_consensus_timestamp("10.").is_err());
        assert!(parse_consensus_timestamp("10.1234567890").is_err());
        assert!(parse_consensus_timestamp("10.-1").is_err());
    }

    #[test]
    fn mirror_response_parses() {
        let body = r#"{
            "messages": [{
                "chunk_info": {"initial_transaction_id": "0.0.2@1.0", "number": 1, "total": 1},
                "consensus_timestamp": "1705305600.000000001",
                "message": "aGVsbG8=",
                "payer_account_id": "0.0.2",
                "running_hash": "abc",
                "running_hash_version": 3,
                "sequence_number": 7,
                "topic_id": "0.0.4242"
            }],
            "links": {"next": null}
        }"#;
        let resp: MirrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.messages.len(), 1);
        assert_eq!(resp.messages[0].sequence_number, 7);
        assert!(resp.links.next.is_none());
    }
}
