// chainwatch/src/ledger/history.rs
//
// Batch history reconstructed from the ledger mirror.
//
//   latest N topic messages → ascending sequence → reassemble chunks
//     → parse events → keep this batch → sort by event timestamp
//
// Date-range queries take the same path, selecting messages by consensus
// timestamp instead of recency.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{ChunkCacheConfig, MirrorConfig};
use crate::error::LedgerError;
use crate::events::SupplyChainEvent;
use crate::ledger::reassembly::ChunkAssembler;
use crate::ledger::{to_consensus_timestamp, EventHistory, LedgerMirror, MirrorMessage};

pub struct MirrorHistory<M: LedgerMirror> {
    mirror:        Arc<M>,
    topic_id:      String,
    history_limit: usize,
    chunk_cache:   ChunkCacheConfig,
}

impl<M: LedgerMirror> MirrorHistory<M> {
    pub fn new(mirror: Arc<M>, topic_id: &str) -> Self {
        Self {
            mirror,
            topic_id:      topic_id.to_string(),
            history_limit: MirrorConfig::default().history_limit,
            chunk_cache:   ChunkCacheConfig::default(),
        }
    }

    /// Build from config; fails when no topic is configured.
    pub fn from_config(
        mirror: Arc<M>,
        cfg: &MirrorConfig,
        chunk_cache: &ChunkCacheConfig,
    ) -> Result<Self, LedgerError> {
        let topic = cfg.topic_id.as_deref().ok_or(LedgerError::NoTopic)?;
        Ok(Self {
            mirror,
            topic_id:      topic.to_string(),
            history_limit: cfg.history_limit,
            chunk_cache:   chunk_cache.clone(),
        })
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    /// Every event on the topic within the history window, in ledger order.
    pub async fn all_events(&self) -> Result<Vec<SupplyChainEvent>, LedgerError> {
        let messages = self.mirror.latest_messages(&self.topic_id, self.history_limit).await?;
        Ok(self.reassemble(messages))
    }

    /// Events recorded on the ledger between `start` and `end` (inclusive,
    /// consensus time), optionally narrowed to one batch, ascending by event
    /// timestamp.
    pub async fn events_in_range(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        batch_id: Option<&str>,
    ) -> Result<Vec<SupplyChainEvent>, LedgerError> {
        let messages = self
            .mirror
            .messages_in_range(
                &self.topic_id,
                &to_consensus_timestamp(start),
                &to_consensus_timestamp(end),
                self.history_limit,
            )
            .await?;

        let mut events = self.reassemble(messages);
        if let Some(batch) = batch_id {
            events.retain(|e| e.batch_id == batch);
        }
        events.sort_by_key(|e| e.timestamp);
        debug!(n = events.len(), batch = ?batch_id, topic = %self.topic_id, "loaded events in range");
        Ok(events)
    }

    fn reassemble(&self, mut messages: Vec<MirrorMessage>) -> Vec<SupplyChainEvent> {
        messages.sort_by_key(|m| m.sequence_number);

        let mut assembler = ChunkAssembler::new(&self.chunk_cache);
        let payloads = assembler.process(&messages);
        if assembler.pending() > 0 {
            debug!(pending = assembler.pending(), "message window ends mid-message");
        }
        parse_events(&payloads)
    }
}

/// Parse reassembled payloads as events, skipping anything that is not one.
pub fn parse_events(payloads: &[String]) -> Vec<SupplyChainEvent> {
    payloads
        .iter()
        .filter_map(|p| match serde_json::from_str::<SupplyChainEvent>(p) {
            Ok(ev) => Some(ev),
            Err(e) => {
                debug!("skipping non-event payload: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl<M: LedgerMirror> EventHistory for MirrorHistory<M> {
    async fn event_history(&self, batch_id: &str) -> Result<Vec<SupplyChainEvent>, LedgerError> {
        let mut events: Vec<SupplyChainEvent> = self
            .all_events()
            .await?
            .into_iter()
            .filter(|e| e.batch_id == batch_id)
            .collect();
        events.sort_by_key(|e| e.timestamp);
        info!(batch = batch_id, n = events.len(), topic = %self.topic_id, "loaded batch history");
        Ok(events)
    }
}

/// Prior events for `event`, ready for the detector: the batch history minus
/// the event itself, ascending by time. A failed lookup degrades to an empty
/// history, which only narrows the checks that can fire.
pub async fn prior_events(
    history: &dyn EventHistory,
    event: &SupplyChainEvent,
) -> Vec<SupplyChainEvent> {
    match history.event_history(&event.batch_id).await {
        Ok(mut events) => {
            events.retain(|e| e.id != event.id);
            events.sort_by_key(|e| e.timestamp);
            events
        }
        Err(e) => {
            warn!(batch = %event.batch_id, "could not fetch prior events: {}", e);
            Vec::new()
        }
    }
}
