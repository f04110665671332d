// chainwatch/src/state/batches.rs
//
// In-memory batch timelines.
// DashMap = sharded concurrent HashMap; each batch sits behind its own RwLock
// so replay tasks for different batches never contend.
//
// Serves as the EventHistory collaborator when events come from a local log
// instead of the ledger mirror.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::LedgerError;
use crate::events::SupplyChainEvent;
use crate::ledger::EventHistory;

// ── Per-batch timeline ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BatchTimeline {
    pub batch_id: String,
    pub events:   Vec<SupplyChainEvent>, // ascending by timestamp
}

impl BatchTimeline {
    pub fn new(batch_id: &str) -> Self {
        Self { batch_id: batch_id.to_string(), events: Vec::new() }
    }

    /// Insert keeping timestamp order; a re-submitted id replaces the old copy.
    /// Returns false on replacement.
    pub fn ingest(&mut self, event: &SupplyChainEvent) -> bool {
        let fresh = match self.events.iter().position(|e| e.id == event.id) {
            Some(i) => {
                self.events.remove(i);
                false
            }
            None => true,
        };
        // after any equal timestamps, so arrival order breaks ties
        let at = self.events.partition_point(|e| e.timestamp <= event.timestamp);
        self.events.insert(at, event.clone());
        fresh
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

pub struct BatchStore {
    batches: DashMap<String, Arc<RwLock<BatchTimeline>>>,

    pub total_events: AtomicU64,
}

impl BatchStore {
    pub fn new() -> Self {
        Self { batches: DashMap::new(), total_events: AtomicU64::new(0) }
    }

    pub fn ingest(&self, event: &SupplyChainEvent) {
        let timeline = self
            .batches
            .entry(event.batch_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(BatchTimeline::new(&event.batch_id))))
            .clone();

        if timeline.write().ingest(event) {
            self.total_events.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(event = %event.id, batch = %event.batch_id, "replaced re-submitted event");
        }
    }

    pub fn get_batch(&self, batch_id: &str) -> Option<Arc<RwLock<BatchTimeline>>> {
        self.batches.get(batch_id).map(|b| b.clone())
    }

    /// Snapshot of a batch's events, ascending by timestamp.
    pub fn events(&self, batch_id: &str) -> Vec<SupplyChainEvent> {
        self.get_batch(batch_id).map(|b| b.read().events.clone()).unwrap_or_default()
    }

    pub fn n_batches(&self) -> usize { self.batches.len() }
}

impl Default for BatchStore { fn default() -> Self { Self::new() } }

#[async_trait]
impl EventHistory for BatchStore {
    async fn event_history(&self, batch_id: &str) -> Result<Vec<SupplyChainEvent>, LedgerError> {
        Ok(self.events(batch_id))
    }
}
