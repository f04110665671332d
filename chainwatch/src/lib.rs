// chainwatch/src/lib.rs
//
// Chain-of-custody anomaly detection for supply-chain batches whose events
// live on an append-only ledger topic.
//
//   ledger     mirror seam, chunk reassembly, batch history, polling stream
//   features   10-element feature vector per event
//   workers    rule checks (duplicate, velocity, sequence, timing, route, certs)
//   engine     scorer seam + the orchestrating AnomalyEngine
//   state      in-memory batch timelines for local replay

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod features;
pub mod geo;
pub mod ledger;
pub mod state;
pub mod workers;

pub use config::EngineConfig;
pub use engine::{Analysis, AnomalyEngine, DetectionStatus};
pub use events::{AnomalyAlert, SupplyChainEvent};
pub use ledger::reassembly::process_messages;
