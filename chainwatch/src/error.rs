// chainwatch/src/error.rs
//
// Library error taxonomy. The detector itself never surfaces these to its
// caller (it fails open); they flow through the ledger, config and scorer seams.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mirror query failed: {0}")]
    Query(String),

    #[error("invalid consensus timestamp: {0}")]
    Timestamp(String),

    #[error("no topic configured")]
    NoTopic,
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("scorer produced a non-finite score: {0}")]
    NonFinite(f64),

    #[error("scorer expected {expected} features, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("scorer unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl LedgerError {
    /// Errors that a later poll may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Query(_))
    }
}
