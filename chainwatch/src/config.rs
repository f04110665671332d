// chainwatch/src/config.rs
//
// Engine configuration. Replaces process-global clients and thresholds with
// one explicit object handed to constructors; the caller owns its lifecycle.
//
// Precedence (lowest → highest):
//   defaults  →  JSON file (--config)  →  environment  →  CLI flags
//
// Environment:
//   ANOMALY_DETECTION_THRESHOLD   float in [0,1] (clamped)
//   ENABLE_AI_MONITORING          "true" / "false", feature-vector scorer on/off
//   LEDGER_TOPIC_ID               mirror topic holding the custody events
//   LEDGER_HISTORY_LIMIT          messages fetched per history lookup

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub threshold:       f64,
    pub scoring_enabled: bool,
    pub chunk_cache:     ChunkCacheConfig,
    pub mirror:          MirrorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold:       DEFAULT_THRESHOLD,
            scoring_enabled: true,
            chunk_cache:     ChunkCacheConfig::default(),
            mirror:          MirrorConfig::default(),
        }
    }
}

/// Bounds on partially received chunked messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkCacheConfig {
    pub capacity: usize, // pending message ids held at once
    pub ttl_secs: u64,   // idle incomplete messages are dropped after this (min 1s)
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self { capacity: 1024, ttl_secs: 3600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub topic_id:         Option<String>,
    pub history_limit:    usize,
    pub poll_interval_ms: u64,
    pub batch_size:       usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            topic_id:         None,
            history_limit:    1000,
            poll_interval_ms: 5000,
            batch_size:       10,
        }
    }
}

impl EngineConfig {
    /// Defaults, then the optional JSON file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                let cfg: Self = serde_json::from_str(&text)?;
                info!(path = %p.display(), "loaded config file");
                cfg
            }
            None => Self::default(),
        };
        cfg.apply_env_from(|key| std::env::var(key).ok())?;
        cfg.threshold = clamp_threshold(cfg.threshold);
        Ok(cfg)
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ANOMALY_DETECTION_THRESHOLD") {
            let t: f64 = v.trim().parse().map_err(|_| invalid("ANOMALY_DETECTION_THRESHOLD", &v))?;
            self.threshold = clamp_threshold(t);
        }
        if let Some(v) = lookup("ENABLE_AI_MONITORING") {
            self.scoring_enabled = match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => return Err(invalid("ENABLE_AI_MONITORING", &v)),
            };
        }
        if let Some(v) = lookup("LEDGER_TOPIC_ID") {
            if !v.trim().is_empty() {
                self.mirror.topic_id = Some(v.trim().to_string());
            }
        }
        if let Some(v) = lookup("LEDGER_HISTORY_LIMIT") {
            self.mirror.history_limit = v.trim().parse().map_err(|_| invalid("LEDGER_HISTORY_LIMIT", &v))?;
        }
        Ok(())
    }
}

/// Thresholds live in [0,1]; NaN falls back to the default.
pub fn clamp_threshold(t: f64) -> f64 {
    if t.is_nan() { DEFAULT_THRESHOLD } else { t.clamp(0.0, 1.0) }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() }
}
