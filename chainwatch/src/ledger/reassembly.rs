// chainwatch/src/ledger/reassembly.rs
//
// Payload decoding + chunk reassembly for ledger mirror messages.
//
// Payloads larger than the topic's message size limit are split by the
// submitter into chunk envelopes, one per ledger message:
//
//   {"messageId": "m1", "chunkIndex": 0, "totalChunks": 3, "data": "<base64>"}
//
// We buffer envelopes per messageId until every index 0..totalChunks is
// present, then emit the concatenated payload and drop the buffer.
// Anything that is not a chunk envelope is passed through as a complete
// message, in arrival order.
//
// Pending state is an LRU keyed by messageId: every accepted chunk touches its
// message, incomplete messages idle for `ttl_secs` expire, and when `capacity`
// ids are pending the least recently touched is evicted to admit a new one.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ChunkCacheConfig;
use crate::ledger::MirrorMessage;

/// Accepts padded and unpadded input.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Submit-side chunk envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEnvelope {
    pub message_id:   String,
    pub chunk_index:  u32,
    pub total_chunks: u32,
    pub data:         String, // base64
}

// ── Payload codec ─────────────────────────────────────────────────────────────

fn decode_bytes(raw: &str) -> Option<Vec<u8>> {
    LENIENT.decode(raw.trim()).ok()
}

/// Base64-decode a mirror payload. Undecodable input is taken to be
/// already-decoded text and returned unchanged.
pub fn decode_payload(raw: &str) -> String {
    match decode_bytes(raw) {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => {
            debug!("payload is not base64, passing through raw");
            raw.to_string()
        }
    }
}

pub fn encode_payload(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Split `payload` into chunk envelopes of at most `chunk_size` bytes of
/// payload each. Returned strings are envelope JSON, not yet base64-wrapped.
pub fn split_into_chunks(message_id: &str, payload: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let pieces: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.as_bytes().chunks(chunk_size).collect()
    };
    let total = pieces.len() as u32;

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let env = ChunkEnvelope {
                message_id:   message_id.to_string(),
                chunk_index:  i as u32,
                total_chunks: total,
                data:         STANDARD.encode(piece),
            };
            serde_json::to_string(&env).unwrap_or_default()
        })
        .collect()
}

// ── Envelope classification ───────────────────────────────────────────────────

enum Envelope<'a> {
    Plain,
    Malformed(&'static str),
    Chunk { id: String, index: u32, total: u32, data: &'a str },
}

fn classify(value: &Value) -> Envelope<'_> {
    let Some(obj) = value.as_object() else { return Envelope::Plain };
    let (Some(index), Some(total)) = (obj.get("chunkIndex"), obj.get("totalChunks")) else {
        return Envelope::Plain;
    };

    let id = match obj.get("messageId") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Envelope::Malformed("missing messageId"),
    };
    let Some(index) = index.as_u64().and_then(|v| u32::try_from(v).ok()) else {
        return Envelope::Malformed("chunkIndex is not a non-negative integer");
    };
    let Some(total) = total.as_u64().and_then(|v| u32::try_from(v).ok()) else {
        return Envelope::Malformed("totalChunks is not a non-negative integer");
    };
    if total == 0 {
        return Envelope::Malformed("totalChunks is zero");
    }
    if index >= total {
        return Envelope::Malformed("chunkIndex out of range");
    }

    let data = obj.get("data").and_then(Value::as_str).unwrap_or("");
    Envelope::Chunk { id, index, total, data }
}

// ── Assembler ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PendingMessage {
    chunks:    BTreeMap<u32, String>,
    total:     u32,
    last_seen: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ChunkAssembler {
    pending: LruCache<String, PendingMessage>,
    ttl:     Duration,
    evicted: u64,
}

impl ChunkAssembler {
    pub fn new(cfg: &ChunkCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(cfg.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            pending: LruCache::new(capacity),
            ttl:     Duration::seconds(cfg.ttl_secs.clamp(1, MAX_TTL_SECS) as i64),
            evicted: 0,
        }
    }

    /// Feed one raw (base64) payload. Returns a complete message if this
    /// payload is one, or completes one.
    pub fn feed(&mut self, raw: &str) -> Option<String> {
        self.feed_at(raw, Utc::now())
    }

    pub fn feed_at(&mut self, raw: &str, now: DateTime<Utc>) -> Option<String> {
        self.expire(now);

        let decoded = decode_payload(raw);
        let Ok(value) = serde_json::from_str::<Value>(&decoded) else {
            return Some(decoded);
        };

        match classify(&value) {
            Envelope::Plain => Some(decoded),
            Envelope::Malformed(reason) => {
                warn!(reason, "malformed chunk envelope, treating as complete message");
                Some(decoded)
            }
            Envelope::Chunk { id, index, total, data } => {
                let data = data.to_string();
                self.accept(id, index, total, data, now)
            }
        }
    }

    /// Process a batch in order, returning every message completed by it.
    pub fn process(&mut self, messages: &[MirrorMessage]) -> Vec<String> {
        let now = Utc::now();
        messages.iter().filter_map(|m| self.feed_at(&m.message, now)).collect()
    }

    /// Message ids still waiting for chunks.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Incomplete messages dropped by TTL or capacity so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn accept(
        &mut self,
        id: String,
        index: u32,
        total: u32,
        data: String,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if !self.pending.contains(&id) {
            if self.pending.len() >= self.pending.cap().get() {
                if let Some((old, p)) = self.pending.pop_lru() {
                    warn!(message_id = %old, have = p.chunks.len(), total = p.total,
                          "chunk cache full, evicting least recently used message");
                    self.evicted += 1;
                }
            }
            self.pending.put(id.clone(), PendingMessage {
                chunks:    BTreeMap::new(),
                total,
                last_seen: now,
            });
        }

        // get_mut promotes the entry to most recently used
        let entry = self.pending.get_mut(&id)?;
        entry.last_seen = now;

        if entry.total != total {
            warn!(message_id = %id, was = entry.total, now = total, "totalChunks changed mid-message");
            entry.total = total;
            entry.chunks.retain(|&i, _| i < total);
        }
        entry.chunks.insert(index, data);

        if entry.chunks.len() < entry.total as usize {
            return None;
        }

        let done = self.pending.pop(&id)?;
        let mut bytes = Vec::new();
        for i in 0..done.total {
            if let Some(chunk) = done.chunks.get(&i) {
                match decode_bytes(chunk) {
                    Some(b) => bytes.extend_from_slice(&b),
                    None => bytes.extend_from_slice(chunk.as_bytes()),
                }
            }
        }
        debug!(message_id = %id, chunks = done.total, "reassembled chunked message");
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// LRU order is last-touched order, so stale messages sit at the tail.
    fn expire(&mut self, now: DateTime<Utc>) {
        loop {
            let stale = match self.pending.peek_lru() {
                Some((_, p)) => now - p.last_seen >= self.ttl,
                None => false,
            };
            if !stale {
                break;
            }
            if let Some((id, p)) = self.pending.pop_lru() {
                warn!(message_id = %id, have = p.chunks.len(), total = p.total,
                      "dropping incomplete chunked message (ttl)");
                self.evicted += 1;
            }
        }
    }
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new(&ChunkCacheConfig::default())
    }
}

/// Decode and reassemble a batch of mirror messages with fresh state.
/// Callers supply messages in the order they want results (normally
/// ascending sequence number).
pub fn process_messages(messages: &[MirrorMessage]) -> Vec<String> {
    ChunkAssembler::default().process(messages)
}
