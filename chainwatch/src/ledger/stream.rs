// chainwatch/src/ledger/stream.rs
//
// Polling stream over a ledger topic.
//
// Every `poll_interval` fetch up to `batch_size` messages after the highest
// sequence number seen, run them through a long-lived ChunkAssembler (chunks
// may straddle polls) and forward completed payloads on an mpsc channel.
// Fetch errors are logged and retried on the next tick; the loop ends when the
// receiver is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{ChunkCacheConfig, MirrorConfig};
use crate::error::LedgerError;
use crate::ledger::reassembly::ChunkAssembler;
use crate::ledger::LedgerMirror;

pub struct MessageStream<M: LedgerMirror> {
    mirror:        Arc<M>,
    topic_id:      String,
    poll_interval: Duration,
    batch_size:    usize,
    assembler:     ChunkAssembler,
    last_sequence: u64,
}

impl<M: LedgerMirror> MessageStream<M> {
    pub fn new(
        mirror: Arc<M>,
        topic_id: &str,
        cfg: &MirrorConfig,
        chunk_cache: &ChunkCacheConfig,
    ) -> Self {
        Self {
            mirror,
            topic_id:      topic_id.to_string(),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
            batch_size:    cfg.batch_size.max(1),
            assembler:     ChunkAssembler::new(chunk_cache),
            last_sequence: 0,
        }
    }

    /// Skip everything already on the topic; only new messages are streamed.
    pub async fn seek_latest(&mut self) -> Result<u64, LedgerError> {
        let latest = self.mirror.latest_messages(&self.topic_id, 1).await?;
        if let Some(m) = latest.first() {
            self.last_sequence = m.sequence_number;
        }
        Ok(self.last_sequence)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// One fetch + reassembly step. Returns completed payloads, possibly none.
    pub async fn poll_once(&mut self) -> Result<Vec<String>, LedgerError> {
        let mut messages = self
            .mirror
            .messages_after_sequence(&self.topic_id, self.last_sequence, self.batch_size)
            .await?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        messages.sort_by_key(|m| m.sequence_number);

        let payloads = self.assembler.process(&messages);
        if let Some(max) = messages.iter().map(|m| m.sequence_number).max() {
            self.last_sequence = self.last_sequence.max(max);
        }
        debug!(fetched = messages.len(), completed = payloads.len(),
               last_sequence = self.last_sequence, "mirror poll");
        Ok(payloads)
    }

    /// Poll until the receiver goes away.
    pub async fn run(mut self, tx: mpsc::Sender<Vec<String>>) {
        info!(topic = %self.topic_id, after = self.last_sequence,
              interval_ms = self.poll_interval.as_millis() as u64, "streaming topic");
        loop {
            match self.poll_once().await {
                // drain quickly while there is backlog
                Ok(payloads) if !payloads.is_empty() => {
                    if tx.send(payloads).await.is_err() { break; }
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => warn!("mirror poll failed: {}", e),
                Err(e) => {
                    warn!("mirror poll failed, stopping stream: {}", e);
                    break;
                }
            }
            if tx.is_closed() { break; }
            tokio::time::sleep(self.poll_interval).await;
        }
        info!(topic = %self.topic_id, "stream stopped");
    }
}

/// Stream messages on `topic_id` into `tx` until the receiver is dropped.
/// Unless `from_start` is set, only messages after the current tip are sent.
pub async fn poll_messages<M: LedgerMirror>(
    mirror: Arc<M>,
    topic_id: &str,
    cfg: &MirrorConfig,
    chunk_cache: &ChunkCacheConfig,
    from_start: bool,
    tx: mpsc::Sender<Vec<String>>,
) -> Result<(), LedgerError> {
    let mut stream = MessageStream::new(mirror, topic_id, cfg, chunk_cache);
    if !from_start {
        let tip = stream.seek_latest().await?;
        info!(topic = topic_id, sequence = tip, "starting at topic tip");
    }
    stream.run(tx).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::file::JsonlMirror;
    use crate::ledger::reassembly::{encode_payload, split_into_chunks};
    use crate::ledger::MirrorMessage;

    fn message(seq: u64, text: &str) -> MirrorMessage {
        MirrorMessage {
            chunk_info: None,
            consensus_timestamp: format!("1705305600.{:09}", seq),
            message: encode_payload(text),
            payer_account_id: String::new(),
            running_hash: String::new(),
            running_hash_version: 3,
            sequence_number: seq,
            topic_id: "0.0.9".into(),
        }
    }

    fn cfg(batch_size: usize) -> MirrorConfig {
        MirrorConfig { batch_size, poll_interval_ms: 10, ..Default::default() }
    }

    #[tokio::test]
    async fn chunks_straddling_polls_are_reassembled() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let mirror = Arc::new(JsonlMirror::new(f.path()));
        for (i, c) in split_into_chunks("m1", "hello chunked world", 6).iter().enumerate() {
            mirror.append(&message(i as u64 + 1, c)).await.unwrap();
        }
        mirror.append(&message(5, "tail")).await.unwrap();

        let mut stream = MessageStream::new(mirror, "0.0.9", &cfg(2), &ChunkCacheConfig::default());
        let mut got = Vec::new();
        for _ in 0..5 {
            got.extend(stream.poll_once().await.unwrap());
        }
        assert_eq!(got, vec!["hello chunked world".to_string(), "tail".into()]);
        assert_eq!(stream.last_sequence(), 5);
    }

    #[tokio::test]
    async fn seek_latest_skips_backlog() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let mirror = Arc::new(JsonlMirror::new(f.path()));
        mirror.append(&message(1, "old")).await.unwrap();
        mirror.append(&message(2, "old")).await.unwrap();

        let mut stream = MessageStream::new(Arc::clone(&mirror), "0.0.9", &cfg(10), &ChunkCacheConfig::default());
        assert_eq!(stream.seek_latest().await.unwrap(), 2);
        assert!(stream.poll_once().await.unwrap().is_empty());

        mirror.append(&message(3, "new")).await.unwrap();
        assert_eq!(stream.poll_once().await.unwrap(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn run_forwards_payloads_and_stops_when_receiver_drops() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let mirror = Arc::new(JsonlMirror::new(f.path()));
        mirror.append(&message(1, "first")).await.unwrap();

        let stream = MessageStream::new(mirror, "0.0.9", &cfg(10), &ChunkCacheConfig::default());
        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(stream.run(tx));

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch, vec!["first".to_string()]);
        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn poll_messages_honours_start_position() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let mirror = Arc::new(JsonlMirror::new(f.path()));
        mirror.append(&message(1, "backlog")).await.unwrap();

        // from the start: the backlog is delivered
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn({
            let mirror = Arc::clone(&mirror);
            async move {
                poll_messages(mirror, "0.0.9", &cfg(10), &ChunkCacheConfig::default(), true, tx).await
            }
        });
        assert_eq!(rx.recv().await.unwrap(), vec!["backlog".to_string()]);
        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();

        // from the tip: only what lands afterwards
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn({
            let mirror = Arc::clone(&mirror);
            async move {
                poll_messages(mirror, "0.0.9", &cfg(10), &ChunkCacheConfig::default(), false, tx).await
            }
        });
        let mut seq = 1;
        let got = loop {
            seq += 1;
            mirror.append(&message(seq, "fresh")).await.unwrap();
            if let Ok(Some(batch)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                break batch;
            }
        };
        assert!(!got.is_empty());
        assert!(got.iter().all(|p| p == "fresh"));
        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    }
}
