// chainwatch/src/ledger/file.rs
//
// File-backed ledger mirror.
//
// Reads a JSONL capture of mirror traffic: each line is either one
// MirrorMessage or a whole MirrorResponse page ({"messages": [...]}), as
// dumped from the mirror REST API. The file is re-read on every query so a
// capture that is still being appended to behaves like a live topic.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::LedgerError;
use crate::ledger::{
    parse_consensus_timestamp, LedgerMirror, MessageQuery, MirrorLinks, MirrorMessage,
    MirrorResponse, Order,
};

pub struct JsonlMirror {
    path: PathBuf,
}

impl JsonlMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Every message in the capture, in file order.
    pub async fn read_all(&self) -> Result<Vec<MirrorMessage>, LedgerError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut out = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() { continue; }
            if let Ok(m) = serde_json::from_str::<MirrorMessage>(line) {
                out.push(m);
                continue;
            }
            match serde_json::from_str::<MirrorResponse>(line) {
                Ok(page) => out.extend(page.messages),
                Err(e) => warn!(line = lineno + 1, "mirror capture parse error: {}", e),
            }
        }
        Ok(out)
    }

    /// Append one message to the capture.
    pub async fn append(&self, message: &MirrorMessage) -> Result<(), LedgerError> {
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        let line = serde_json::to_string(message)? + "\n";
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerMirror for JsonlMirror {
    async fn topic_messages(
        &self,
        topic_id: &str,
        query: &MessageQuery,
    ) -> Result<MirrorResponse, LedgerError> {
        let gte = query.timestamp_gte.as_deref().map(parse_consensus_timestamp).transpose()?;
        let lte = query.timestamp_lte.as_deref().map(parse_consensus_timestamp).transpose()?;

        let mut messages: Vec<MirrorMessage> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|m| m.topic_id == topic_id)
            .filter(|m| query.sequence_number_gte.map_or(true, |s| m.sequence_number >= s))
            .filter(|m| {
                if gte.is_none() && lte.is_none() {
                    return true;
                }
                match parse_consensus_timestamp(&m.consensus_timestamp) {
                    Ok(ts) => gte.map_or(true, |g| ts >= g) && lte.map_or(true, |l| ts <= l),
                    Err(_) => {
                        warn!(seq = m.sequence_number, "message has unparseable consensus timestamp");
                        false
                    }
                }
            })
            .collect();

        messages.sort_by_key(|m| m.sequence_number);
        if query.order == Order::Desc {
            messages.reverse();
        }

        let mut links = MirrorLinks::default();
        if let Some(limit) = query.limit {
            if messages.len() > limit {
                messages.truncate(limit);
                if let Some(last) = messages.last() {
                    let op = if query.order == Order::Desc { "lt" } else { "gt" };
                    links.next = Some(format!(
                        "/api/v1/topics/{}/messages?sequencenumber={}:{}",
                        topic_id, op, last.sequence_number
                    ));
                }
            }
        }

        Ok(MirrorResponse { messages, links })
    }
}
