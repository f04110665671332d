// chainwatch/src/main.rs
//
// chainwatch: custody-event anomaly detection over a ledger mirror capture.
//
// Four operational modes:
//   replay      run an event log (one SupplyChainEvent per line) through the
//               engine, batch by batch, in timestamp order
//   reassemble  decode + reassemble a mirror capture and print the payloads
//   history     rebuild one batch's timeline from a mirror capture and show
//               the alerts each event raises against its predecessors
//   watch       poll a mirror capture that is still being written to and
//               analyze events as they land
//
// Usage:
//   chainwatch --mode replay --path events.jsonl
//   chainwatch --mode reassemble --path mirror.jsonl --topic 0.0.4242
//   chainwatch --mode history --path mirror.jsonl --topic 0.0.4242 --batch BATCH-001
//   chainwatch --mode watch --path mirror.jsonl --topic 0.0.4242 --threshold 0.6

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chainwatch::config::{EngineConfig, MirrorConfig};
use chainwatch::error::LedgerError;
use chainwatch::events::{AnomalyAlert, Severity, SupplyChainEvent};
use chainwatch::ledger::file::JsonlMirror;
use chainwatch::ledger::history::{parse_events, MirrorHistory};
use chainwatch::ledger::reassembly::ChunkAssembler;
use chainwatch::ledger::stream::poll_messages;
use chainwatch::ledger::EventHistory;
use chainwatch::state::batches::BatchStore;
use chainwatch::{AnomalyEngine, DetectionStatus};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "chainwatch",
    about   = "Supply-chain custody anomaly detection over a ledger mirror",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "replay")]
    mode: Mode,

    #[arg(long, default_value = "events.jsonl",
          help = "Event log (replay) or mirror capture (reassemble/history/watch)")]
    path: PathBuf,

    #[arg(long, help = "Ledger topic id (overrides config / LEDGER_TOPIC_ID)")]
    topic: Option<String>,

    #[arg(long, help = "Batch id (history mode)")]
    batch: Option<String>,

    #[arg(long, help = "JSON config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Scorer alert threshold in [0,1]")]
    threshold: Option<f64>,

    #[arg(long, help = "Disable the feature-vector scorer")]
    no_scorer: bool,

    #[arg(long, help = "Watch mode: also process messages already in the capture")]
    from_start: bool,

    #[arg(long, help = "Print alerts as JSONL instead of the terminal view")]
    jsonl: bool,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Replay,      // event log → engine
    Reassemble,  // mirror capture → payloads
    History,     // mirror capture → one batch timeline
    Watch,       // poll a growing mirror capture
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

struct Pipeline {
    store:  BatchStore,
    engine: AnomalyEngine,
    jsonl:  bool,
    alerts: std::sync::atomic::AtomicU64,
}

impl Pipeline {
    fn new(engine: AnomalyEngine, jsonl: bool) -> Self {
        Self {
            store:  BatchStore::new(),
            engine,
            jsonl,
            alerts: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Analyze against what the store already holds for the batch, then record.
    fn process(&self, event: SupplyChainEvent) {
        let mut prior = self.store.events(&event.batch_id);
        prior.retain(|e| e.id != event.id);

        let analysis = self.engine.analyze_with_status(&event, &prior);
        if analysis.status != DetectionStatus::Complete {
            warn!(event = %event.id, status = ?analysis.status, "detection incomplete");
        }
        self.emit(&event, &analysis.alerts);
        self.store.ingest(&event.annotated(&analysis.alerts));
    }

    fn emit(&self, event: &SupplyChainEvent, alerts: &[AnomalyAlert]) {
        self.alerts.fetch_add(alerts.len() as u64, std::sync::atomic::Ordering::Relaxed);
        for alert in alerts {
            if self.jsonl {
                println!("{}", alert.to_jsonl());
            } else {
                print_alert(event, alert);
            }
        }
    }

    fn print_stats(&self, start: Instant) {
        let events = self.store.total_events.load(std::sync::atomic::Ordering::Relaxed);
        let alerts = self.alerts.load(std::sync::atomic::Ordering::Relaxed);
        eprintln!(
            "\n\x1b[1m── stats  elapsed={:.2}s  events={}  batches={}  alerts={} ──\x1b[0m",
            start.elapsed().as_secs_f64(), events, self.store.n_batches(), alerts
        );
    }
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_alert(event: &SupplyChainEvent, alert: &AnomalyAlert) {
    let color = match alert.severity {
        Severity::Critical => "\x1b[91;1m",
        Severity::High     => "\x1b[93;1m",
        Severity::Medium   => "\x1b[96m",
        Severity::Low      => "\x1b[92m",
    };
    let reset = "\x1b[0m";

    println!("\n{}{} {}{}", color, alert.severity, alert.anomaly_type, reset);
    println!("  Batch   : {}", alert.batch_id);
    println!("  Event   : {} ({} @ {}, {})", event.id, event.event_type,
             event.location.city, event.location.country);
    println!("  Score   : {}{:.3}{}", color, alert.score, reset);
    println!("  Detail  : {}", alert.description);
    if let Some(rule) = alert.rule() {
        println!("  Rule    : \x1b[90m{}{}", rule, reset);
    }
}

fn print_timeline_entry(idx: usize, event: &SupplyChainEvent, n_alerts: usize) {
    let marker = if n_alerts == 0 { "\x1b[92m●\x1b[0m" } else { "\x1b[91m●\x1b[0m" };
    println!(
        "{} {:>3}  {}  {:<15} {}, {}  [{}]",
        marker, idx + 1, event.timestamp.to_rfc3339(), event.event_type.as_str(),
        event.location.city, event.location.country, event.participant_id
    );
}

// ── Event sources ─────────────────────────────────────────────────────────────

async fn read_event_log(path: &Path) -> Result<Vec<SupplyChainEvent>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut events = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() { continue; }
        match serde_json::from_str::<SupplyChainEvent>(line) {
            Ok(ev) => events.push(ev),
            Err(e) => warn!(line = lineno + 1, "event parse error: {}", e),
        }
    }
    // stable: equal timestamps keep log order
    events.sort_by_key(|e| e.timestamp);
    Ok(events)
}

fn topic_or_config(cli: &Cli, cfg: &EngineConfig) -> Result<String> {
    cli.topic
        .clone()
        .or_else(|| cfg.mirror.topic_id.clone())
        .ok_or_else(|| LedgerError::NoTopic.into())
}

/// Mirror config with the --topic override applied.
fn mirror_config(cli: &Cli, cfg: &EngineConfig) -> MirrorConfig {
    let mut mirror = cfg.mirror.clone();
    if let Some(topic) = &cli.topic {
        mirror.topic_id = Some(topic.clone());
    }
    mirror
}

// ── Modes ─────────────────────────────────────────────────────────────────────

async fn run_replay(cli: &Cli, pipeline: &Pipeline) -> Result<()> {
    let events = read_event_log(&cli.path).await?;
    info!(n = events.len(), path = %cli.path.display(), "replaying event log");
    for event in events {
        pipeline.process(event);
    }
    Ok(())
}

async fn run_reassemble(cli: &Cli, cfg: &EngineConfig) -> Result<()> {
    let mirror = JsonlMirror::new(&cli.path);
    let mut messages = mirror.read_all().await?;
    if let Some(topic) = cli.topic.clone().or_else(|| cfg.mirror.topic_id.clone()) {
        messages.retain(|m| m.topic_id == topic);
    }
    messages.sort_by_key(|m| m.sequence_number);

    let mut assembler = ChunkAssembler::new(&cfg.chunk_cache);
    let payloads = assembler.process(&messages);
    if assembler.pending() > 0 {
        warn!(pending = assembler.pending(), evicted = assembler.evicted(),
              "capture ends with incomplete chunked messages");
    }
    info!(messages = messages.len(), payloads = payloads.len(), "reassembled capture");
    for p in payloads {
        println!("{}", p);
    }
    Ok(())
}

async fn run_history(cli: &Cli, cfg: &EngineConfig, engine: &AnomalyEngine) -> Result<()> {
    let batch = cli.batch.as_deref().context("--batch is required in history mode")?;

    let mirror = Arc::new(JsonlMirror::new(&cli.path));
    let history = MirrorHistory::from_config(mirror, &mirror_config(cli, cfg), &cfg.chunk_cache)?;
    let events = history.event_history(batch).await?;
    if events.is_empty() {
        println!("no events for batch {} on topic {}", batch, history.topic_id());
        return Ok(());
    }

    println!("\x1b[1m{}\x1b[0m  ({} events, topic {})\n", batch, events.len(), history.topic_id());
    let mut total = 0;
    for (i, event) in events.iter().enumerate() {
        let alerts = engine.analyze(event, &events[..i]);
        print_timeline_entry(i, event, alerts.len());
        for alert in &alerts {
            if cli.jsonl {
                println!("{}", alert.to_jsonl());
            } else {
                println!("        \x1b[90m{} {}: {}\x1b[0m", alert.severity, alert.anomaly_type, alert.description);
            }
        }
        total += alerts.len();
    }
    println!("\n{} alert(s)", total);
    Ok(())
}

async fn run_watch(cli: &Cli, cfg: &EngineConfig, pipeline: &Pipeline) -> Result<()> {
    let topic = topic_or_config(cli, cfg)?;
    let mirror = Arc::new(JsonlMirror::new(&cli.path));

    let (tx, mut rx) = mpsc::channel::<Vec<String>>(256);
    let poller = tokio::spawn({
        let topic = topic.clone();
        let mirror_cfg = cfg.mirror.clone();
        let chunk_cache = cfg.chunk_cache.clone();
        let from_start = cli.from_start;
        async move {
            poll_messages(mirror, &topic, &mirror_cfg, &chunk_cache, from_start, tx).await
        }
    });

    println!("  Watching \x1b[96m{}\x1b[0m on {}  |  Ctrl+C to stop.\n", topic, cli.path.display());
    while let Some(payloads) = rx.recv().await {
        for event in parse_events(&payloads) {
            pipeline.process(event);
        }
    }
    match poller.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("mirror stream failed: {}", e);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

const DEFAULT_LOG: &str = "chainwatch=info";

/// RUST_LOG wins outright when set and valid; otherwise chainwatch=info.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG)),
        None => EnvFilter::new(DEFAULT_LOG),
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .compact().init();

    let cli = Cli::parse();
    let mut cfg = EngineConfig::load(cli.config.as_deref())?;
    if cli.no_scorer {
        cfg.scoring_enabled = false;
    }

    let engine = AnomalyEngine::new(&cfg);
    if let Some(t) = cli.threshold {
        engine.set_threshold(t);
    }
    info!(threshold = engine.threshold(), scorer = engine.has_scorer(), "engine ready");

    let start = Instant::now();
    match cli.mode {
        Mode::Replay => {
            let pipeline = Pipeline::new(engine, cli.jsonl);
            run_replay(&cli, &pipeline).await?;
            pipeline.print_stats(start);
        }
        Mode::Reassemble => run_reassemble(&cli, &cfg).await?,
        Mode::History => run_history(&cli, &cfg, &engine).await?,
        Mode::Watch => {
            let pipeline = Pipeline::new(engine, cli.jsonl);
            run_watch(&cli, &cfg, &pipeline).await?;
            pipeline.print_stats(start);
        }
    }

    Ok(())
}
