//! Knowledge Queue Simulator
//!
//! Drive the ingestion scheduler over in-memory knowledge bases with a scripted
//! backend, then print the final state of every base as JSON.
//!
//! Usage:
//!   cargo run --bin knowledge-queue-sim
//!   cargo run --bin knowledge-queue-sim -- --fixture bases.json --events
//!   KNOWLEDGE_QUEUE_MAX_RETRIES=3 cargo run --bin knowledge-queue-sim -- -f bases.json

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use knowledge_queue::memory::{MemoryItemStore, MemoryNoteStore};
use knowledge_queue::mock::{MockIngestionBackend, MockResponse};
use knowledge_queue::{
    BroadcastNotificationSink, EmbeddingConfig, FailureSource, IngestionOutcome, ItemContent,
    ItemType, KnowledgeBase, KnowledgeItem, QueueConfig, QueueManager, Result,
};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const DEFAULT_MAX_SWEEPS: usize = 10;

#[derive(Debug)]
struct Args {
    fixture: Option<PathBuf>,
    max_sweeps: usize,
    latency: Duration,
    events: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            fixture: None,
            max_sweeps: DEFAULT_MAX_SWEEPS,
            latency: Duration::ZERO,
            events: false,
        }
    }
}

/// Input file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fixture {
    #[serde(default)]
    bases: Vec<KnowledgeBase>,
    /// Note bodies keyed by note item id.
    #[serde(default)]
    notes: HashMap<Uuid, String>,
    /// Scripted backend outcomes keyed by item id, consumed in order.
    #[serde(default)]
    responses: HashMap<Uuid, Vec<IngestionOutcome>>,
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--fixture" | "-f" => {
                i += 1;
                if i < args.len() {
                    result.fixture = Some(PathBuf::from(&args[i]));
                }
            }
            "--sweeps" | "-n" => {
                i += 1;
                if i < args.len() {
                    result.max_sweeps = args[i].parse().unwrap_or_else(|_| {
                        eprintln!("Invalid sweep count: {}. Using {}.", args[i], DEFAULT_MAX_SWEEPS);
                        DEFAULT_MAX_SWEEPS
                    });
                }
            }
            "--latency-ms" | "-l" => {
                i += 1;
                if i < args.len() {
                    match args[i].parse::<u64>() {
                        Ok(ms) => result.latency = Duration::from_millis(ms),
                        Err(_) => eprintln!("Invalid latency: {}. Using 0.", args[i]),
                    }
                }
            }
            "--events" | "-e" => {
                result.events = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Ignoring unknown argument: {}", other);
            }
        }
        i += 1;
    }

    result
}

fn print_help() {
    println!(
        r#"
Knowledge Queue Simulator

Usage: cargo run --bin knowledge-queue-sim -- [OPTIONS]

Options:
  -f, --fixture <FILE>    JSON fixture with bases, notes and scripted responses
                          (default: built-in demo with one flaky item)
  -n, --sweeps <N>        Maximum scheduler sweeps (default: 10)
  -l, --latency-ms <MS>   Simulated backend latency per call (default: 0)
  -e, --events            Print queue events to stderr as JSON lines
  -h, --help              Print help

Environment:
  KNOWLEDGE_QUEUE_MAX_RETRIES     Attempts per item (default: 1)
  KNOWLEDGE_QUEUE_TIMEOUT_SECS    Per-attempt timeout, 0 disables (default: 300)
  KNOWLEDGE_QUEUE_USER_ID         User id forwarded to the backend
  LOG_FORMAT / LOG_FILE / LOG_ANSI / RUST_LOG
"#
    );
}

/// Three URL items in one base; the second fails once before succeeding.
fn demo_fixture() -> Fixture {
    let mut base = KnowledgeBase::new(
        "demo",
        EmbeddingConfig {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: Some(768),
            ..Default::default()
        },
    );
    for i in 1..=3 {
        base.items.push(KnowledgeItem::new(
            base.id,
            ItemType::Url,
            ItemContent::Text(format!("https://example.com/item{i}")),
        ));
    }
    let flaky = base.items[1].id;

    Fixture {
        bases: vec![base],
        notes: HashMap::new(),
        responses: HashMap::from([(
            flaky,
            vec![IngestionOutcome::Failed {
                message: "connection reset".to_string(),
                source: Some(FailureSource::Embedding),
            }],
        )]),
    }
}

fn load_fixture(path: &Path) -> Result<Fixture> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter (default: "knowledge_queue=info")
    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = env::var("LOG_FILE").ok();
    let log_ansi = env::var("LOG_ANSI").ok().map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "knowledge_queue=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let path = Path::new(path);
        let file_dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("knowledge-queue.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // stdout carries the result document, so console logs go to stderr
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();
    let args = parse_args();

    let fixture = match &args.fixture {
        Some(path) => load_fixture(path)
            .with_context(|| format!("Failed to load fixture {}", path.display()))?,
        None => demo_fixture(),
    };

    let store = MemoryItemStore::with_bases(fixture.bases);
    let notes = MemoryNoteStore::with_notes(fixture.notes);
    let backend = MockIngestionBackend::new().with_latency(args.latency);
    for (item_id, outcomes) in fixture.responses {
        for outcome in outcomes {
            backend.push_response(item_id, MockResponse::Outcome(outcome));
        }
    }
    let notifier = BroadcastNotificationSink::default();

    let config = QueueConfig::from_env();
    config.validate()?;
    info!(
        max_retries = config.max_retries,
        ingest_timeout_secs = config.ingest_timeout_secs,
        max_sweeps = args.max_sweeps,
        "Starting simulation"
    );

    let manager = QueueManager::builder(Arc::new(store.clone()), Arc::new(backend.clone()))
        .with_note_store(Arc::new(notes))
        .with_notifier(Arc::new(notifier.clone()))
        .with_config(config)
        .build();

    let printer = args.events.then(|| {
        let mut events = manager.events();
        let mut notifications = notifier.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => match serde_json::to_string(&event) {
                            Ok(line) => eprintln!("{}", line),
                            Err(e) => eprintln!("Failed to encode event: {}", e),
                        },
                        Err(_) => break,
                    },
                    notification = notifications.recv() => {
                        if let Ok(n) = notification {
                            eprintln!("[{:?}] {}: {}", n.kind, n.title, n.message);
                        }
                    }
                }
            }
        })
    });

    let policy = manager.policy();
    let mut sweeps = 0;
    while sweeps < args.max_sweeps {
        let calls_before = backend.call_count();
        manager.check_all_bases().await;
        manager.wait_idle().await;
        sweeps += 1;

        let pending = store
            .snapshot()
            .await
            .iter()
            .flat_map(|base| base.items.iter())
            .filter(|item| policy.is_eligible(item) && policy.can_attempt(item))
            .count();
        if pending == 0 || backend.call_count() == calls_before {
            break;
        }
    }

    info!(
        sweeps,
        backend_calls = backend.call_count(),
        "Simulation finished"
    );

    if let Some(printer) = printer {
        printer.abort();
    }

    let bases = store.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&bases)?);
    Ok(())
}
