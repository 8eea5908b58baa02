// truthnet/src/main.rs
//
// TruthNet: weighted-consensus trust verdicts for uploaded media.
//
// Four operational modes:
//   analyze  one media file, verdict printed to stdout
//   batch    a JSONL file of jobs, verdicts written to the output directory
//   serve    framed-JSON query API plus a /metrics endpoint
//   probe    health-check every configured detector
//
// Usage:
//   truthnet analyze --path upload.jpg
//   truthnet analyze --path clip.bin --media-type video --json
//   truthnet batch --path jobs.jsonl --output /var/lib/truthnet
//   truthnet serve --listen 0.0.0.0:50051 --metrics 0.0.0.0:9091 --output /var/lib/truthnet
//   TRUTHNET_CONFIG=/etc/truthnet/detectors.json truthnet probe

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod contracts;
mod detectors;
mod engine;
mod metrics;
mod query_api;
mod sink;

use config::EngineConfig;
use contracts::{AggregateVerdict, MediaKind, Status, Verdict};
use engine::Orchestrator;
use metrics::{Metrics, MetricsServer};
use query_api::{AnalyzeCall, QueryServer};
use sink::VerdictSink;

/// Uploads above this size are refused before any detector is called.
const MAX_MEDIA_BYTES: u64 = 100 * 1024 * 1024;

/// Process exit code when no detector produced a usable score.
const EXIT_UNVERIFIABLE: i32 = 3;

/// Process exit code when a detector fails its health check.
const EXIT_DETECTOR_DOWN: i32 = 4;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "truthnet",
    about   = "Weighted-consensus trust verdicts for uploaded media",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(value_enum)]
    mode: Mode,

    #[arg(long, env = "TRUTHNET_CONFIG",
          help = "Detector config (JSON); built-in defaults when absent")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the overall analysis deadline")]
    deadline_ms: Option<u64>,

    #[arg(long, help = "Media file (analyze) or JSONL job file (batch)")]
    path: Option<PathBuf>,

    #[arg(long, help = "Media type; inferred from the extension when absent")]
    media_type: Option<MediaKind>,

    #[arg(long, help = "Print the full verdict as JSON (analyze)")]
    json: bool,

    #[arg(long, help = "Verdict output directory (batch, serve)")]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = 16, help = "Jobs analysed at once (batch)")]
    concurrency: usize,

    #[arg(long, default_value = "127.0.0.1:50051", help = "Query API bind address")]
    listen: SocketAddr,

    #[arg(long, default_value = "127.0.0.1:9091", help = "/metrics bind address")]
    metrics: SocketAddr,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Analyze, // one file, verdict on stdout
    Batch,   // JSONL jobs, verdicts to the sink
    Serve,   // query API + /metrics
    Probe,   // detector health
}

const DEFAULT_OUTPUT: &str = "/tmp/truthnet_output";

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => {
            info!("no --config given, using built-in detector defaults");
            EngineConfig::default()
        }
    };
    if let Some(ms) = cli.deadline_ms {
        config.overall_deadline_ms = ms;
        config.validate()?;
    }
    Ok(config)
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_verdict(v: &AggregateVerdict) {
    let reset = "\x1b[0m";
    let (color, icon) = if v.unverifiable {
        ("\x1b[90;1m", "⚪")
    } else {
        match v.verdict {
            Verdict::HighRisk   => ("\x1b[91;1m", "🔴"),
            Verdict::Suspicious => ("\x1b[93;1m", "🟡"),
            Verdict::Authentic  => ("\x1b[92m",   "🟢"),
        }
    };
    let label = if v.unverifiable { "UNVERIFIABLE".to_string() } else { v.verdict.to_string() };

    println!("\n{}{} {}{}", color, icon, label, reset);
    println!("  Request   : {}", v.work_id);
    println!("  Risk      : {}{:.4}{}", color, v.aggregate_risk, reset);
    println!("  Confidence: {:.2}", v.confidence);
    println!(
        "  Coverage  : {}/{} succeeded, {} partial, {} failed  ({}ms)",
        v.coverage.succeeded, v.coverage.requested, v.coverage.partial, v.coverage.failed, v.elapsed_ms
    );
    for r in &v.results {
        let detail = match (r.status(), r.error()) {
            (_, Some(e))           => format!("\x1b[90m[{}] {}{}", e.code, e.message, reset),
            (Status::Partial, _)   => format!("risk={:.4} \x1b[90m(partial){}", r.risk_score(), reset),
            _                      => format!("risk={:.4}", r.risk_score()),
        };
        println!("    {:<9} {:<8} {}", r.detector, r.status(), detail);
    }
    println!("  Reasons:");
    for reason in &v.reasons {
        println!("    • {}", reason);
    }
}

// ── Modes ─────────────────────────────────────────────────────────────────────

async fn analyze_file(engine: &Orchestrator, path: &Path, media_type: Option<MediaKind>) -> Result<AggregateVerdict> {
    let meta = tokio::fs::metadata(path).await
        .with_context(|| format!("media file not found: {}", path.display()))?;
    if !meta.is_file() {
        bail!("not a file: {}", path.display());
    }
    if meta.len() > MAX_MEDIA_BYTES {
        bail!("{} is {} bytes; maximum is {}", path.display(), meta.len(), MAX_MEDIA_BYTES);
    }
    let kind = match media_type.or_else(|| MediaKind::from_path(path)) {
        Some(k) => k,
        None    => bail!("cannot infer media type from {}; pass --media-type", path.display()),
    };
    let media_ref = tokio::fs::canonicalize(path).await?.display().to_string();
    let work_id   = Uuid::new_v4().to_string();
    Ok(engine.analyze(&work_id, &media_ref, kind).await)
}

async fn run_batch(
    engine:      Arc<Orchestrator>,
    jobs:        &Path,
    sink:        Arc<VerdictSink>,
    concurrency: usize,
) -> Result<()> {
    let file = tokio::fs::File::open(jobs).await
        .with_context(|| format!("cannot open job file {}", jobs.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut tasks = JoinSet::new();
    // Reading stops while every permit is out, so a large job file never
    // has more than `concurrency` analyses in flight.
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut skipped = 0usize;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() { continue; }
        let call = match serde_json::from_str::<AnalyzeCall>(&line) {
            Ok(c)  => c,
            Err(e) => { warn!("Parse error: {}", e); skipped += 1; continue; }
        };
        let (work_id, kind) = match call.resolve() {
            Ok(r)  => r,
            Err(e) => { warn!("skipping job: {}", e); skipped += 1; continue; }
        };

        let permit = Arc::clone(&permits).acquire_owned().await?;
        let engine = Arc::clone(&engine);
        let sink   = Arc::clone(&sink);
        tasks.spawn(async move {
            let verdict = engine.analyze(&work_id, &call.media_path, kind).await;
            if let Err(e) = sink.record(&verdict).await {
                error!("sink write failed for work={}: {}", work_id, e);
            }
            drop(permit);
            verdict
        });
    }

    let (mut done, mut unverifiable, mut high_risk) = (0usize, 0usize, 0usize);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(v) => {
                done += 1;
                if v.unverifiable { unverifiable += 1; }
                else if v.verdict == Verdict::HighRisk { high_risk += 1; }
            }
            Err(e) => error!("batch task failed: {}", e),
        }
    }
    println!(
        "\n\x1b[1m── batch  analysed={}  high_risk={}  unverifiable={}  skipped={} ──\x1b[0m",
        done, high_risk, unverifiable, skipped
    );
    Ok(())
}

async fn probe(engine: &Orchestrator) -> bool {
    let mut all_up = true;
    for d in engine.detectors() {
        let up = d.detector.is_available().await;
        all_up &= up;
        let (color, state) = if up { ("\x1b[92m", "up") } else { ("\x1b[91m", "DOWN") };
        println!(
            "  {:<9} {}{:<5}\x1b[0m weight={:.2} timeout={}ms  {}",
            d.kind(), color, state, d.spec.weight, d.spec.timeout_ms, d.spec.endpoint
        );
    }
    all_up
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries verdicts.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("truthnet=info".parse()?))
        .with_writer(std::io::stderr)
        .compact().init();

    let cli    = Cli::parse();
    let config = load_config(&cli)?;

    match cli.mode {
        Mode::Analyze => {
            let Some(path) = cli.path.as_deref() else { bail!("analyze needs --path <file>") };
            let engine  = Orchestrator::from_config(&config)?;
            let verdict = analyze_file(&engine, path, cli.media_type).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                print_verdict(&verdict);
            }
            if verdict.unverifiable {
                std::process::exit(EXIT_UNVERIFIABLE);
            }
        }

        Mode::Batch => {
            let Some(jobs) = cli.path.as_deref() else { bail!("batch needs --path <jobs.jsonl>") };
            let output = cli.output.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
            println!("  Mode: \x1b[93mBATCH\x1b[0m  |  {}", jobs.display());
            println!("  Output: \x1b[90m{}\x1b[0m", output.display());
            let engine = Arc::new(Orchestrator::from_config(&config)?);
            let sink   = Arc::new(VerdictSink::new(output)?);
            run_batch(engine, jobs, sink, cli.concurrency).await?;
        }

        Mode::Serve => {
            let metrics = Metrics::new();
            let engine  = Arc::new(Orchestrator::from_config(&config)?.with_metrics(Arc::clone(&metrics)));
            let sink    = match &cli.output {
                Some(dir) => Some(Arc::new(VerdictSink::new(dir.clone())?)),
                None      => None,
            };

            println!("  Mode: \x1b[96mSERVE\x1b[0m  |  query={}  metrics={}", cli.listen, cli.metrics);
            if let Some(dir) = &cli.output {
                println!("  Output: \x1b[90m{}\x1b[0m", dir.display());
            }
            println!("  Press Ctrl+C to stop.\n");

            let metrics_server = Arc::new(MetricsServer::new(metrics, cli.metrics));
            tokio::spawn(async move {
                if let Err(e) = metrics_server.serve().await {
                    error!("metrics endpoint stopped: {}", e);
                }
            });
            Arc::new(QueryServer::new(engine, sink)).serve(cli.listen).await?;
        }

        Mode::Probe => {
            let engine = Orchestrator::from_config(&config)?;
            println!("  Detectors (overall deadline {}ms):", config.overall_deadline_ms);
            if !probe(&engine).await {
                warn!("one or more detectors unavailable");
                std::process::exit(EXIT_DETECTOR_DOWN);
            }
        }
    }

    Ok(())
}
