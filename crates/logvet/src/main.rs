//! logvet CLI (`lv`): search-backend quality validation against live logs.
//!
//! Thin wrapper over `logvet-core`: flag parsing, config resolution, logging
//! setup, and console rendering live here; all test logic lives in the core
//! crate.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use logvet_core::backend::{SearchBackend, SearchBackendClient};
use logvet_core::checkpoint::Checkpoint;
use logvet_core::config::LogvetConfig;
use logvet_core::error::CheckpointError;
use logvet_core::fallback::RipgrepSearcher;
use logvet_core::logging::{LogConfig, LogFormat, init_logging};
use logvet_core::logstore::{LogSource, LogStoreClient};
use logvet_core::metrics::TestMetrics;
use logvet_core::orchestrator::{
    Orchestrator, OrchestratorOptions, ProgressSink, RunProgress,
};
use logvet_core::report;

#[derive(Parser)]
#[command(
    name = "lv",
    version,
    about = "Validate a semantic log-search backend against live logs and source code"
)]
struct Cli {
    /// Enable verbose debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines instead of pretty output
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Command {
    /// Run the search quality test batch
    Run(RunArgs),
    /// Probe both backends and report reachability
    Health(EndpointArgs),
    /// List codebases known to the search backend
    Codebases(EndpointArgs),
}

#[derive(Args)]
struct EndpointArgs {
    /// Optional logvet.toml to load before applying flags
    #[arg(long, env = "LOGVET_CONFIG")]
    config: Option<PathBuf>,

    /// Log store API base URL
    #[arg(long, env = "LOGVET_LOG_STORE_URL")]
    log_store_url: Option<String>,

    /// Search backend base URL
    #[arg(long, env = "LOGVET_SEARCH_URL")]
    search_url: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    endpoints: EndpointArgs,

    /// Log store query used to fetch candidate logs
    #[arg(long)]
    query: Option<String>,

    /// Query window start (RFC3339; default today 00:00:00 UTC)
    #[arg(long)]
    start: Option<String>,

    /// Query window end (RFC3339; default today 23:59:59 UTC)
    #[arg(long)]
    end: Option<String>,

    /// Maximum number of logs to test
    #[arg(long)]
    limit: Option<usize>,

    /// Source tree searched by the code fallback
    #[arg(long)]
    source_path: Option<PathBuf>,

    /// Codebase filter passed with every search
    #[arg(long)]
    codebase: Option<String>,

    /// Maximum concurrent backend searches
    #[arg(long)]
    concurrency: Option<usize>,

    /// Request timeout in seconds for both backends
    #[arg(long)]
    timeout: Option<u64>,

    /// Results requested per backend search
    #[arg(long)]
    top_k: Option<usize>,

    /// Minimum similarity for a code match to count as a false negative
    #[arg(long)]
    similarity_threshold: Option<f64>,

    /// JSON output file path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Markdown report file path
    #[arg(long)]
    report: Option<PathBuf>,

    /// CSV metrics file path
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Resume from an existing checkpoint
    #[arg(long)]
    resume: bool,

    /// Checkpoint file path
    #[arg(long)]
    checkpoint_file: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<LogvetConfig> {
    match path {
        Some(path) => LogvetConfig::load(path)
            .map_err(logvet_core::Error::from)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(LogvetConfig::default()),
    }
}

impl RunArgs {
    /// Resolve the effective config: file values overridden by flags.
    fn resolve(&self) -> anyhow::Result<LogvetConfig> {
        let mut config = load_config(self.endpoints.config.as_ref())?;

        if let Some(url) = &self.endpoints.log_store_url {
            config.log_store.url.clone_from(url);
        }
        if let Some(url) = &self.endpoints.search_url {
            config.backend.url.clone_from(url);
        }
        if let Some(query) = &self.query {
            config.run.query.clone_from(query);
        }
        if let Some(start) = &self.start {
            config.run.start = Some(start.clone());
        }
        if let Some(end) = &self.end {
            config.run.end = Some(end.clone());
        }
        if let Some(limit) = self.limit {
            config.run.limit = limit;
        }
        if let Some(path) = &self.source_path {
            config.fallback.source_path.clone_from(path);
        }
        if let Some(codebase) = &self.codebase {
            config.backend.codebase = Some(codebase.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.log_store.timeout_secs = timeout;
            config.backend.timeout_secs = timeout;
        }
        if let Some(top_k) = self.top_k {
            config.run.top_k = top_k;
        }
        if let Some(threshold) = self.similarity_threshold {
            config.run.similarity_threshold = threshold;
        }
        if let Some(path) = &self.output {
            config.output.json.clone_from(path);
        }
        if let Some(path) = &self.report {
            config.output.report.clone_from(path);
        }
        if let Some(path) = &self.csv {
            config.output.csv.clone_from(path);
        }
        if let Some(path) = &self.checkpoint_file {
            config.output.checkpoint_file.clone_from(path);
        }

        config.validate().map_err(logvet_core::Error::from)?;
        Ok(config)
    }
}

/// Logging progress reporter: one line every ten items and at completion.
struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_item_complete(&self, progress: &RunProgress) {
        if progress.tested % 10 == 0 || progress.tested == progress.total {
            info!(
                tested = format!("{}/{}", progress.tested, progress.total),
                found_by_search = progress.found_by_search,
                found_by_ripgrep = progress.found_by_ripgrep,
                not_found = progress.not_found,
                avg_response_ms = format!("{:.0}", progress.avg_response_time_ms()),
                "Progress"
            );
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: if cli.verbose { "debug" } else { "info" }.to_string(),
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        file: None,
    };
    if let Err(e) = init_logging(&log_config) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(2);
    }

    let outcome = match cli.command {
        Command::Run(args) => run(&args).await,
        Command::Health(args) => health(&args).await,
        Command::Codebases(args) => codebases(&args).await,
    };

    if let Err(err) = outcome {
        if let Some(core_err) = err.downcast_ref::<logvet_core::Error>() {
            if let Some(remediation) = core_err.remediation() {
                eprint!("{}", remediation.render_plain());
            }
        }
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(args: &RunArgs) -> anyhow::Result<()> {
    let config = args.resolve()?;

    let log_store = LogStoreClient::new(
        &config.log_store.url,
        Duration::from_secs(config.log_store.timeout_secs),
    )?;
    let backend = Arc::new(SearchBackendClient::new(
        &config.backend.url,
        Duration::from_secs(config.backend.timeout_secs),
    )?);
    let fallback = Arc::new(
        RipgrepSearcher::new(&config.fallback.source_path)
            .with_timeout(Duration::from_secs(config.fallback.timeout_secs)),
    );

    // Best-effort preflight: warn but keep going, the run itself will
    // surface hard failures with retry and checkpointing in place.
    if !log_store.health_check().await {
        warn!(url = %config.log_store.url, "Log store health check failed; continuing anyway");
    }
    if !backend.health_check().await {
        warn!(url = %config.backend.url, "Search backend health check failed; continuing anyway");
    }

    let start = config.start_rfc3339();
    let end = config.end_rfc3339();
    let logs = log_store
        .query_logs(&config.run.query, &start, &end, config.run.limit)
        .await?;

    if logs.is_empty() {
        info!("Log store returned no candidate logs; nothing to test");
        return Ok(());
    }

    let metadata = run_metadata(&config, &start, &end, logs.len());
    let checkpoint_path = config.output.checkpoint_file.clone();
    let mut checkpoint = if args.resume {
        match Checkpoint::load(&checkpoint_path) {
            Ok(checkpoint) => {
                info!(
                    completed = checkpoint.len(),
                    total = logs.len(),
                    "Resuming from checkpoint"
                );
                checkpoint
            }
            Err(CheckpointError::NotFound(_)) => {
                info!("No checkpoint found; starting a fresh run");
                Checkpoint::new(&checkpoint_path, metadata.clone())
            }
            Err(e) => return Err(logvet_core::Error::from(e).into()),
        }
    } else {
        Checkpoint::new(&checkpoint_path, metadata.clone())
    };

    let options = OrchestratorOptions {
        concurrency: config.run.concurrency,
        top_k: config.run.top_k,
        codebase: config.backend.codebase.clone(),
        similarity_threshold: config.run.similarity_threshold,
        fallback_max_results: config.fallback.max_results,
        checkpoint_every: config.output.checkpoint_every,
    };
    let orchestrator =
        Orchestrator::new(backend, fallback, options).with_progress(Arc::new(LogProgress));

    let outcome = orchestrator.run(&logs, &mut checkpoint).await?;

    report::write_json(&config.output.json, &outcome.results, &outcome.metrics, &metadata)?;
    report::write_markdown(&config.output.report, &outcome.results, &outcome.metrics, &metadata)?;
    report::write_csv(&config.output.csv, &outcome.results)?;

    // Artifacts are on disk; only now is the checkpoint disposable.
    checkpoint.delete();

    print_summary(&outcome.metrics, &config);
    Ok(())
}

fn run_metadata(
    config: &LogvetConfig,
    start: &str,
    end: &str,
    total_logs: usize,
) -> BTreeMap<String, serde_json::Value> {
    let mut metadata = BTreeMap::from([
        (
            "log_store_url".to_string(),
            serde_json::json!(config.log_store.url),
        ),
        ("search_url".to_string(), serde_json::json!(config.backend.url)),
        ("query".to_string(), serde_json::json!(config.run.query)),
        ("start".to_string(), serde_json::json!(start)),
        ("end".to_string(), serde_json::json!(end)),
        ("limit".to_string(), serde_json::json!(config.run.limit)),
        (
            "concurrency".to_string(),
            serde_json::json!(config.run.concurrency),
        ),
        ("total_logs".to_string(), serde_json::json!(total_logs)),
    ]);
    if let Some(codebase) = &config.backend.codebase {
        metadata.insert("codebase".to_string(), serde_json::json!(codebase));
    }
    metadata
}

fn print_summary(metrics: &TestMetrics, config: &LogvetConfig) {
    println!();
    println!(
        "Test complete in {:.1}s",
        metrics.total_duration_seconds
    );
    println!("  Total logs:         {}", metrics.total_logs);
    println!(
        "  Found by search:    {} ({:.1}%)",
        metrics.found_by_search,
        metrics.hit_rate * 100.0
    );
    println!(
        "  Found by ripgrep:   {} ({:.1}%)",
        metrics.found_by_ripgrep_only,
        metrics.false_negative_rate * 100.0
    );
    println!(
        "  Not found:          {} ({:.1}%)",
        metrics.not_found,
        metrics.miss_rate * 100.0
    );
    println!(
        "  Avg response time:  {:.1}ms",
        metrics.avg_response_time_ms
    );
    println!(
        "  P50 / P95 / P99:    {:.0}ms / {:.0}ms / {:.0}ms",
        metrics.p50_response_time_ms,
        metrics.p95_response_time_ms,
        metrics.p99_response_time_ms
    );
    if let Some(score) = metrics.avg_match_score {
        println!("  Avg match score:    {score:.2}");
    }
    println!();
    println!("Outputs:");
    println!("  JSON:   {}", config.output.json.display());
    println!("  Report: {}", config.output.report.display());
    println!("  CSV:    {}", config.output.csv.display());
}

async fn health(args: &EndpointArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(url) = &args.log_store_url {
        config.log_store.url.clone_from(url);
    }
    if let Some(url) = &args.search_url {
        config.backend.url.clone_from(url);
    }

    let log_store = LogStoreClient::new(
        &config.log_store.url,
        Duration::from_secs(config.log_store.timeout_secs),
    )?;
    let backend = SearchBackendClient::new(
        &config.backend.url,
        Duration::from_secs(config.backend.timeout_secs),
    )?;

    let log_store_ok = log_store.health_check().await;
    let backend_ok = backend.health_check().await;

    println!(
        "log store      {}  {}",
        if log_store_ok { "ok  " } else { "DOWN" },
        config.log_store.url
    );
    println!(
        "search backend {}  {}",
        if backend_ok { "ok  " } else { "DOWN" },
        config.backend.url
    );

    anyhow::ensure!(log_store_ok && backend_ok, "one or more backends unreachable");
    Ok(())
}

async fn codebases(args: &EndpointArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(url) = &args.search_url {
        config.backend.url.clone_from(url);
    }

    let backend = SearchBackendClient::new(
        &config.backend.url,
        Duration::from_secs(config.backend.timeout_secs),
    )?;

    let codebases = backend.list_codebases().await?;
    if codebases.is_empty() {
        println!("no codebases indexed");
        return Ok(());
    }
    for codebase in codebases {
        match codebase.total_logs {
            Some(total) => println!("{}  ({total} logs)", codebase.name),
            None => println!("{}", codebase.name),
        }
    }
    Ok(())
}
