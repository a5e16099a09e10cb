//! prophet-eval - run forecasting tasks in batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{ArgGroup, Parser};
use prophet_core::{EngineEvent, Task};
use prophet_dataset::{load_tasks, DatasetCache, DatasetRef, Registry, ResolvedDataset};
use prophet_execution::{BatchEngine, CommandExecutor, EngineConfig, RunReport, RuntimeOptions, TracingListener};
use prophet_progress::{ChannelListener, LogReporter, ProgressTracker};
use prophet_storage::{JsonSummaryStorage, ResumePlan, Summary, SummaryStorage};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "prophet-eval")]
#[command(about = "Run forecasting tasks in batch", long_about = None)]
#[command(group(ArgGroup::new("source").required(true).args(["input", "dataset"])))]
struct Cli {
    /// JSONL file with forecasting tasks
    #[arg(short = 'f', long)]
    input: Option<PathBuf>,

    /// Dataset ref: name[@version|@latest] or owner/dataset[@revision]
    #[arg(short = 'd', long)]
    dataset: Option<String>,

    /// Local dataset registry JSON
    #[arg(long)]
    registry_path: Option<PathBuf>,

    /// Root of the dataset cache
    #[arg(long)]
    dataset_cache: Option<PathBuf>,

    /// Split to load for hub datasets
    #[arg(long, default_value = "train")]
    hf_split: String,

    /// Output directory for the summary and per-task artifacts
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent workers
    #[arg(short, long, default_value = "1")]
    workers: usize,

    /// Total cost budget across all tasks (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_cost: f64,

    /// Cost cap handed to each task
    #[arg(long)]
    max_cost_per_run: Option<f64>,

    /// Per-attempt timeout in seconds (0 = disabled)
    #[arg(long, default_value = "180")]
    timeout: u64,

    /// Skip tasks already recorded in the output summary
    #[arg(long)]
    resume: bool,

    /// Subtract N days from each task's predict_by date
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    offset: i64,

    /// Search upper bound (MM/DD/YYYY)
    #[arg(long)]
    search_date_before: Option<String>,

    /// Search lower bound (MM/DD/YYYY)
    #[arg(long)]
    search_date_after: Option<String>,

    /// Program run once per task attempt
    #[arg(long)]
    executor: String,

    /// Argument passed to the executor (repeatable)
    #[arg(long = "executor-arg", allow_hyphen_values = true)]
    executor_args: Vec<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn validate(&self) -> Result<()> {
        if self.search_date_before.is_some() && self.offset != 0 {
            bail!("cannot combine --search-date-before and --offset");
        }
        if self.workers == 0 {
            bail!("--workers must be at least 1");
        }
        if !self.max_cost.is_finite() || self.max_cost < 0.0 {
            bail!("--max-cost must be a non-negative number");
        }
        Ok(())
    }

    fn engine_config(&self, output_dir: &Path) -> EngineConfig {
        let timeout = (self.timeout > 0).then(|| Duration::from_secs(self.timeout));
        EngineConfig::new()
            .with_workers(self.workers)
            .with_max_cost(self.max_cost)
            .with_max_cost_per_run(self.max_cost_per_run)
            .with_timeout(timeout)
            .with_output_dir(output_dir)
            .with_runtime(RuntimeOptions {
                search_date_before: self.search_date_before.clone(),
                search_date_after: self.search_date_after.clone(),
            })
    }

    /// Resolved flags stored in the summary under `eval_config`.
    fn eval_config(&self, config: &EngineConfig) -> Value {
        let mut snapshot = config.snapshot();
        if let Value::Object(map) = &mut snapshot {
            map.insert("resume".into(), json!(self.resume));
            map.insert("offset".into(), json!(self.offset));
            map.insert(
                "executor".into(),
                json!({ "program": self.executor, "args": self.executor_args }),
            );
        }
        snapshot
    }
}

fn default_cache_root() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".prophet").join("datasets"),
        None => PathBuf::from(".prophet").join("datasets"),
    }
}

/// `runs/<label>_<YYYYmmdd_HHMMSS>`
fn default_output_dir(label: &str, stamp: &str) -> PathBuf {
    let safe = label.replace('/', "__").replace('@', "_");
    PathBuf::from("runs").join(format!("{}_{}", safe, stamp))
}

async fn resolve_dataset(cli: &Cli) -> Result<ResolvedDataset> {
    if let Some(input) = &cli.input {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            bail!("input file not found: {}", input.display());
        }
        return Ok(ResolvedDataset::local_file(input));
    }

    let Some(reference) = &cli.dataset else {
        bail!("provide exactly one of --input/-f or --dataset/-d");
    };
    let reference = DatasetRef::parse(reference)?;

    let registry = match &cli.registry_path {
        Some(path) => Some(
            Registry::load(path)
                .await
                .with_context(|| format!("failed to load registry {}", path.display()))?,
        ),
        None => None,
    };

    let cache = DatasetCache::new(cli.dataset_cache.clone().unwrap_or_else(default_cache_root));
    cache
        .resolve(&reference, registry.as_ref(), &cli.hf_split)
        .await
        .with_context(|| format!("failed to resolve dataset {}", reference))
}

/// Terminal outcome counts across the whole summary.
#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    submitted: usize,
    failed: usize,
    skipped: usize,
    pending: usize,
    total: usize,
}

fn tally(summary: &Summary) -> Tally {
    summary.runs.iter().fold(Tally::default(), |mut t, outcome| {
        t.total += 1;
        if outcome.status.is_submitted() {
            t.submitted += 1;
        } else if outcome.status.is_skipped() {
            t.skipped += 1;
        } else if outcome.status.is_pending() {
            t.pending += 1;
        } else {
            t.failed += 1;
        }
        t
    })
}

/// One console line per finished task, numbered in completion order.
fn completion_line(done: usize, total: usize, event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::TaskCompleted { task_id, status, cost_spent } => Some(format!(
            "[{}/{}] {} {} (${:.2})",
            done, total, task_id, status, cost_spent
        )),
        _ => None,
    }
}

fn spawn_completion_printer(mut rx: mpsc::Receiver<EngineEvent>, total: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut done = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, EngineEvent::TaskCompleted { .. }) {
                done += 1;
            }
            if let Some(line) = completion_line(done, total, &event) {
                println!("{}", line);
            }
        }
    })
}

fn install_interrupt_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received, finishing in-flight tasks (press Ctrl-C again to exit now)");
        shutdown.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn print_report(report: &RunReport, tracker: &ProgressTracker, summary_path: &Path) {
    println!();
    let snapshot = tracker.snapshot();
    print!("{}", snapshot.render_table());

    let t = tally(&report.summary);
    println!(
        "\nEval {}: {} submitted, {} failed, {} skipped, {} total",
        if report.interrupted { "interrupted" } else { "complete" },
        t.submitted,
        t.failed,
        t.skipped,
        t.total
    );
    if t.pending > 0 {
        println!("  {} entries without a terminal status", t.pending);
    }
    println!("  Cost: ${:.2}", report.total_cost);
    println!("  Throughput: {:.1} tasks/min", snapshot.throughput_per_minute);
    if report.budget_exhausted {
        println!("  Budget exhausted; remaining tasks were skipped");
    }
    println!("  Summary: {}", summary_path.display());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli.validate()?;

    let dataset = resolve_dataset(&cli).await?;
    let tasks: Vec<Task> = load_tasks(&dataset.path, cli.offset)
        .await
        .with_context(|| format!("failed to load tasks from {}", dataset.path.display()))?;
    if tasks.is_empty() {
        println!("No tasks found in the input dataset.");
        return Ok(());
    }

    let output_dir = match &cli.output {
        Some(dir) => dir.clone(),
        None => default_output_dir(&dataset.label(), &Local::now().format("%Y%m%d_%H%M%S").to_string()),
    };
    info!(
        tasks = tasks.len(),
        dataset = %dataset.source_ref,
        workers = cli.workers,
        output = %output_dir.display(),
        "loaded dataset"
    );

    let config = cli.engine_config(&output_dir);
    let eval_config = cli.eval_config(&config);
    let eval = serde_json::to_value(&dataset).context("failed to serialize dataset provenance")?;

    let storage = Arc::new(JsonSummaryStorage::new(&output_dir));
    let plan = if cli.resume {
        let prior = storage
            .load()
            .await
            .with_context(|| format!("failed to read {}", storage.path().display()))?;
        let plan = ResumePlan::build(tasks, prior, eval_config, eval)?;
        println!(
            "Resume mode: skipping {} existing run(s), {} remaining.",
            plan.skipped,
            plan.tasks.len()
        );
        plan
    } else {
        ResumePlan::fresh(tasks, eval_config, eval)
    };
    if plan.tasks.is_empty() {
        println!("No remaining runs to process.");
        return Ok(());
    }

    let executor = CommandExecutor::new(cli.executor.clone()).with_args(cli.executor_args.clone());
    let tracker = Arc::new(ProgressTracker::new());
    let (feed, rx) = ChannelListener::new(256);
    let feed = Arc::new(feed);
    let printer = spawn_completion_printer(rx, plan.tasks.len());
    let engine = BatchEngine::new(Arc::new(executor))
        .with_config(config)
        .with_listener(Arc::new(TracingListener))
        .with_listener(tracker.clone())
        .with_listener(Arc::new(LogReporter::default()))
        .with_listener(feed.clone());

    let shutdown = CancellationToken::new();
    install_interrupt_handler(shutdown.clone());

    let summary_path = storage.path().to_path_buf();
    let report = engine
        .run(plan, storage, shutdown)
        .await
        .context("batch run failed")?;

    // Close the channel so the printer drains and exits.
    let dropped = feed.dropped();
    drop(engine);
    drop(feed);
    if let Err(e) = printer.await {
        warn!(error = %e, "completion printer failed");
    }
    debug!(dropped, "completion events dropped");

    print_report(&report, &tracker, &summary_path);
    Ok(())
}
