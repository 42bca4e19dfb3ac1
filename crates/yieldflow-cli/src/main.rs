use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use yieldflow_core::domain::{BatchId, PositionId};
use yieldflow_core::impls::{
    InMemoryPositionBook, JsonFileStore, PositionBookSeed, SimulatedTransferGateway,
};
use yieldflow_core::ports::{Clock, SystemClock};
use yieldflow_core::{Engine, EngineBuilder, EngineConfig};

mod probe;

use probe::LocalHealthProbe;

const POSITIONS_FILE: &str = "positions.json";
const TRANSFER_LEDGER_FILE: &str = "transfers.json";

#[derive(Parser)]
#[command(name = "yieldflow")]
#[command(about = "Daily yield distribution engine", long_about = None)]
struct Cli {
    /// TOML config file (YIELDFLOW_* environment variables override it)
    #[arg(short, long, global = true, env = "YIELDFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory; overrides `storage_dir`
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Positions/products seed file (defaults to <data dir>/positions.json)
    #[arg(long, global = true)]
    positions_file: Option<PathBuf>,

    /// Success rate of the simulated transfer gateway, 0.0 to 1.0
    #[arg(long, global = true, default_value_t = 1.0)]
    success_rate: f64,

    /// Simulated transfer latency in milliseconds
    #[arg(long, global = true, default_value_t = 50)]
    transfer_latency_ms: u64,

    /// Funding wallet balance; unlimited when omitted
    #[arg(long, global = true)]
    funding_balance: Option<Decimal>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run (or resume) the daily batch once
    RunDaily {
        /// Distribution date (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Start a manual batch
    Trigger {
        /// Comma-separated position ids (defaults to all active positions)
        #[arg(long, value_delimiter = ',')]
        positions: Vec<String>,
    },
    /// Show one batch, or the most recent batches
    Status {
        batch: Option<String>,
        /// Number of batches to list
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Aggregate distribution statistics
    Stats,
    /// List failed tasks of a batch
    Failed { batch: String },
    /// Retry the failed tasks of a batch now
    Retry { batch: String },
    /// Report unfinished batches and run due retry waves
    Recover,
    /// Run the daily trigger and recovery monitor until Ctrl-C
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.storage_dir = dir.clone();
    }
    let positions_file = cli
        .positions_file
        .clone()
        .unwrap_or_else(|| config.storage_dir.join(POSITIONS_FILE));

    let store = Arc::new(
        JsonFileStore::open(&config.storage_dir)
            .await
            .with_context(|| format!("opening store at {}", config.storage_dir.display()))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let book = Arc::new(InMemoryPositionBook::new(
        load_seed(&positions_file).await?,
        clock.clone(),
    ));
    let gateway = Arc::new(
        SimulatedTransferGateway::with_ledger(
            cli.success_rate,
            Duration::from_millis(cli.transfer_latency_ms),
            config.storage_dir.join(TRANSFER_LEDGER_FILE),
        )
        .await
        .context("loading transfer ledger")?,
    );
    let probe = Arc::new(LocalHealthProbe::new(store.clone(), cli.funding_balance));

    let engine = EngineBuilder::new(config)
        .with_clock(clock)
        .with_position_book(book.clone())
        .with_transfers(gateway)
        .with_probe(probe)
        .with_store(store.clone())
        .with_retry_queue(store)
        .build()?;

    let mutated = run_command(&engine, cli.command).await?;
    if mutated {
        save_seed(&positions_file, &book.snapshot().await).await?;
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Returns whether the position book may have changed.
async fn run_command(engine: &Engine, command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::RunDaily { date } => {
            let outcome = match date {
                Some(date) => engine.trigger_daily_for(date).await?,
                None => engine.trigger_daily().await?,
            };
            print_json(&outcome)?;
            Ok(true)
        }
        Commands::Trigger { positions } => {
            let ids = (!positions.is_empty())
                .then(|| positions.into_iter().map(PositionId::new).collect());
            let response = engine.trigger_manual(ids).await;
            print_json(&response)?;
            if let Some(error) = &response.error {
                anyhow::bail!("manual trigger failed: {error}");
            }
            Ok(true)
        }
        Commands::Status { batch: Some(id), .. } => {
            print_json(&engine.get_batch(&BatchId::new(id)).await?)?;
            Ok(false)
        }
        Commands::Status { batch: None, limit } => {
            let limit = limit.unwrap_or(engine.config().recent_batches_limit);
            let batches = engine.list_recent_batches(limit).await?;
            let summaries: Vec<BatchSummary> = batches.iter().map(BatchSummary::from).collect();
            print_json(&summaries)?;
            Ok(false)
        }
        Commands::Stats => {
            print_json(&engine.stats().await?)?;
            Ok(false)
        }
        Commands::Failed { batch } => {
            print_json(&engine.failed_tasks(&BatchId::new(batch)).await?)?;
            Ok(false)
        }
        Commands::Retry { batch } => {
            print_json(&engine.force_retry(&BatchId::new(batch)).await?)?;
            Ok(true)
        }
        Commands::Recover => {
            let report = engine.recover_on_startup().await?;
            let waves = engine.process_due_retries().await?;
            print_json(&serde_json::json!({ "recovery": report, "retry_waves": waves }))?;
            Ok(true)
        }
        Commands::Serve => {
            serve(engine).await?;
            Ok(true)
        }
    }
}

async fn serve(engine: &Engine) -> anyhow::Result<()> {
    let report = engine.recover_on_startup().await?;
    if !report.stale.is_empty() && report.resumed.is_empty() {
        warn!(
            stale = report.stale.len(),
            "unfinished batches will resume on the next trigger"
        );
    }

    let background = engine.spawn_background();
    info!("yieldflow running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("shutting down");
    background.shutdown_and_join().await;
    Ok(())
}

/// One line per batch in `status` listings.
#[derive(Serialize)]
struct BatchSummary {
    id: String,
    date: NaiveDate,
    status: yieldflow_core::domain::BatchStatus,
    total_amount: Decimal,
    total_positions: usize,
    completed_tasks: usize,
    failed_tasks: usize,
}

impl From<&yieldflow_core::domain::DistributionBatch> for BatchSummary {
    fn from(b: &yieldflow_core::domain::DistributionBatch) -> Self {
        Self {
            id: b.id.to_string(),
            date: b.date,
            status: b.status,
            total_amount: b.total_amount,
            total_positions: b.total_positions,
            completed_tasks: b.completed_tasks,
            failed_tasks: b.failed_tasks,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn load_seed(path: &Path) -> anyhow::Result<PositionBookSeed> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing positions file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "positions file not found; starting with an empty book");
            Ok(PositionBookSeed::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading positions file {}", path.display())),
    }
}

async fn save_seed(path: &Path, seed: &PositionBookSeed) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(seed)?;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("writing positions file {}", path.display()))
}
