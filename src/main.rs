//! legis-sync - Legislative data synchronization and change-detection engine
//!
//! This is the main entry point for the legis-sync binary.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use legis_sync::changes::ChangeDetection;
use legis_sync::config::Config;
use legis_sync::database::{Database, SqliteDatabase};
use legis_sync::models::{ResourceType, SyncStrategy};
use legis_sync::orchestrator::{Orchestrator, SyncOptions};
use legis_sync::otel::{init_tracing, OtelProvider, SyncMetrics};
use legis_sync::queue::QueueLedger;
use legis_sync::resources::SyncContext;
use legis_sync::sync::{ErrorHandler, ParallelExecutor, RateLimitMonitor, SchedulerConfig, StrategyTask, SyncScheduler};
use legis_sync::upstream::CongressClient;

/// legis-sync - Legislative data synchronization and change-detection engine
#[derive(Parser, Debug)]
#[command(name = "legis-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "LEGIS_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one strategy over the given resources
    Sync {
        #[arg(short, long, default_value = "incremental")]
        strategy: SyncStrategy,

        /// Comma-separated resource list; all when omitted
        #[arg(short, long, value_delimiter = ',')]
        resources: Vec<ResourceType>,

        /// Enqueue jobs instead of syncing inline
        #[arg(long = "async")]
        async_mode: bool,

        #[arg(long)]
        congress: Option<u32>,
    },

    /// Print sync, change, error and queue statistics
    Stats {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },

    /// Execute due jobs from the queue ledger
    Drain {
        #[arg(long, default_value_t = 100)]
        max_jobs: usize,
    },

    /// Print queue counts and the most recent jobs
    Queue {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Run the configured scheduled syncs until shutdown
    Serve,
}

/// Process-wide service instances
struct Engine {
    database: Arc<dyn Database>,
    orchestrator: Arc<Orchestrator>,
    changes: Arc<ChangeDetection>,
    errors: Arc<ErrorHandler>,
    monitor: Arc<RateLimitMonitor>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize OpenTelemetry provider
    let otel_provider = OtelProvider::new(&config.otel)?;

    // Initialize tracing/logging
    init_tracing(&otel_provider, &config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting legis-sync");

    let metrics = Arc::new(SyncMetrics::new(&otel_provider.meter()));
    let engine = build_engine(&config, metrics).await?;

    let result = run_command(args.command, &config, &engine).await;

    // Shutdown OpenTelemetry
    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("legis-sync shutdown complete");

    result
}

async fn build_engine(config: &Config, metrics: Arc<SyncMetrics>) -> anyhow::Result<Engine> {
    let database: Arc<dyn Database> = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let monitor = Arc::new(RateLimitMonitor::new(
        &config.rate_limit,
        config.upstream.hourly_request_ceiling,
    ));
    let client = CongressClient::new(&config.upstream, config.rate_limit.clone(), monitor.clone())?
        .with_metrics(metrics.clone());
    if config.upstream.api_key.is_none() {
        warn!("No upstream API key configured, requests will likely be rejected");
    }

    let errors = Arc::new(
        ErrorHandler::new(config.retry.clone(), config.alerts.clone())
            .with_database(database.clone())
            .with_metrics(metrics.clone()),
    );
    let changes = Arc::new(ChangeDetection::new(database.clone()).with_metrics(metrics.clone()));
    let queue = Arc::new(QueueLedger::new(database.clone(), config.queue.clone()));

    let ctx = SyncContext {
        api: Arc::new(client),
        db: database.clone(),
        errors: errors.clone(),
        monitor: monitor.clone(),
        executor: ParallelExecutor::new(config.executor.clone()),
        metrics: Some(metrics),
    };
    let orchestrator = Arc::new(Orchestrator::with_default_services(
        ctx,
        changes.clone(),
        queue,
        config.strategies.clone(),
    ));

    Ok(Engine {
        database,
        orchestrator,
        changes,
        errors,
        monitor,
    })
}

async fn run_command(command: Command, config: &Config, engine: &Engine) -> anyhow::Result<()> {
    match command {
        Command::Sync {
            strategy,
            resources,
            async_mode,
            congress,
        } => {
            let mut options = SyncOptions::new(strategy, resources).with_async(async_mode);
            if let Some(congress) = congress {
                options = options.with_congress(congress);
            }
            let summary = engine.orchestrator.sync(&options).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Stats { hours } => {
            let days = (hours + 23) / 24;
            let report = json!({
                "sync": engine.orchestrator.get_sync_stats(hours).await?,
                "changes": engine.changes.get_change_stats(days.max(1)).await?,
                "errors": engine.errors.get_error_stats(hours).await?,
                "error_metrics": engine.errors.get_metrics(),
                "should_alert": engine.errors.should_alert(),
                "rate_limit": engine.monitor.get_stats(),
                "queue": engine.orchestrator.queue().get_queue_stats().await?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Drain { max_jobs } => {
            let outcomes = engine.orchestrator.drain(max_jobs).await?;
            for outcome in &outcomes {
                info!(
                    job_id = outcome.job_id,
                    run_id = outcome.run_id,
                    status = %outcome.status,
                    error = outcome.error.as_deref(),
                    "Job processed"
                );
            }
            println!("{} job(s) processed", outcomes.len());
        }

        Command::Queue { limit } => {
            let queue = engine.orchestrator.queue();
            let report = json!({
                "stats": queue.get_queue_stats().await?,
                "recent": queue.get_recent_jobs(limit).await?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Serve => serve(config, engine).await?,
    }

    Ok(())
}

/// Run the scheduler until Ctrl+C or SIGTERM
async fn serve(config: &Config, engine: &Engine) -> anyhow::Result<()> {
    if !config.scheduler.enabled {
        anyhow::bail!("Scheduler is disabled in configuration");
    }

    let tasks = StrategyTask::from_settings(&config.scheduler, engine.orchestrator.clone());
    if tasks.is_empty() {
        anyhow::bail!("No scheduled syncs configured");
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = SyncScheduler::new(SchedulerConfig::from(&config.scheduler), tasks, shutdown_rx);
    info!(
        jobs = config.scheduler.jobs.len(),
        database = %config.database.path,
        "Starting scheduler"
    );

    let handle = tokio::spawn(scheduler.run());

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    if let Err(e) = handle.await {
        error!(error = %e, "Scheduler task panicked");
    }

    // Report what is left in the ledger
    match engine.database.get_queue_stats().await {
        Ok(stats) => info!(pending = stats.pending, failed = stats.failed, "Queue state at shutdown"),
        Err(e) => warn!(error = %e, "Failed to read queue state"),
    }

    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
