//! EdgeSync - replica sync tool
//!
//! Runs replica syncs in the foreground, queues background syncs and hosts
//! the worker that drains the background queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgesync::config::EdgeSyncConfig;
use edgesync::manager::DatabaseManager;
use edgesync::queue::{SqliteQueue, TaskQueue, TaskSource};
use edgesync::sync::{ProcessSyncRunner, SyncCoordinator, SyncRunner, SyncWorker};

/// EdgeSync - replica-aware libSQL connections
#[derive(Parser)]
#[command(name = "edgesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "edgesync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync changes from the remote database to the local replica now
    Sync {
        /// Connection name (defaults to the configured default)
        connection: Option<String>,
    },

    /// Queue a background sync for a worker
    Enqueue {
        /// Connection name (defaults to the configured default)
        connection: Option<String>,
    },

    /// Run the background sync worker until Ctrl+C
    Worker,

    /// Show background queue counts
    QueueStatus,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "edgesync.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { output } = &cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("info"));
        return run_init(output);
    }

    let config = EdgeSyncConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    let config = Arc::new(config);

    match cli.command {
        Commands::Sync { connection } => run_sync(config, connection).await,
        Commands::Enqueue { connection } => run_enqueue(config, connection).await,
        Commands::Worker => run_worker(config).await,
        Commands::QueueStatus => run_queue_status(config).await,
        Commands::Validate => run_validate(&config),
        Commands::Init { .. } => Ok(()),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Coordinator backed by the external sync process and the durable queue
fn build_coordinator(config: &EdgeSyncConfig) -> anyhow::Result<(Arc<SyncCoordinator>, Arc<SqliteQueue>)> {
    let queue = Arc::new(
        SqliteQueue::open(&config.queue.path, config.queue.max_attempts)
            .with_context(|| format!("failed to open task queue {:?}", config.queue.path))?
            .with_lease_timeout(config.lease_timeout()),
    );
    let runner: Arc<dyn SyncRunner> = Arc::new(ProcessSyncRunner::from_config(&config.sync));
    let coordinator = Arc::new(SyncCoordinator::new(
        runner,
        Arc::clone(&queue) as Arc<dyn TaskQueue>,
        config.sync_timeout(),
    ));
    Ok((coordinator, queue))
}

/// Foreground sync of one connection
async fn run_sync(config: Arc<EdgeSyncConfig>, connection: Option<String>) -> anyhow::Result<()> {
    let (coordinator, _queue) = build_coordinator(&config)?;
    let (name, conn) = config.connection(connection.as_deref())?;

    let output = coordinator.sync(name, conn).await?;
    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        println!("{}", stdout);
    }
    Ok(())
}

/// Queue a background sync through a connection
async fn run_enqueue(config: Arc<EdgeSyncConfig>, connection: Option<String>) -> anyhow::Result<()> {
    let (coordinator, _queue) = build_coordinator(&config)?;
    let manager = DatabaseManager::new(Arc::clone(&config), coordinator);

    let mut conn = manager.connection(connection.as_deref()).await?;
    conn.background_sync().await?;
    println!("Queued background sync for '{}'", conn.name());
    Ok(())
}

/// Drain the durable queue until interrupted
async fn run_worker(config: Arc<EdgeSyncConfig>) -> anyhow::Result<()> {
    let (coordinator, queue) = build_coordinator(&config)?;
    let worker = SyncWorker::new(Arc::clone(&config), coordinator, queue as Arc<dyn TaskSource>);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await?;
    Ok(())
}

async fn run_queue_status(config: Arc<EdgeSyncConfig>) -> anyhow::Result<()> {
    let (_coordinator, queue) = build_coordinator(&config)?;
    let stats = queue.stats().await?;

    println!("Queue: {}", queue.path().display());
    println!("  pending: {}", stats.pending);
    println!("  running: {}", stats.running);
    println!("  failed:  {}", stats.failed);
    Ok(())
}

fn run_init(output: &PathBuf) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    std::fs::write(output, EdgeSyncConfig::sample())
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Configuration written to {}", output.display());
    Ok(())
}

fn run_validate(config: &EdgeSyncConfig) -> anyhow::Result<()> {
    println!("Configuration is valid");
    println!("  default connection: {}", config.default);
    for (name, conn) in &config.connections {
        let replica = conn
            .replica_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<16} {:?}  {}  replica: {}",
            name,
            conn.driver,
            conn.endpoint_url(),
            replica
        );
    }
    Ok(())
}
