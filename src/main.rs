use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cube::{
    config::{ManagerConfig, WorkerConfig},
    manager::{
        manager::{process_tasks, reconcile_tasks},
        types::{Manager, ManagerServer},
    },
    tasks::docker::DockerClient,
    worker::{
        stats::collect_stats,
        types::{TaskServer, Worker},
        worker::{monitor_tasks, run_tasks},
    },
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cube", about = "A minimal container orchestrator")]
struct Cli {
    #[arg(long, env = "CUBE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[arg(long, env = "CUBE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a worker: executes tasks through the local Docker engine.
    Worker(WorkerConfig),
    /// Run the manager: schedules tasks onto workers and reconciles their state.
    Manager(ManagerConfig),
}

fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).try_init(),
    }
    .context("failed to initialise logging")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

async fn run_worker(config: WorkerConfig) -> Result<()> {
    let runtime = DockerClient::new().context("failed to connect to docker")?;
    let worker = Arc::new(Worker::new(&config.name, Arc::new(runtime)));

    tokio::spawn(run_tasks(worker.clone(), config.run_interval()));
    tokio::spawn(collect_stats(worker.clone(), config.stats_interval()));
    tokio::spawn(monitor_tasks(worker.clone(), config.monitor_interval()));

    TaskServer::new(worker, &config.host, config.port)
        .start_server(shutdown_signal())
        .await
        .context("worker api failed")
}

async fn run_manager(config: ManagerConfig) -> Result<()> {
    let manager = Arc::new(Manager::new(
        config.workers.clone(),
        config.request_timeout(),
        config.max_dispatch_attempts,
    )?);

    tokio::spawn(process_tasks(manager.clone(), config.dispatch_interval()));
    tokio::spawn(reconcile_tasks(manager.clone(), config.reconcile_interval()));

    ManagerServer::new(manager, &config.host, config.port)
        .start_server(shutdown_signal())
        .await
        .context("manager api failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    match cli.command {
        Command::Worker(config) => run_worker(config).await,
        Command::Manager(config) => run_manager(config).await,
    }
}
