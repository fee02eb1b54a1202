//! sqlgated — the sqlgate daemon.
//!
//! Loads the gateway configuration, starts the routing workers, creates one
//! backend server per configured section and keeps their connection pools
//! swept until shut down.
//!
//! # Usage
//!
//! ```text
//! sqlgated run --config /etc/sqlgate/sqlgate.toml
//! sqlgated show --config /etc/sqlgate/sqlgate.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlgate_backend::{RoutingWorkers, Server};
use sqlgate_core::{GatewayConfig, ProtocolModules, StaticModules};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sqlgated", about = "sqlgate database gateway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the routing workers and maintain the backend server pools.
    Run {
        /// Path to sqlgate.toml.
        #[arg(long, default_value = "/etc/sqlgate/sqlgate.toml")]
        config: PathBuf,
    },
    /// Print the configured servers as JSON and exit.
    Show {
        /// Path to sqlgate.toml.
        #[arg(long, default_value = "/etc/sqlgate/sqlgate.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlgated=debug,sqlgate_backend=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::Show { config } => show(&config),
    }
}

fn load(path: &Path) -> anyhow::Result<(GatewayConfig, Vec<Arc<Server>>)> {
    let config = GatewayConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let modules: Arc<dyn ProtocolModules> = Arc::new(StaticModules::builtin());

    let servers = config
        .server_settings()?
        .into_iter()
        .map(|(name, settings)| {
            Server::new(&name, &settings, config.gateway.threads, Arc::clone(&modules))
                .map(Arc::new)
                .with_context(|| format!("invalid server '{name}'"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok((config, servers))
}

fn show(path: &Path) -> anyhow::Result<()> {
    let (_, servers) = load(path)?;
    for server in &servers {
        println!("{}", server.snapshot().to_json()?);
    }
    Ok(())
}

async fn run(path: &Path) -> anyhow::Result<()> {
    info!(config = %path.display(), "sqlgate daemon starting");

    let (config, servers) = load(path)?;
    let interval = config.maintenance_interval()?;

    // ── Persist the effective server sections ────────────────────

    std::fs::create_dir_all(&config.gateway.persist_dir).with_context(|| {
        format!("failed to create {}", config.gateway.persist_dir.display())
    })?;
    for server in &servers {
        server.persist(&config.gateway.persist_dir)?;
    }

    // ── Routing workers ──────────────────────────────────────────

    let workers = Arc::new(
        RoutingWorkers::start(config.gateway.threads).context("failed to start routing workers")?,
    );
    info!(
        servers = servers.len(),
        workers = workers.count(),
        interval = ?interval,
        "gateway ready"
    );

    // ── Shutdown signal ──────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let maintenance = tokio::spawn(maintain(
        Arc::clone(&workers),
        servers.clone(),
        interval,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = maintenance.await;

    // ── Drain pools and stop workers ─────────────────────────────

    for server in &servers {
        server.close_all_pooled_async(&workers).await;
    }

    match Arc::try_unwrap(workers) {
        Ok(workers) => tokio::task::spawn_blocking(move || workers.shutdown()).await?,
        Err(_) => warn!("routing workers still referenced, not joined"),
    }

    info!("sqlgate daemon stopped");
    Ok(())
}

/// Periodically sweep every server's pool on every worker.
async fn maintain(
    workers: Arc<RoutingWorkers>,
    servers: Vec<Arc<Server>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        for server in &servers {
            server.broadcast_evict_async(&workers).await;
            let pool = server.pool().stats().snapshot();
            info!(
                server = server.name(),
                status = %server.status_string(),
                pooled = pool.pooled,
                reused = pool.served_from_pool,
                connections = server.connection_stats().current(),
                "pool statistics"
            );
        }
    }
}
