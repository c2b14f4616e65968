//! Nodepool - Entry Point
//!
//! CLI for keeping node connections alive across configured networks.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use nodepool::connection::{ConnectionManager, ManagerEvent};
use nodepool::transport::TcpConnector;
use nodepool::{Config, VERSION};

/// Nodepool - fault-tolerant connections to remote network nodes
#[derive(Parser)]
#[command(name = "nodepool")]
#[command(version = VERSION)]
#[command(about = "Keeps live connections to the nodes of several networks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect every configured network and keep the connections alive
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "nodepool.toml")]
        config: PathBuf,
    },
    /// Connect once, report status, and exit
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "nodepool.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Check { config } => check(config).await,
    }
}

fn load(config_path: &Path) -> Result<Config> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    nodepool::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        networks = config.networks.len(),
        "Starting Nodepool"
    );

    Ok(config)
}

fn build_manager(config: &Config) -> Arc<ConnectionManager<TcpConnector>> {
    ConnectionManager::new(
        TcpConnector::new(config.transport.clone()),
        Arc::new(config.options()),
        config.manager_config(),
    )
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = load(&config_path)?;

    if config.metrics.enabled {
        nodepool::metrics::init_metrics(&config.metrics)?;
        info!(bind_addr = %config.metrics.bind_addr, "Metrics endpoint started");
    }

    let manager = build_manager(&config);

    if let Some(api_addr) = config.metrics.api_addr {
        nodepool::metrics::start_api_server(api_addr, manager.clone());
    }

    tokio::spawn(log_events(manager.subscribe_events()));

    for (network, report) in manager.connect_networks(config.endpoints()).await {
        info!(
            %network,
            connected = report.connected.len(),
            dropped = report.dropped.len(),
            "Network connected"
        );
    }

    if config.connect.status_interval_secs > 0 {
        let manager = manager.clone();
        let period = Duration::from_secs(config.connect.status_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if manager.is_shut_down() {
                    break;
                }
                manager.report_status();
            }
        });
    }

    shutdown_signal().await;
    info!("Shutdown signal received, closing connections...");
    manager.shutdown().await;

    info!("Nodepool stopped");
    Ok(())
}

async fn check(config_path: PathBuf) -> Result<()> {
    let config = load(&config_path)?;
    let manager = build_manager(&config);

    manager.connect_networks(config.endpoints()).await;
    let status = manager.report_status();

    let unreachable: Vec<String> = config
        .networks
        .iter()
        .filter(|network| {
            !status
                .iter()
                .any(|s| s.network == network.id && s.connected_count() > 0)
        })
        .map(|network| network.id.to_string())
        .collect();

    manager.shutdown().await;

    if !unreachable.is_empty() {
        anyhow::bail!("no live connection for: {}", unreachable.join(", "));
    }
    Ok(())
}

/// Surface manager lifecycle events in the log
async fn log_events(mut events: broadcast::Receiver<ManagerEvent>) {
    loop {
        match events.recv().await {
            Ok(ManagerEvent::ReconnectFailed {
                network,
                endpoint,
                attempts,
                reason,
            }) => {
                warn!(%network, %endpoint, attempts, %reason, "Endpoint lost until next restart");
            }
            Ok(event) => tracing::debug!(?event, "Manager event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Manager event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
