// crates/woo-daemon/src/main.rs
//
// Binary entrypoint for the WOO staking daemon.
//
// Parses CLI arguments, loads configuration, initializes tracing, wires the
// home domain and the configured remote domains, then runs the block
// ticker, auto-compound job, bridge relay and snapshot job until Ctrl-C.
// A final snapshot is written on the way out.

mod config;
mod node;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;

use config::{expand_tilde, DaemonConfig};
use node::HomeNode;

/// WOO staking daemon: simulated home domain plus bridged remote domains.
#[derive(Parser, Debug)]
#[command(name = "woo-daemon", version = "0.1.0", about = "WOO multi-tier staking daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.woo/config.toml")]
    config: String,

    /// Home domain id; overrides `bridge.home_domain`.
    #[arg(long)]
    home_domain: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config_path = expand_tilde(&args.config);
    let loaded = DaemonConfig::load(&config_path);
    let log_level = loaded
        .as_ref()
        .map(|cfg| cfg.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize tracing subscriber for structured logging. RUST_LOG wins
    // over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    let mut daemon_config = match loaded {
        Ok(cfg) => {
            tracing::info!("Loaded configuration from {}", config_path);
            cfg
        }
        Err(e) => {
            tracing::warn!(
                "Could not load config from {}: {}. Using defaults.",
                config_path,
                e
            );
            DaemonConfig::default()
        }
    };

    // CLI --home-domain flag overrides the config file value.
    if let Some(domain) = args.home_domain {
        daemon_config.bridge.home_domain = domain;
    }

    tracing::info!("WOO staking daemon v0.1.0");
    tracing::info!("Home domain: {}", daemon_config.bridge.home_domain);
    tracing::info!("Storage: {} ({})", daemon_config.storage, daemon_config.data_dir);
    tracing::info!("Block interval: {}s", daemon_config.block_interval_secs);

    let node = Arc::new(HomeNode::build(daemon_config).await?);
    let cfg = &node.config;
    let block_interval = Duration::from_secs(cfg.block_interval_secs);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = vec![
        tokio::spawn(tasks::run_block_ticker(
            node.clock.clone(),
            block_interval,
            shutdown_rx.clone(),
        )),
        tokio::spawn(tasks::run_auto_compound(
            node.manager.clone(),
            cfg.manager.owner,
            cfg.manager.compound_interval_secs,
            shutdown_rx.clone(),
        )),
        tokio::spawn(tasks::run_bridge_relay(
            node.transport.clone(),
            block_interval,
            shutdown_rx.clone(),
        )),
        tokio::spawn(tasks::run_snapshots(
            node.clone(),
            cfg.snapshot_interval_secs,
            shutdown_rx,
        )),
    ];

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Background task panicked: {}", e);
        }
    }

    if let Err(e) = node.persist().await {
        tracing::error!("Final snapshot failed: {}", e);
    }
    tracing::info!("WOO staking daemon shut down gracefully");
    Ok(())
}
