// crates/woo-daemon/src/tasks.rs
//
// Background loops of the daemon.
//
// Each loop sleeps for its interval, does one unit of work, and exits when
// the shutdown channel flips. Errors are logged; a loop never stops on a
// failed iteration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use woo_bridge::InMemoryTransport;
use woo_core::clock::{Clock, ManualClock};
use woo_core::types::Address;
use woo_staking::StakingManager;

use crate::node::{wall_clock_now, HomeNode};

/// Produce one home-domain block per interval, keeping the simulated clock
/// no earlier than wall-clock time.
pub async fn run_block_ticker(clock: Arc<ManualClock>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("Block ticker started (interval={:?})", interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {
                clock.mine(1);
                let wall = wall_clock_now();
                if wall > clock.now() {
                    clock.set_time(wall);
                }
                tracing::trace!("Block {} at {}", clock.block_number(), clock.now());
            }
        }
    }
    tracing::info!("Block ticker stopped");
}

/// Compound every member of the compounder once per interval.
pub async fn run_auto_compound(
    manager: Arc<StakingManager>,
    operator: Address,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Auto-compound job started (interval={}s)", interval_secs);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {
                match manager.compound_all_users(&operator).await {
                    Ok(report) => {
                        if !report.compounded.is_empty() || !report.failed.is_empty() {
                            tracing::info!(
                                "Auto-compound: {} compounded, {} failed",
                                report.compounded.len(),
                                report.failed.len()
                            );
                        }
                    }
                    Err(e) => tracing::error!("Auto-compound run failed: {}", e),
                }
            }
        }
    }
    tracing::info!("Auto-compound job stopped");
}

/// Pump the cross-domain transport.
pub async fn run_bridge_relay(transport: InMemoryTransport, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("Bridge relay started (interval={:?})", interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {
                let report = transport.deliver_pending().await;
                if report.delivered > 0 {
                    tracing::debug!("Bridge relay delivered {} message(s)", report.delivered);
                }
                for (envelope, error) in &report.rejected {
                    tracing::warn!(
                        "Bridge relay dropped message {} -> {} from {}: {}",
                        envelope.source,
                        envelope.dest,
                        envelope.sender,
                        error
                    );
                }
            }
        }
    }
    tracing::info!("Bridge relay stopped");
}

/// Write a snapshot of all state once per interval.
pub async fn run_snapshots(node: Arc<HomeNode>, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("Snapshot job started (interval={}s)", interval_secs);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {
                match node.persist().await {
                    Ok(()) => tracing::debug!("Snapshot written at block {}", node.clock.block_number()),
                    Err(e) => tracing::error!("Snapshot failed: {}", e),
                }
            }
        }
    }
    tracing::info!("Snapshot job stopped");
}
