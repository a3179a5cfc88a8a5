//! Periodic token sweep.
//!
//! Expired tokens are kept for `tokens.retention_days` for auditing, then
//! deleted by this task every `tokens.sweep_interval_secs`.

use std::time::Duration;

use portal_enroll::Portal;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Run one sweep on the blocking pool.
pub async fn sweep_once(portal: &Portal) -> Option<usize> {
    let portal = portal.clone();
    match tokio::task::spawn_blocking(move || portal.sweep_expired()).await {
        Ok(Ok(deleted)) => Some(deleted),
        Ok(Err(e)) => {
            error!(error = %e, "Token sweep failed");
            None
        }
        Err(e) => {
            error!(error = %e, "Token sweep task panicked");
            None
        }
    }
}

/// Sweep on a fixed interval until shutdown.
pub async fn run(portal: Portal, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
    info!(interval_secs = interval.as_secs(), "Token sweeper started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(deleted) = sweep_once(&portal).await {
                    debug!(deleted, "Token sweep complete");
                }
            }
            _ = shutdown.recv() => {
                info!("Token sweeper stopping");
                break;
            }
        }
    }
}
