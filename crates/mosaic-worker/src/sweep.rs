//! Periodic transcode status sweep.

use mosaic_orchestrator::Orchestrator;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Poll pending transcode jobs every `interval` until shutdown.
///
/// Returns `None` when `interval` is zero, which disables the sweep.
pub fn spawn_transcode_sweep(
    orchestrator: Orchestrator,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::info!("Transcode sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_secs = interval.as_secs(), "Transcode sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = orchestrator.sweep_transcode_jobs().await {
                        tracing::error!(error = %e, "Transcode sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Transcode sweep stopped");
    }))
}
