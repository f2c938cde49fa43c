// src/core/tasks/offline_reaper.rs

//! A task that periodically marks robots without a recent heartbeat offline.

use crate::core::router::RobotRouter;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// How often the reaper sweeps the registry.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct OfflineReaper {
    router: Arc<RobotRouter>,
    offline_threshold: Duration,
}

impl OfflineReaper {
    pub fn new(router: Arc<RobotRouter>, offline_threshold: Duration) -> Self {
        Self {
            router,
            offline_threshold,
        }
    }

    /// Runs the sweep loop until shutdown.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            offline_threshold_sec = self.offline_threshold.as_secs(),
            "Offline reaper started."
        );
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        // The first tick fires immediately; skip it so a freshly started
        // server does not reap robots restored from a previous run before
        // they had a chance to heartbeat.
        interval.tick().await;

        let threshold = ChronoDuration::from_std(self.offline_threshold)
            .unwrap_or_else(|_| ChronoDuration::seconds(120));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reaped = self.router.mark_stale_offline(threshold);
                    if !reaped.is_empty() {
                        debug!(count = reaped.len(), "Reaper marked robots offline.");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Offline reaper shutting down.");
                    return;
                }
            }
        }
    }
}
