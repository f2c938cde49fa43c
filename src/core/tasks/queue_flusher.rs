// src/core/tasks/queue_flusher.rs

//! An optional task that drains the sync queue on a fixed cadence. Flushing
//! is externally triggered by default; this task only runs when
//! `[sync] flush_interval` is configured.

use crate::core::sync::SyncService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct QueueFlusher {
    sync: Arc<SyncService>,
    interval: Duration,
}

impl QueueFlusher {
    pub fn new(sync: Arc<SyncService>, interval: Duration) -> Self {
        Self { sync, interval }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            interval_sec = self.interval.as_secs(),
            "Periodic queue flusher started."
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.sync.queue_size() == 0 {
                        continue;
                    }
                    let report = self.sync.flush_queue().await;
                    debug!(
                        sent = report.sent,
                        failed = report.failed,
                        remaining = report.remaining,
                        "Periodic queue flush completed."
                    );
                }
                _ = shutdown_rx.recv() => {
                    info!("Periodic queue flusher shutting down.");
                    return;
                }
            }
        }
    }
}
