// src/server/mod.rs

//! Server assembly: initializes the shared state, spawns background tasks,
//! and serves the HTTP API until shutdown.

pub mod routes;

pub use routes::app;

use crate::config::Config;
use crate::core::state::ServerState;
use crate::core::tasks::offline_reaper::OfflineReaper;
use crate::core::tasks::queue_flusher::QueueFlusher;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

/// Starts every long-lived background task against the shared state. Tasks
/// stop when the state's shutdown channel fires.
pub fn spawn_background_tasks(state: &Arc<ServerState>) {
    let audit = state.audit.clone();
    tokio::spawn(audit.run(state.bus.subscribe_all(), state.shutdown_tx.subscribe()));

    let reaper = OfflineReaper::new(state.router.clone(), state.config.robot.offline_threshold);
    tokio::spawn(reaper.run(state.shutdown_tx.subscribe()));

    if let Some(interval) = state.config.sync.flush_interval {
        let flusher = QueueFlusher::new(state.sync.clone(), interval);
        tokio::spawn(flusher.run(state.shutdown_tx.subscribe()));
    }
}

/// Runs the platform: state initialization, background tasks, and the HTTP
/// listener with graceful shutdown on ctrl-c.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    let state = ServerState::initialize(config, log_reload_handle)?;
    spawn_background_tasks(&state);

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("EdgeLink listening on http://{addr}");

    let shutdown_tx = state.shutdown_tx.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received.");
            let _ = shutdown_tx.send(());
        })
        .await?;

    Ok(())
}
