// src/core/state.rs

//! Defines the central `ServerState` struct, holding all shared platform
//! components. Wiring happens once here; every task and request handler
//! receives the assembled `Arc<ServerState>`.

use crate::config::Config;
use crate::core::audit::AuditSink;
use crate::core::auth::AuthManager;
use crate::core::context::ContextStore;
use crate::core::errors::EdgeLinkError;
use crate::core::events::EventBus;
use crate::core::handler::CommandHandler;
use crate::core::router::{Dispatcher, RobotRouter};
use crate::core::shared_state::SharedState;
use crate::core::sync::{CloudClient, SyncQueue, SyncService};
use directories::ProjectDirs;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, reload};

/// Bound on stored command contexts before the oldest are evicted.
const CONTEXT_CAPACITY: usize = 10_000;

/// The central struct holding all shared platform state. Constructed once by
/// [`ServerState::initialize`] and passed around as `Arc<ServerState>`.
#[derive(Debug)]
pub struct ServerState {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub audit: Arc<AuditSink>,
    pub shared: Arc<SharedState>,
    pub auth: Arc<AuthManager>,
    pub contexts: Arc<ContextStore>,
    pub router: Arc<RobotRouter>,
    pub sync: Arc<SyncService>,
    pub handler: Arc<CommandHandler>,
    /// A handle to the logging filter, allowing for dynamic log level
    /// changes at runtime.
    pub log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    /// Broadcast to every background task on shutdown.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerState {
    /// Initializes the entire platform state from the given configuration.
    pub fn initialize(
        config: Config,
        log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    ) -> Result<Arc<Self>, EdgeLinkError> {
        let bus = Arc::new(EventBus::new(config.events.history_size));
        let audit = Arc::new(AuditSink::new(config.events.audit_capacity));
        let shared = Arc::new(SharedState::new(bus.clone()));

        // An unset JWT secret gets a random ephemeral one so development
        // instances start; tokens then do not survive restarts.
        let secret = if config.auth.jwt_secret.is_empty() {
            warn!("auth.jwt_secret is not configured; using a random ephemeral secret.");
            let mut bytes = [0u8; 32];
            getrandom::fill(&mut bytes).map_err(|e| EdgeLinkError::Internal(e.to_string()))?;
            hex::encode(bytes)
        } else {
            config.auth.jwt_secret.clone()
        };

        let auth = Arc::new(AuthManager::new(
            secret.as_bytes(),
            config.auth.access_token_ttl,
            config.auth.refresh_token_ttl,
            bus.clone(),
        ));

        let contexts = Arc::new(ContextStore::new(CONTEXT_CAPACITY));

        let dispatcher = Dispatcher::new(config.ssl_verify)?;
        let router = Arc::new(RobotRouter::new(dispatcher, bus.clone(), shared.clone()));

        let client = CloudClient::new(
            &config.cloud.base_url,
            &config.edge_id,
            config.cloud.api_token.as_deref(),
            config.ssl_verify,
            config.cloud.upload_timeout,
            config.cloud.probe_timeout,
        )?;

        let queue = match &config.queue.db_path {
            Some(path) => SyncQueue::open(
                path,
                config.queue.max_size,
                config.queue.max_retry,
                config.queue.batch_size,
            )?,
            None => SyncQueue::open_in_memory(
                config.queue.max_size,
                config.queue.max_retry,
                config.queue.batch_size,
            )?,
        };

        let cache_dir = ProjectDirs::from("", "", "edgelink")
            .map(|dirs| dirs.cache_dir().join("sync"));
        if cache_dir.is_none() {
            warn!("No platform cache directory available; sync result caching disabled.");
        }

        let sync = Arc::new(SyncService::new(
            client,
            queue,
            &config.edge_id,
            cache_dir,
            config.cache.retention_count,
            shared.clone(),
            bus.clone(),
        ));

        let handler = Arc::new(CommandHandler::new(
            router.clone(),
            contexts.clone(),
            auth.clone(),
            bus.clone(),
            config.command.default_timeout_ms,
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            config,
            bus,
            audit,
            shared,
            auth,
            contexts,
            router,
            sync,
            handler,
            log_reload_handle,
            shutdown_tx,
        }))
    }
}
