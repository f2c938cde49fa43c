// src/config.rs

//! Manages platform configuration: loading, defaulting, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Authentication and token settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthConfig {
    /// HS256 signing secret. Left empty, a random ephemeral secret is
    /// generated at boot (tokens then do not survive restarts).
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(with = "humantime_serde", default = "default_access_token_ttl")]
    pub access_token_ttl: Duration,
    #[serde(with = "humantime_serde", default = "default_refresh_token_ttl")]
    pub refresh_token_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_ttl: default_access_token_ttl(),
            refresh_token_ttl: default_refresh_token_ttl(),
        }
    }
}

fn default_access_token_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}
fn default_refresh_token_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

/// Durable sync queue settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_max_size")]
    pub max_size: usize,
    #[serde(default = "default_queue_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_queue_batch_size")]
    pub batch_size: usize,
    /// SQLite file backing the queue. `None` keeps the queue in memory
    /// (non-durable, for tests and ephemeral use).
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_queue_max_size(),
            max_retry: default_queue_max_retry(),
            batch_size: default_queue_batch_size(),
            db_path: None,
        }
    }
}

fn default_queue_max_size() -> usize {
    500
}
fn default_queue_max_retry() -> u32 {
    3
}
fn default_queue_batch_size() -> usize {
    20
}

/// Robot liveness settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RobotConfig {
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_offline_threshold")]
    pub offline_threshold: Duration,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            offline_threshold: default_offline_threshold(),
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_offline_threshold() -> Duration {
    Duration::from_secs(120)
}

/// Command pipeline settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CommandConfig {
    #[serde(default = "default_command_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_command_timeout_ms(),
        }
    }
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

/// Cloud sync endpoint settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CloudConfig {
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,
    /// Bearer token presented to the Cloud API.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(with = "humantime_serde", default = "default_upload_timeout")]
    pub upload_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_probe_timeout")]
    pub probe_timeout: Duration,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_cloud_base_url(),
            api_token: None,
            upload_timeout: default_upload_timeout(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

fn default_cloud_base_url() -> String {
    "http://127.0.0.1:8800/api/cloud".to_string()
}
fn default_ssl_verify() -> bool {
    true
}
fn default_upload_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Sync result cache settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    /// Rolling count of sync result files kept in the platform cache dir.
    #[serde(default = "default_cache_retention")]
    pub retention_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention_count: default_cache_retention(),
        }
    }
}

fn default_cache_retention() -> usize {
    10
}

/// Queue flushing cadence. Flushing is externally triggered by default; an
/// interval arms the periodic flusher task.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SyncConfig {
    #[serde(with = "humantime_serde::option", default)]
    pub flush_interval: Option<Duration>,
}

/// Event bus and audit sink sizing.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EventsConfig {
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            audit_capacity: default_audit_capacity(),
        }
    }
}

fn default_history_size() -> usize {
    1024
}
fn default_audit_capacity() -> usize {
    4096
}

/// The top-level platform configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Identifier this Edge node reports to the Cloud.
    #[serde(default = "default_edge_id")]
    pub edge_id: String,
    /// TLS certificate verification for HTTPS endpoints (Cloud and robots).
    /// Disable only for development setups.
    #[serde(default = "default_ssl_verify")]
    pub ssl_verify: bool,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub robot: RobotConfig,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8790
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_edge_id() -> String {
    "edge-local".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            edge_id: default_edge_id(),
            ssl_verify: default_ssl_verify(),
            auth: AuthConfig::default(),
            queue: QueueConfig::default(),
            robot: RobotConfig::default(),
            command: CommandConfig::default(),
            cloud: CloudConfig::default(),
            cache: CacheConfig::default(),
            sync: SyncConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file and validates it.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.edge_id.trim().is_empty() {
            return Err(anyhow!("edge_id must not be empty"));
        }
        if self.queue.max_size == 0 {
            return Err(anyhow!("queue.max_size must be greater than zero"));
        }
        if self.queue.batch_size == 0 {
            return Err(anyhow!("queue.batch_size must be greater than zero"));
        }
        if self.robot.offline_threshold < self.robot.heartbeat_interval {
            return Err(anyhow!(
                "robot.offline_threshold must be at least robot.heartbeat_interval"
            ));
        }
        if self.command.default_timeout_ms < 100 || self.command.default_timeout_ms > 600_000 {
            return Err(anyhow!(
                "command.default_timeout_ms must be within [100, 600000]"
            ));
        }
        if self.cloud.base_url.trim().is_empty() {
            return Err(anyhow!("cloud.base_url must not be empty"));
        }
        Ok(())
    }
}
