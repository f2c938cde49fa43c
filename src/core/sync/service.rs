// src/core/sync/service.rs

//! The sync service: converts domain-level calls into Cloud API requests,
//! transparently enqueuing payloads when the transport fails, and drains the
//! queue back out through a per-`op_type` dispatch table.

use crate::core::events::EventBus;
use crate::core::models::{EventCategory, EventSeverity};
use crate::core::shared_state::SharedState;
use crate::core::sync::client::CloudClient;
use crate::core::sync::queue::{FlushReport, QueueStatistics, SyncQueue};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A locally approved advanced command, ready for catalog upload. The
/// catalog entry itself is opaque to the core; persistence of these records
/// belongs to the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedCommand {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub content: String,
    pub version: u32,
    pub author_username: String,
    pub author_email: String,
}

/// Outcome of a single domain sync call.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    fn delivered() -> Self {
        Self {
            success: true,
            queued: false,
            op_id: None,
            updated_at: None,
            synced_count: None,
            total: None,
            error: None,
        }
    }

    fn queued(op_id: String) -> Self {
        Self {
            success: false,
            queued: true,
            op_id: Some(op_id),
            updated_at: None,
            synced_count: None,
            total: None,
            error: None,
        }
    }

    fn rejected(error: String) -> Self {
        Self {
            success: false,
            queued: false,
            op_id: None,
            updated_at: None,
            synced_count: None,
            total: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSyncError {
    pub command_id: u64,
    pub command_name: String,
    pub error: String,
}

/// Outcome of a catalog sweep over approved commands.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSyncReport {
    pub total: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub errors: Vec<CatalogSyncError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudStatus {
    pub available: bool,
    pub edge_id: String,
    pub last_check: String,
    pub sync_queue: QueueStatistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

pub struct SyncService {
    client: CloudClient,
    queue: SyncQueue,
    edge_id: String,
    cache_dir: Option<PathBuf>,
    retention_count: usize,
    /// Two concurrent flushes against the same queue would break the batch
    /// accounting; serialize them here.
    flush_lock: Mutex<()>,
    shared: Arc<SharedState>,
    bus: Arc<EventBus>,
}

impl SyncService {
    pub fn new(
        client: CloudClient,
        queue: SyncQueue,
        edge_id: &str,
        cache_dir: Option<PathBuf>,
        retention_count: usize,
        shared: Arc<SharedState>,
        bus: Arc<EventBus>,
    ) -> Self {
        if let Some(dir) = &cache_dir {
            debug!(cache_dir = %dir.display(), "Sync result cache directory resolved.");
        } else {
            debug!("No cache directory available, sync result caching disabled.");
        }
        Self {
            client,
            queue,
            edge_id: edge_id.to_string(),
            cache_dir,
            retention_count,
            flush_lock: Mutex::new(()),
            shared,
            bus,
        }
    }

    // ==================== domain sync calls ====================

    /// Backs up a user's settings to the Cloud. On transport failure the
    /// payload is enqueued and replayed in order by the next flush.
    pub async fn sync_user_settings(&self, user_id: &str, settings: &Value) -> SyncReport {
        match self
            .client
            .upload_user_settings(user_id, settings, &self.edge_id)
            .await
        {
            Ok(ack) if ack.success => {
                info!(user_id, "User settings synced to cloud.");
                SyncReport {
                    updated_at: ack.updated_at,
                    ..SyncReport::delivered()
                }
            }
            Ok(_) => {
                warn!(user_id, "Cloud rejected user settings sync.");
                SyncReport::rejected("cloud rejected the upload".to_string())
            }
            Err(e) => {
                warn!(user_id, error = %e, "Cloud unavailable, queuing user settings.");
                self.enqueue_sync_op(
                    "user_settings",
                    json!({
                        "user_id": user_id,
                        "settings": settings,
                        "edge_id": self.edge_id,
                    }),
                )
            }
        }
    }

    /// Restores a user's settings backup from the Cloud.
    pub async fn restore_user_settings(&self, user_id: &str) -> Option<Value> {
        match self.client.download_user_settings(user_id).await {
            Ok(Some(settings)) => {
                info!(user_id, "Restored settings from cloud.");
                Some(settings)
            }
            Ok(None) => {
                warn!(user_id, "No cloud settings found.");
                None
            }
            Err(e) => {
                error!(user_id, error = %e, "Error restoring user settings.");
                None
            }
        }
    }

    /// Uploads a batch of command history records. An empty batch is a no-op
    /// success.
    pub async fn sync_command_history(&self, user_id: &str, records: &[Value]) -> SyncReport {
        if records.is_empty() {
            return SyncReport {
                synced_count: Some(0),
                total: Some(0),
                ..SyncReport::delivered()
            };
        }

        match self
            .client
            .upload_command_history(user_id, records, &self.edge_id)
            .await
        {
            Ok(ack) if ack.success => {
                info!(user_id, synced_count = ack.synced_count, "Command history synced.");
                SyncReport {
                    synced_count: Some(ack.synced_count),
                    total: Some(ack.total),
                    ..SyncReport::delivered()
                }
            }
            Ok(_) => {
                warn!(user_id, "Cloud rejected command history sync.");
                SyncReport::rejected("cloud rejected the upload".to_string())
            }
            Err(e) => {
                warn!(user_id, error = %e, "Cloud unavailable, queuing command history.");
                self.enqueue_sync_op(
                    "command_history",
                    json!({
                        "user_id": user_id,
                        "records": records,
                        "edge_id": self.edge_id,
                    }),
                )
            }
        }
    }

    /// Uploads every approved command to the shared catalog, collecting
    /// per-item failures. The result summary is cached for later inspection.
    pub async fn sync_approved_commands(&self, commands: &[ApprovedCommand]) -> CatalogSyncReport {
        let mut report = CatalogSyncReport {
            total: commands.len(),
            uploaded: 0,
            failed: 0,
            errors: Vec::new(),
        };

        for command in commands {
            let outcome = self
                .client
                .upload_shared_command(
                    &command.name,
                    &command.description,
                    &command.category,
                    &command.content,
                    &command.author_username,
                    &command.author_email,
                    command.id,
                    command.version,
                )
                .await;

            match outcome {
                Ok(ack) if ack.success => {
                    report.uploaded += 1;
                    info!(name = %command.name, "Synced approved command to cloud.");
                }
                Ok(_) => {
                    report.failed += 1;
                    report.errors.push(CatalogSyncError {
                        command_id: command.id,
                        command_name: command.name.clone(),
                        error: "cloud rejected the upload".to_string(),
                    });
                    warn!(name = %command.name, "Failed to sync approved command.");
                }
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(CatalogSyncError {
                        command_id: command.id,
                        command_name: command.name.clone(),
                        error: e.to_string(),
                    });
                    error!(name = %command.name, error = %e, "Error syncing approved command.");
                }
            }
        }

        info!(
            uploaded = report.uploaded,
            failed = report.failed,
            "Approved command sync completed."
        );
        self.cache_sync_result(&report);
        report
    }

    // ==================== queue draining ====================

    /// Drains the sync queue in insertion order, dispatching each item back
    /// to its Cloud endpoint by `op_type`.
    pub async fn flush_queue(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        let report = self
            .queue
            .flush(|op_type, payload| self.dispatch_queued(op_type, payload))
            .await;

        self.publish_queue_state();
        self.bus.emit(
            "sync.flush_completed",
            &Uuid::new_v4().to_string(),
            EventSeverity::Info,
            EventCategory::Sync,
            "sync queue flush completed",
            json!({
                "sent": report.sent,
                "failed": report.failed,
                "remaining": report.remaining,
            }),
        );
        report
    }

    async fn dispatch_queued(&self, op_type: String, payload: Value) -> bool {
        match op_type.as_str() {
            "user_settings" => {
                let Some(user_id) = payload.get("user_id").and_then(Value::as_str) else {
                    error!("Queued user_settings item is missing user_id.");
                    return false;
                };
                let settings = payload.get("settings").cloned().unwrap_or(Value::Null);
                let edge_id = payload
                    .get("edge_id")
                    .and_then(Value::as_str)
                    .unwrap_or(&self.edge_id);
                match self
                    .client
                    .upload_user_settings(user_id, &settings, edge_id)
                    .await
                {
                    Ok(ack) => ack.success,
                    Err(e) => {
                        debug!(error = %e, "Queued user_settings dispatch failed.");
                        false
                    }
                }
            }
            "command_history" => {
                let Some(user_id) = payload.get("user_id").and_then(Value::as_str) else {
                    error!("Queued command_history item is missing user_id.");
                    return false;
                };
                let records: Vec<Value> = payload
                    .get("records")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let edge_id = payload
                    .get("edge_id")
                    .and_then(Value::as_str)
                    .unwrap_or(&self.edge_id);
                match self
                    .client
                    .upload_command_history(user_id, &records, edge_id)
                    .await
                {
                    Ok(ack) => ack.success,
                    Err(e) => {
                        debug!(error = %e, "Queued command_history dispatch failed.");
                        false
                    }
                }
            }
            other => {
                warn!(op_type = other, "Unknown op_type in sync queue.");
                false
            }
        }
    }

    // ==================== status ====================

    /// Marks the Cloud reachable/unreachable for external consumers.
    pub fn set_cloud_available(&self, is_available: bool) {
        self.queue.set_online(is_available);
        self.shared.set(
            "service:cloud",
            json!({ "available": is_available, "edge_id": self.edge_id }),
        );
    }

    /// Probes the Cloud and reports availability plus queue statistics.
    pub async fn get_cloud_status(&self) -> CloudStatus {
        let available = self.client.health_check().await;

        let categories = if available {
            self.client.categories().await.ok()
        } else {
            None
        };

        CloudStatus {
            available,
            edge_id: self.edge_id.clone(),
            last_check: Utc::now().to_rfc3339(),
            sync_queue: self.queue.statistics(),
            categories,
        }
    }

    pub fn queue_statistics(&self) -> QueueStatistics {
        self.queue.statistics()
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    // ==================== internal ====================

    fn enqueue_sync_op(&self, op_type: &str, payload: Value) -> SyncReport {
        let trace_id = Uuid::new_v4().to_string();
        let report = match self.queue.enqueue(op_type, &payload, Some(&trace_id)) {
            Some(op_id) => {
                self.bus.emit(
                    "sync.enqueued",
                    &trace_id,
                    EventSeverity::Warn,
                    EventCategory::Sync,
                    format!("cloud unavailable, queued {op_type} operation"),
                    json!({ "op_id": op_id, "op_type": op_type }),
                );
                SyncReport::queued(op_id)
            }
            None => SyncReport::rejected("queue full".to_string()),
        };
        self.publish_queue_state();
        report
    }

    fn publish_queue_state(&self) {
        let stats = self.queue.statistics();
        self.shared.set("queue:status", json!(stats));
    }

    /// Writes the catalog sync summary under the platform cache directory,
    /// then enforces the rolling retention.
    fn cache_sync_result(&self, report: &CatalogSyncReport) {
        let Some(cache_dir) = &self.cache_dir else {
            return;
        };

        if let Err(e) = std::fs::create_dir_all(cache_dir) {
            warn!(error = %e, "Failed to create sync cache directory.");
            return;
        }

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let file = cache_dir.join(format!("sync_result_{}_{stamp}.json", self.edge_id));
        let body = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "edge_id": self.edge_id,
            "results": report,
        });

        match serde_json::to_string_pretty(&body) {
            Ok(contents) => {
                if let Err(e) = std::fs::write(&file, contents) {
                    warn!(error = %e, "Failed to cache sync results.");
                    return;
                }
                debug!(file = %file.display(), "Cached sync results.");
                self.cleanup_cache();
            }
            Err(e) => warn!(error = %e, "Failed to serialize sync results."),
        }
    }

    /// Keeps only the newest `retention_count` result files for this edge.
    fn cleanup_cache(&self) {
        let Some(cache_dir) = &self.cache_dir else {
            return;
        };
        let prefix = format!("sync_result_{}_", self.edge_id);

        let entries = match std::fs::read_dir(cache_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list sync cache directory.");
                return;
            }
        };

        let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".json"))
            })
            .filter_map(|entry| {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, entry.path()))
            })
            .collect();

        files.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, old_file) in files.into_iter().skip(self.retention_count) {
            if let Err(e) = std::fs::remove_file(&old_file) {
                warn!(file = %old_file.display(), error = %e, "Failed to remove old cache file.");
            } else {
                debug!(file = %old_file.display(), "Removed old cache file.");
            }
        }
    }
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("edge_id", &self.edge_id)
            .field("cache_dir", &self.cache_dir)
            .field("retention_count", &self.retention_count)
            .finish_non_exhaustive()
    }
}
