// src/core/sync/queue.rs

//! The durable sync queue: a crash-safe, ordered, bounded FIFO buffer for
//! cross-node operations that must be delivered even if the transport is
//! unavailable.
//!
//! Ordering is guaranteed by a monotonically increasing `seq` column with a
//! UNIQUE index; `flush` drains strictly in ascending `seq`. Rows are deleted
//! on successful dispatch, so delivery is at-least-once: a row either reaches
//! the handler or resurfaces on the next start.

use crate::core::errors::EdgeLinkError;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{error, info, warn};

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS sync_queue (
        id         TEXT    PRIMARY KEY,
        seq        INTEGER NOT NULL,
        op_type    TEXT    NOT NULL,
        payload    TEXT    NOT NULL,
        trace_id   TEXT,
        status     TEXT    NOT NULL DEFAULT 'pending',
        retry_cnt  INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TEXT    NOT NULL,
        updated_at TEXT    NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_sq_seq ON sync_queue (seq);
    CREATE INDEX IF NOT EXISTS idx_sq_status ON sync_queue (status);
";

/// Item states as stored in the `status` column. `sending` exists only as a
/// crash residue: flush keeps its in-flight set in memory, and any persisted
/// `sending` rows are reset to `pending` when the queue is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncItemStatus {
    Pending,
    Failed,
}

impl SyncItemStatus {
    fn as_str(self) -> &'static str {
        match self {
            SyncItemStatus::Pending => "pending",
            SyncItemStatus::Failed => "failed",
        }
    }
}

/// A pending row pulled for dispatch.
#[derive(Debug, Clone)]
pub struct QueuedItem {
    pub id: String,
    pub seq: i64,
    pub op_type: String,
    pub payload: Value,
    pub trace_id: Option<String>,
    pub retry_count: u32,
}

/// Result of one `flush` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatistics {
    pub pending: usize,
    pub sending: usize,
    pub failed: usize,
    pub total_enqueued: u64,
    pub total_sent: u64,
    pub total_failed: u64,
    pub max_size: usize,
    pub is_online: bool,
}

pub struct SyncQueue {
    db_path: Option<PathBuf>,
    /// In-memory databases vanish when their connection closes, so the
    /// `:memory:` mode keeps one persistent connection. File-backed mode
    /// opens a fresh connection per call.
    memory_conn: Option<Mutex<Connection>>,
    /// Serializes the read-capacity/allocate-seq/insert sequence so two
    /// concurrent enqueues cannot race on the same `seq`.
    write_lock: Mutex<()>,
    max_size: usize,
    max_retry: u32,
    batch_size: usize,
    online: AtomicBool,
    in_flight: AtomicUsize,
    total_enqueued: AtomicU64,
    total_sent: AtomicU64,
    total_failed: AtomicU64,
}

impl SyncQueue {
    /// Opens a file-backed queue, creating the schema if needed and resetting
    /// residual `sending` rows from a crashed process back to `pending`.
    pub fn open(
        path: impl AsRef<Path>,
        max_size: usize,
        max_retry: u32,
        batch_size: usize,
    ) -> Result<Self, EdgeLinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let queue = Self::assemble(Some(path), None, max_size, max_retry, batch_size);
        queue.with_conn(Self::init_schema)?;
        queue.log_opened();
        Ok(queue)
    }

    /// Opens a non-durable in-memory queue, for tests and ephemeral use.
    pub fn open_in_memory(
        max_size: usize,
        max_retry: u32,
        batch_size: usize,
    ) -> Result<Self, EdgeLinkError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        let queue = Self::assemble(
            None,
            Some(Mutex::new(conn)),
            max_size,
            max_retry,
            batch_size,
        );
        queue.log_opened();
        Ok(queue)
    }

    fn assemble(
        db_path: Option<PathBuf>,
        memory_conn: Option<Mutex<Connection>>,
        max_size: usize,
        max_retry: u32,
        batch_size: usize,
    ) -> Self {
        Self {
            db_path,
            memory_conn,
            write_lock: Mutex::new(()),
            max_size,
            max_retry,
            batch_size,
            online: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            total_enqueued: AtomicU64::new(0),
            total_sent: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    fn log_opened(&self) {
        info!(
            db_path = %self
                .db_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            max_size = self.max_size,
            max_retry = self.max_retry,
            batch_size = self.batch_size,
            "Sync queue opened."
        );
    }

    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(SCHEMA_SQL)?;
        // Crash recovery: a process that died mid-batch may have left rows in
        // 'sending'; they must become eligible for dispatch again.
        conn.execute(
            "UPDATE sync_queue SET status = 'pending' WHERE status = 'sending'",
            [],
        )?;
        Ok(())
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, EdgeLinkError> {
        if let Some(mutex) = &self.memory_conn {
            let conn = mutex.lock();
            Ok(f(&conn)?)
        } else {
            let path = self
                .db_path
                .as_ref()
                .ok_or_else(|| EdgeLinkError::InvalidState("queue has no backing store".into()))?;
            let conn = Connection::open(path)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            Ok(f(&conn)?)
        }
    }

    // ==================== state ====================

    /// Advisory online flag for external consumers; the queue itself does not
    /// act on it.
    pub fn set_online(&self, is_online: bool) {
        let was_online = self.online.swap(is_online, Ordering::AcqRel);
        if is_online && !was_online {
            info!("Cloud became online, sync queue ready to flush.");
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    // ==================== queue operations ====================

    /// Persists one operation with `status = pending` and the next `seq`.
    ///
    /// Returns `None` when the payload cannot be serialized or the count of
    /// pending rows is already at `max_size`; in both cases nothing is
    /// written.
    pub fn enqueue(&self, op_type: &str, payload: &Value, trace_id: Option<&str>) -> Option<String> {
        let payload_json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                error!(op_type, error = %e, "Failed to serialize payload for enqueue.");
                return None;
            }
        };

        let op_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock();
        let inserted = self.with_conn(|conn| {
            let pending: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?;
            if pending as usize >= self.max_size {
                warn!(
                    op_type,
                    queue_size = pending,
                    max_size = self.max_size,
                    "Sync queue full, rejecting item."
                );
                return Ok(false);
            }

            let next_seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq), -1) + 1 FROM sync_queue",
                [],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO sync_queue
                     (id, seq, op_type, payload, trace_id, status, retry_cnt, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?7)",
                params![op_id, next_seq, op_type, payload_json, trace_id, now, now],
            )?;
            Ok(true)
        });

        match inserted {
            Ok(true) => {
                self.total_enqueued.fetch_add(1, Ordering::Relaxed);
                info!(op_id = %op_id, op_type, trace_id, "Sync item enqueued.");
                Some(op_id)
            }
            Ok(false) => None,
            Err(e) => {
                error!(op_type, error = %e, "Failed to insert sync item.");
                None
            }
        }
    }

    /// Drains pending items in ascending `seq`, batch by batch, invoking
    /// `send(op_type, payload)` for each.
    ///
    /// A successful item is deleted; a failed one has its retry count bumped
    /// and becomes `failed` once `max_retry` is reached. If every item in a
    /// batch fails the transport is presumed down and the flush stops, which
    /// both bounds wasted work while offline and preserves the original order
    /// for the next flush.
    ///
    /// Callers must not run two flushes concurrently against the same queue.
    pub async fn flush<F, Fut>(&self, mut send: F) -> FlushReport
    where
        F: FnMut(String, Value) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut sent = 0;
        let mut failed = 0;

        loop {
            let batch = match self.pending_batch() {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Failed to read pending sync batch.");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            self.in_flight.store(batch.len(), Ordering::Relaxed);
            let mut batch_all_failed = true;

            for item in batch {
                let success = send(item.op_type.clone(), item.payload.clone()).await;

                if success {
                    if let Err(e) = self.remove_item(&item.id) {
                        error!(op_id = %item.id, error = %e, "Failed to delete sent sync item.");
                    }
                    sent += 1;
                    batch_all_failed = false;
                    self.total_sent.fetch_add(1, Ordering::Relaxed);
                    info!(op_id = %item.id, op_type = %item.op_type, trace_id = ?item.trace_id, "Sync item sent.");
                } else {
                    failed += 1;
                    let new_retry = item.retry_count + 1;
                    if new_retry >= self.max_retry {
                        self.set_item_status(
                            &item.id,
                            SyncItemStatus::Failed,
                            "max retries exceeded",
                            new_retry,
                        );
                        self.total_failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            op_id = %item.id,
                            op_type = %item.op_type,
                            retry_cnt = new_retry,
                            "Sync item permanently failed."
                        );
                    } else {
                        self.set_item_status(
                            &item.id,
                            SyncItemStatus::Pending,
                            "send failed, will retry",
                            new_retry,
                        );
                        warn!(
                            op_id = %item.id,
                            op_type = %item.op_type,
                            retry_cnt = new_retry,
                            max_retry = self.max_retry,
                            "Sync item failed, will retry."
                        );
                    }
                }
            }

            self.in_flight.store(0, Ordering::Relaxed);

            if batch_all_failed {
                break;
            }
        }

        let remaining = self.size();
        info!(sent, failed, remaining, "Sync queue flush completed.");
        FlushReport {
            sent,
            failed,
            remaining,
        }
    }

    // ==================== queries ====================

    /// Count of `pending` rows; only those count toward capacity.
    pub fn size(&self) -> usize {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'",
                [],
                |row| row.get::<_, i64>(0),
            )
        })
        .map(|n| n as usize)
        .unwrap_or(0)
    }

    pub fn statistics(&self) -> QueueStatistics {
        let (pending, failed) = self
            .with_conn(|conn| {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
                let mut pending = 0usize;
                let mut failed = 0usize;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (status, count) = row?;
                    match status.as_str() {
                        "pending" => pending = count as usize,
                        "failed" => failed = count as usize,
                        _ => {}
                    }
                }
                Ok((pending, failed))
            })
            .unwrap_or((0, 0));

        QueueStatistics {
            pending,
            sending: self.in_flight.load(Ordering::Relaxed),
            failed,
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            max_size: self.max_size,
            is_online: self.is_online(),
        }
    }

    // ==================== maintenance ====================

    /// Deletes every row, regardless of status.
    pub fn clear(&self) -> Result<(), EdgeLinkError> {
        self.with_conn(|conn| conn.execute("DELETE FROM sync_queue", []).map(|_| ()))?;
        info!("Sync queue cleared.");
        Ok(())
    }

    /// Releases the backing connection. Durable state survives on disk.
    pub fn close(self) {
        drop(self);
    }

    // ==================== internal helpers ====================

    fn pending_batch(&self) -> Result<Vec<QueuedItem>, EdgeLinkError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, seq, op_type, payload, trace_id, retry_cnt
                 FROM sync_queue
                 WHERE status = 'pending'
                 ORDER BY seq ASC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![self.batch_size as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;

        let mut batch = Vec::with_capacity(rows.len());
        for (id, seq, op_type, payload_json, trace_id, retry_cnt) in rows {
            match serde_json::from_str(&payload_json) {
                Ok(payload) => batch.push(QueuedItem {
                    id,
                    seq,
                    op_type,
                    payload,
                    trace_id,
                    retry_count: retry_cnt as u32,
                }),
                Err(e) => {
                    error!(item_id = %id, error = %e, "Failed to parse queued sync item.");
                }
            }
        }
        Ok(batch)
    }

    fn set_item_status(
        &self,
        op_id: &str,
        status: SyncItemStatus,
        last_error: &str,
        retry_count: u32,
    ) {
        let now = Utc::now().to_rfc3339();
        let result = self.with_conn(|conn| {
            conn.execute(
                "UPDATE sync_queue
                 SET status = ?1, last_error = ?2, retry_cnt = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![status.as_str(), last_error, retry_count, now, op_id],
            )
            .map(|_| ())
        });
        if let Err(e) = result {
            error!(op_id, error = %e, "Failed to update sync item status.");
        }
    }

    fn remove_item(&self, op_id: &str) -> Result<(), EdgeLinkError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![op_id])
                .map(|_| ())
        })
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("db_path", &self.db_path)
            .field("max_size", &self.max_size)
            .field("max_retry", &self.max_retry)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
