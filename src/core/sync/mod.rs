// src/core/sync/mod.rs

//! The offline-tolerant synchronization pipeline: a durable SQLite-backed
//! FIFO queue, the Cloud HTTP client, and the sync service that ties domain
//! calls to both.

pub mod client;
pub mod queue;
pub mod service;

pub use client::CloudClient;
pub use queue::{FlushReport, QueueStatistics, SyncQueue};
pub use service::{ApprovedCommand, CatalogSyncReport, SyncReport, SyncService};
