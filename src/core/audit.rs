// src/core/audit.rs

//! The audit sink: captures every event published on the bus into a bounded
//! in-memory log with a filterable query interface and per-category/severity
//! counters.

use crate::core::events::PublishedEvent;
use crate::core::models::{Event, EventCategory, EventSeverity};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Query filter for [`AuditSink::events`]. Unset fields match everything.
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    pub trace_id: Option<String>,
    pub category: Option<EventCategory>,
    pub severity: Option<EventSeverity>,
    pub limit: Option<usize>,
}

/// Captures structured events from all components.
#[derive(Debug)]
pub struct AuditSink {
    log: RwLock<VecDeque<Arc<PublishedEvent>>>,
    capacity: usize,
    /// Counters keyed `event_<category>_<severity>`.
    counters: DashMap<String, u64>,
}

impl AuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            counters: DashMap::new(),
        }
    }

    /// Records a single event, evicting the oldest entry once full.
    pub fn record(&self, published: Arc<PublishedEvent>) {
        let key = format!(
            "event_{}_{}",
            published.event.category, published.event.severity
        );
        *self.counters.entry(key).or_insert(0) += 1;

        let mut log = self.log.write();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(published);
    }

    /// Returns matching events, oldest first, capped by `filter.limit`.
    pub fn events(&self, filter: &AuditFilter) -> Vec<Event> {
        let log = self.log.read();
        let matching: Vec<&Arc<PublishedEvent>> = log
            .iter()
            .filter(|p| {
                filter
                    .trace_id
                    .as_deref()
                    .is_none_or(|t| p.event.trace_id == t)
                    && filter.category.is_none_or(|c| p.event.category == c)
                    && filter.severity.is_none_or(|s| p.event.severity == s)
            })
            .collect();

        let limit = filter.limit.unwrap_or(usize::MAX);
        let skip = matching.len().saturating_sub(limit);
        matching
            .into_iter()
            .skip(skip)
            .map(|p| p.event.clone())
            .collect()
    }

    /// Returns the counter map keyed `event_<category>_<severity>`.
    pub fn metrics(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Runs the capture loop: drains the bus firehose until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut events_rx: broadcast::Receiver<Arc<PublishedEvent>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!("Audit sink started.");
        loop {
            tokio::select! {
                received = events_rx.recv() => {
                    match received {
                        Ok(published) => self.record(published),
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Audit sink lagged; {} events were not captured.", missed);
                        }
                        Err(RecvError::Closed) => {
                            debug!("Event bus closed; audit sink stopping.");
                            return;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Audit sink shutting down.");
                    return;
                }
            }
        }
    }
}
