// src/core/events.rs

//! The in-process event bus: topic-addressed publish/subscribe with glob
//! patterns, a firehose channel feeding the audit sink and the streaming API,
//! and a bounded ring buffer of recent events for post-hoc inspection.

use crate::core::models::{Event, EventCategory, EventSeverity};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::debug;
use wildmatch::WildMatch;

/// The capacity of each individual broadcast channel.
const CHANNEL_CAPACITY: usize = 128;

/// The capacity of the firehose channel. Sized generously so a burst of
/// command traffic does not lag the audit sink.
const FIREHOSE_CAPACITY: usize = 8192;

/// An event paired with the topic it was published on.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedEvent {
    pub topic: String,
    #[serde(flatten)]
    pub event: Event,
}

/// `EventBus` is the central fan-out hub for structured events.
///
/// Publishing never blocks: `broadcast` drops messages for lagging receivers
/// instead of stalling the publisher, so a slow subscriber cannot delay the
/// command pipeline.
#[derive(Debug)]
pub struct EventBus {
    /// A map from an exact topic name to its broadcast sender.
    topics: DashMap<String, Arc<Sender<Arc<PublishedEvent>>>>,
    /// A map from a glob pattern (e.g. `robot.*`) to its broadcast sender.
    patterns: DashMap<String, Arc<Sender<Arc<PublishedEvent>>>>,
    /// Every published event, regardless of topic.
    firehose: Sender<Arc<PublishedEvent>>,
    /// The last `history_size` events, oldest first.
    history: Mutex<VecDeque<Arc<PublishedEvent>>>,
    history_size: usize,
}

impl EventBus {
    pub fn new(history_size: usize) -> Self {
        let (firehose, _) = broadcast::channel(FIREHOSE_CAPACITY);
        Self {
            topics: DashMap::new(),
            patterns: DashMap::new(),
            firehose,
            history: Mutex::new(VecDeque::with_capacity(history_size)),
            history_size,
        }
    }

    /// Publishes an event on a topic.
    ///
    /// The event is recorded in the history ring, sent to the firehose, then
    /// to exact-topic subscribers and to every pattern subscription matching
    /// the topic. Returns the number of receivers the event reached.
    pub fn publish(&self, topic: &str, event: Event) -> usize {
        let published = Arc::new(PublishedEvent {
            topic: topic.to_string(),
            event,
        });

        {
            let mut history = self.history.lock();
            if history.len() == self.history_size {
                history.pop_front();
            }
            history.push_back(published.clone());
        }

        let mut receivers = self.firehose.send(published.clone()).unwrap_or(0);

        if let Some(sender) = self.topics.get(topic) {
            receivers += sender.send(published.clone()).unwrap_or(0);
        }

        for entry in self.patterns.iter() {
            if WildMatch::new(entry.key()).matches(topic) {
                receivers += entry.value().send(published.clone()).unwrap_or(0);
            }
        }

        receivers
    }

    /// Convenience wrapper assembling the `Event` in place.
    pub fn emit(
        &self,
        topic: &str,
        trace_id: &str,
        severity: EventSeverity,
        category: EventCategory,
        message: impl Into<String>,
        context: Value,
    ) {
        self.publish(topic, Event::new(trace_id, severity, category, message, context));
    }

    /// Subscribes to a specific topic. The topic channel is created on first
    /// subscription.
    pub fn subscribe(&self, topic: &str) -> Receiver<Arc<PublishedEvent>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(broadcast::channel(CHANNEL_CAPACITY).0))
            .value()
            .subscribe()
    }

    /// Subscribes to a glob-style topic pattern (e.g. `robot.*`).
    pub fn subscribe_pattern(&self, pattern: &str) -> Receiver<Arc<PublishedEvent>> {
        self.patterns
            .entry(pattern.to_string())
            .or_insert_with(|| Arc::new(broadcast::channel(CHANNEL_CAPACITY).0))
            .value()
            .subscribe()
    }

    /// Subscribes to every event published on the bus.
    pub fn subscribe_all(&self) -> Receiver<Arc<PublishedEvent>> {
        self.firehose.subscribe()
    }

    /// Returns up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<PublishedEvent>> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Removes topic and pattern channels that no longer have subscribers.
    /// Prevents memory growth from short-lived subscriptions.
    pub fn purge_idle_channels(&self) -> usize {
        let mut purged = 0;
        self.topics.retain(|_, sender| {
            if sender.receiver_count() == 0 {
                purged += 1;
                false
            } else {
                true
            }
        });
        self.patterns.retain(|_, sender| {
            if sender.receiver_count() == 0 {
                purged += 1;
                false
            } else {
                true
            }
        });
        if purged > 0 {
            debug!("Purged {} idle event bus channels.", purged);
        }
        purged
    }

    /// Returns the number of subscribers on a specific topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |s| s.receiver_count())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
