// src/core/shared_state.rs

//! An observable key/value store backed by the event bus. Components publish
//! service, robot, and queue status here; every mutation emits an event on a
//! topic derived from the key prefix, so subscribers see changes without
//! polling.

use crate::core::events::EventBus;
use crate::core::models::{Event, EventCategory, EventSeverity};
use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Maps a key to the well-known topic its changes are announced on.
fn topic_for_key(key: &str) -> &'static str {
    match key.split(':').next() {
        Some("robot") => "robot.status_updated",
        Some("queue") => "queue.status_updated",
        Some("service") => "service.health_changed",
        Some("llm") => "llm.provider_changed",
        _ => "state.updated",
    }
}

fn category_for_key(key: &str) -> EventCategory {
    match key.split(':').next() {
        Some("robot") => EventCategory::Robot,
        Some("queue") => EventCategory::Sync,
        _ => EventCategory::State,
    }
}

#[derive(Debug)]
pub struct SharedState {
    entries: DashMap<String, Value>,
    bus: Arc<EventBus>,
}

impl SharedState {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            entries: DashMap::new(),
            bus,
        }
    }

    /// Stores a value and announces the change.
    pub fn set(&self, key: &str, value: Value) {
        self.set_traced(key, value, &Uuid::new_v4().to_string());
    }

    /// Stores a value, announcing the change under an existing trace id.
    pub fn set_traced(&self, key: &str, value: Value, trace_id: &str) {
        let previous = self.entries.insert(key.to_string(), value.clone());
        let event = Event::new(
            trace_id,
            EventSeverity::Debug,
            category_for_key(key),
            format!("state key '{key}' updated"),
            json!({
                "key": key,
                "value": value,
                "previous": previous,
            }),
        );
        self.bus.publish(topic_for_key(key), event);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.clone())
    }

    /// Removes a key; announced like any other mutation.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.entries.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            let event = Event::new(
                Uuid::new_v4().to_string(),
                EventSeverity::Debug,
                category_for_key(key),
                format!("state key '{key}' removed"),
                json!({ "key": key }),
            );
            self.bus.publish(topic_for_key(key), event);
        }
        removed
    }

    /// Returns all keys with the given prefix (e.g. `robot:`).
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
