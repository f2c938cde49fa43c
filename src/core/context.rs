// src/core/context.rs

//! In-memory store of per-command context and cached responses. Backs both
//! `GET /api/command/{id}` after the handler has returned and the idempotency
//! check for duplicate command ids.

use crate::core::models::{CommandRequest, CommandResponse, CommandStatusView};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

/// Everything recorded about a request at acceptance time.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub trace_id: String,
    pub command_id: String,
    pub created_at: DateTime<Utc>,
    pub request: CommandRequest,
}

/// The context store is bounded: once `capacity` contexts exist, the oldest
/// context (and its cached response) is evicted on the next insert.
#[derive(Debug)]
pub struct ContextStore {
    contexts: DashMap<String, CommandContext>,
    /// `command_id` -> `trace_id`; present from acceptance onward, so
    /// duplicates of in-flight commands are detected too.
    known_commands: DashMap<String, String>,
    /// `command_id` -> final (or cached) response.
    results: DashMap<String, CommandResponse>,
    /// Insertion order of `(trace_id, command_id)` pairs, for eviction.
    order: Mutex<VecDeque<(String, String)>>,
    capacity: usize,
}

impl ContextStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            contexts: DashMap::new(),
            known_commands: DashMap::new(),
            results: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Records a request under its trace id, evicting the oldest entry if the
    /// store is at capacity.
    pub fn create_context(&self, trace_id: &str, request: &CommandRequest) {
        let command_id = request.command.id.clone();

        {
            let mut order = self.order.lock();
            while order.len() >= self.capacity {
                if let Some((old_trace, old_command)) = order.pop_front() {
                    self.contexts.remove(&old_trace);
                    self.known_commands.remove(&old_command);
                    self.results.remove(&old_command);
                }
            }
            order.push_back((trace_id.to_string(), command_id.clone()));
        }

        self.known_commands
            .insert(command_id.clone(), trace_id.to_string());
        self.contexts.insert(
            trace_id.to_string(),
            CommandContext {
                trace_id: trace_id.to_string(),
                command_id,
                created_at: Utc::now(),
                request: request.clone(),
            },
        );
        debug!(trace_id, "Created command context.");
    }

    pub fn get_context(&self, trace_id: &str) -> Option<CommandContext> {
        self.contexts.get(trace_id).map(|c| c.clone())
    }

    /// True if a command id has been seen, whether or not it has finished.
    pub fn command_exists(&self, command_id: &str) -> bool {
        self.known_commands.contains_key(command_id) || self.results.contains_key(command_id)
    }

    /// Stores the final response for a command.
    pub fn update_result(&self, command_id: &str, response: CommandResponse) {
        self.results.insert(command_id.to_string(), response);
        debug!(command_id, "Stored command result.");
    }

    /// Returns the cached response for a finished command, verbatim.
    pub fn cached_response(&self, command_id: &str) -> Option<CommandResponse> {
        self.results.get(command_id).map(|r| r.clone())
    }

    /// Returns the status view for a finished command, or `None` if unknown.
    pub fn command_status(&self, command_id: &str) -> Option<CommandStatusView> {
        self.results.get(command_id).map(|response| CommandStatusView {
            command_id: command_id.to_string(),
            status: response.command.status,
            result: response.result.clone(),
            error: response.error.clone(),
            timestamp: response.timestamp,
        })
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
