// src/core/handler/mod.rs

//! The command handler: entry point for every robot command.
//!
//! The pipeline runs a fixed sequence (schema validation, authentication,
//! authorization, business validation, idempotency, context creation), then
//! replies `accepted` synchronously while a spawned task routes the command
//! and stores the terminal result. Every decision emits an event carrying the
//! request's trace id.

use crate::core::auth::{AuthManager, TokenKind};
use crate::core::context::ContextStore;
use crate::core::events::EventBus;
use crate::core::models::{
    CommandRequest, CommandResponse, CommandStatus, CommandStatusRef, CommandStatusView,
    ErrorCode, EventCategory, EventSeverity,
};
use crate::core::router::RobotRouter;
use crate::core::schema;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Allowed bounds for `command.timeout_ms`.
const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Clone)]
struct ActiveCommand {
    status: CommandStatus,
    started_at: DateTime<Utc>,
}

pub struct CommandHandler {
    router: Arc<RobotRouter>,
    contexts: Arc<ContextStore>,
    auth: Arc<AuthManager>,
    bus: Arc<EventBus>,
    default_timeout_ms: u64,
    /// Commands between acceptance and their terminal state.
    active: DashMap<String, ActiveCommand>,
}

impl CommandHandler {
    pub fn new(
        router: Arc<RobotRouter>,
        contexts: Arc<ContextStore>,
        auth: Arc<AuthManager>,
        bus: Arc<EventBus>,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            router,
            contexts,
            auth,
            bus,
            default_timeout_ms,
            active: DashMap::new(),
        }
    }

    /// Runs the pipeline over a raw request document and produces the
    /// synchronous reply. Execution continues in a background task after the
    /// `accepted` response is returned.
    pub async fn process(self: &Arc<Self>, raw: Value) -> CommandResponse {
        // Identifiers for error replies come from the raw document so even a
        // rejected request stays correlatable.
        let trace_id = raw
            .get("trace_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let command_id = raw
            .pointer("/command/id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // 1. Schema validation of the envelope.
        if let Err(e) = schema::validate_command_request(&raw) {
            self.emit(
                &trace_id,
                EventSeverity::Warn,
                EventCategory::Command,
                "command.rejected",
                format!("command validation failed: {e}"),
                json!({ "command_id": command_id, "error": e.to_string() }),
            );
            return CommandResponse::rejected(
                &trace_id,
                &command_id,
                ErrorCode::ErrValidation,
                format!("request does not match schema: {e}"),
            );
        }

        let request: CommandRequest = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => {
                return CommandResponse::rejected(
                    &trace_id,
                    &command_id,
                    ErrorCode::ErrValidation,
                    format!("request could not be decoded: {e}"),
                );
            }
        };
        let command_id = request.command.id.clone();

        // 2. Authentication: a bearer token that verifies as an access token.
        let Some(claims) = request
            .auth
            .as_ref()
            .and_then(|a| self.auth.verify_token(&a.token, TokenKind::Access, &trace_id))
        else {
            self.emit(
                &trace_id,
                EventSeverity::Warn,
                EventCategory::Auth,
                "auth.failed",
                format!("authentication failed for command {command_id}"),
                json!({
                    "command_id": command_id,
                    "actor_id": request.actor.id,
                    "actor_type": request.actor.actor_type,
                }),
            );
            return CommandResponse::rejected(
                &trace_id,
                &command_id,
                ErrorCode::ErrUnauthorized,
                "authentication failed".to_string(),
            );
        };

        // 3. Authorization against the token's identity.
        let robot_id = request.command.target.robot_id.clone();
        if !self.auth.check_permission(
            &claims.user_id,
            &request.command.command_type,
            Some(&robot_id),
        ) {
            self.emit(
                &trace_id,
                EventSeverity::Warn,
                EventCategory::Auth,
                "auth.denied",
                format!("authorization failed for command {command_id}"),
                json!({
                    "command_id": command_id,
                    "user_id": claims.user_id,
                    "action": request.command.command_type,
                    "resource": robot_id,
                }),
            );
            return CommandResponse::rejected(
                &trace_id,
                &command_id,
                ErrorCode::ErrUnauthorized,
                "insufficient permissions".to_string(),
            );
        }

        // 4. Business rules.
        let timeout_ms = request
            .command
            .timeout_ms
            .unwrap_or(self.default_timeout_ms);
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return CommandResponse::rejected(
                &trace_id,
                &command_id,
                ErrorCode::ErrValidation,
                format!("timeout_ms must be within [{MIN_TIMEOUT_MS}, {MAX_TIMEOUT_MS}]"),
            );
        }

        // 5. Idempotency: a known command id answers from the cache; a still
        // running duplicate re-acknowledges without dispatching again.
        if self.contexts.command_exists(&command_id) {
            info!(command_id, "Duplicate command, returning cached result.");
            if let Some(cached) = self.contexts.cached_response(&command_id) {
                return cached;
            }
            return CommandResponse::accepted(&trace_id, &command_id);
        }

        // 6. Context creation.
        self.contexts.create_context(&trace_id, &request);

        // 7. Accepted.
        self.active.insert(
            command_id.clone(),
            ActiveCommand {
                status: CommandStatus::Accepted,
                started_at: Utc::now(),
            },
        );
        self.emit(
            &trace_id,
            EventSeverity::Info,
            EventCategory::Command,
            "command.accepted",
            format!("command accepted: {command_id}"),
            json!({ "command_id": command_id, "type": request.command.command_type }),
        );

        // 8. Asynchronous execution.
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            handler.execute(request, timeout_ms).await;
        });

        CommandResponse::accepted(&trace_id, &command_id)
    }

    /// Executes one accepted command: routes it, honors a racing cancel, and
    /// stores the terminal response before the terminal event is published.
    async fn execute(self: Arc<Self>, request: CommandRequest, timeout_ms: u64) {
        let command_id = request.command.id.clone();
        let trace_id = request.trace_id.clone();

        if let Some(mut active) = self.active.get_mut(&command_id) {
            active.status = CommandStatus::Running;
        }
        self.emit(
            &trace_id,
            EventSeverity::Info,
            EventCategory::Command,
            "command.running",
            format!("command execution started: {command_id}"),
            json!({ "command_id": command_id }),
        );

        let outcome = self
            .router
            .route_command(
                &request.command.target.robot_id,
                &request.command.command_type,
                &request.command.params,
                timeout_ms,
                &trace_id,
            )
            .await;

        let cancelled = self
            .active
            .get(&command_id)
            .map(|a| a.status == CommandStatus::Cancelled)
            .unwrap_or(false);

        if cancelled {
            // A success result must not land after a cancel won the race.
            let response = CommandResponse {
                trace_id: trace_id.clone(),
                timestamp: Utc::now(),
                command: CommandStatusRef {
                    id: command_id.clone(),
                    status: CommandStatus::Cancelled,
                },
                result: None,
                error: None,
            };
            self.contexts.update_result(&command_id, response);
            self.emit(
                &trace_id,
                EventSeverity::Info,
                EventCategory::Command,
                "command.cancelled",
                format!("command cancelled: {command_id}"),
                json!({ "command_id": command_id }),
            );
            self.active.remove(&command_id);
            return;
        }

        match outcome {
            Ok(result) => {
                let response = CommandResponse {
                    trace_id: trace_id.clone(),
                    timestamp: Utc::now(),
                    command: CommandStatusRef {
                        id: command_id.clone(),
                        status: CommandStatus::Succeeded,
                    },
                    result: Some(result),
                    error: None,
                };
                self.contexts.update_result(&command_id, response);
                self.emit(
                    &trace_id,
                    EventSeverity::Info,
                    EventCategory::Command,
                    "command.succeeded",
                    format!("command execution succeeded: {command_id}"),
                    json!({ "command_id": command_id }),
                );
            }
            Err(detail) => {
                let severity = match detail.code {
                    ErrorCode::ErrRobotBusy
                    | ErrorCode::ErrRobotOffline
                    | ErrorCode::ErrRobotNotFound => EventSeverity::Warn,
                    _ => EventSeverity::Error,
                };
                let response = CommandResponse {
                    trace_id: trace_id.clone(),
                    timestamp: Utc::now(),
                    command: CommandStatusRef {
                        id: command_id.clone(),
                        status: CommandStatus::Failed,
                    },
                    result: None,
                    error: Some(detail.clone()),
                };
                self.contexts.update_result(&command_id, response);
                self.emit(
                    &trace_id,
                    severity,
                    EventCategory::Command,
                    "command.failed",
                    format!("command execution failed: {command_id}"),
                    json!({
                        "command_id": command_id,
                        "error": { "code": detail.code, "message": detail.message },
                    }),
                );
            }
        }

        self.active.remove(&command_id);
    }

    /// Answers command status, consulting in-flight commands before the
    /// context store.
    pub fn command_status(&self, command_id: &str) -> Option<CommandStatusView> {
        if let Some(active) = self.active.get(command_id) {
            return Some(CommandStatusView {
                command_id: command_id.to_string(),
                status: active.status,
                result: None,
                error: None,
                timestamp: active.started_at,
            });
        }
        self.contexts.command_status(command_id)
    }

    /// Best-effort cancellation: flips the in-flight flag so the executor
    /// will not store a success result. Returns `false` when the command is
    /// not currently active.
    pub fn cancel_command(&self, command_id: &str, trace_id: &str) -> bool {
        let Some(mut active) = self.active.get_mut(command_id) else {
            return false;
        };
        active.status = CommandStatus::Cancelled;
        drop(active);

        self.emit(
            trace_id,
            EventSeverity::Info,
            EventCategory::Command,
            "command.cancel_requested",
            format!("command cancel requested: {command_id}"),
            json!({ "command_id": command_id }),
        );
        true
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn emit(
        &self,
        trace_id: &str,
        severity: EventSeverity,
        category: EventCategory,
        topic: &str,
        message: String,
        context: Value,
    ) {
        self.bus
            .emit(topic, trace_id, severity, category, message, context);
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("active", &self.active.len())
            .field("default_timeout_ms", &self.default_timeout_ms)
            .finish_non_exhaustive()
    }
}
