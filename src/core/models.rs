// src/core/models.rs

//! Wire contracts shared by the command pipeline, the robot router, and the
//! HTTP API: request/response envelopes, events, and robot registry entries.
//!
//! The JSON shapes here are fixed contracts; the schema validator checks
//! inbound documents against the same shapes before they are deserialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;

/// Who (or what) issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActorType {
    Human,
    Ai,
    System,
}

/// The surface a command entered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    Webui,
    Api,
    Cli,
    Scheduler,
}

/// Lifecycle states of a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Accepted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Registry-visible robot states. `Busy` is observable only while a dispatch
/// holds the per-robot lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RobotStatus {
    Online,
    Offline,
    Busy,
    Maintenance,
}

/// Transport used to reach a robot. Only HTTP is dispatchable today; the
/// remaining protocols are reserved and answer with a defined protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Http,
    Mqtt,
    Websocket,
}

/// Error codes used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ErrValidation,
    ErrUnauthorized,
    ErrRobotNotFound,
    ErrRobotOffline,
    ErrRobotBusy,
    ErrProtocol,
    ErrTimeout,
    ErrInternal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum EventSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventCategory {
    Command,
    Auth,
    Protocol,
    Robot,
    Sync,
    State,
    Audit,
}

fn default_params() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_context() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTarget {
    pub robot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    pub target: CommandTarget,
    #[serde(default = "default_params")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
}

/// The inbound command envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub source: Source,
    pub command: CommandSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStatusRef {
    pub id: String,
    pub status: CommandStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub data: Option<Value>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The outbound command envelope. On `accepted` both `result` and `error`
/// are null; on a terminal state exactly one of them is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub command: CommandStatusRef,
    pub result: Option<CommandResult>,
    pub error: Option<ErrorDetail>,
}

impl CommandResponse {
    /// Builds the synchronous `accepted` reply.
    pub fn accepted(trace_id: &str, command_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            timestamp: Utc::now(),
            command: CommandStatusRef {
                id: command_id.to_string(),
                status: CommandStatus::Accepted,
            },
            result: None,
            error: None,
        }
    }

    /// Builds a terminal error reply.
    pub fn rejected(trace_id: &str, command_id: &str, code: ErrorCode, message: String) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            timestamp: Utc::now(),
            command: CommandStatusRef {
                id: command_id.to_string(),
                status: CommandStatus::Failed,
            },
            result: None,
            error: Some(ErrorDetail {
                code,
                message,
                details: None,
            }),
        }
    }
}

/// A structured event emitted for every decision the core makes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub category: EventCategory,
    pub message: String,
    #[serde(default = "default_context")]
    pub context: Value,
}

impl Event {
    pub fn new(
        trace_id: impl Into<String>,
        severity: EventSeverity,
        category: EventCategory,
        message: impl Into<String>,
        context: Value,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            timestamp: Utc::now(),
            severity,
            category,
            message: message.into(),
            context,
        }
    }
}

/// A robot registry entry. Registration and heartbeat both carry this shape;
/// the router owns the authoritative copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Robot {
    pub robot_id: String,
    pub robot_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_robot_status")]
    pub status: RobotStatus,
    pub endpoint: String,
    pub protocol: Protocol,
    #[serde(default = "Utc::now")]
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default = "default_context")]
    pub metadata: Value,
}

fn default_robot_status() -> RobotStatus {
    RobotStatus::Online
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub robot_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_robot_status")]
    pub status: RobotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
}

/// Snapshot answered by `GET /api/command/{command_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStatusView {
    pub command_id: String,
    pub status: CommandStatus,
    pub result: Option<CommandResult>,
    pub error: Option<ErrorDetail>,
    pub timestamp: DateTime<Utc>,
}
