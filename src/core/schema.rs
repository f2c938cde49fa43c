// src/core/schema.rs

//! JSON-Schema (Draft 7) validation of the request, response, and event
//! envelopes. Schemas are compiled once at first use.

use crate::core::errors::EdgeLinkError;
use chrono::DateTime;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde_json::{Value, json};

static COMMAND_REQUEST_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["trace_id", "timestamp", "actor", "source", "command"],
        "properties": {
            "trace_id": {"type": "string", "minLength": 1},
            "timestamp": {"type": "string"},
            "actor": {
                "type": "object",
                "required": ["type", "id"],
                "properties": {
                    "type": {"type": "string", "enum": ["human", "ai", "system"]},
                    "id": {"type": "string", "minLength": 1},
                    "name": {"type": "string"}
                }
            },
            "source": {"type": "string", "enum": ["webui", "api", "cli", "scheduler"]},
            "command": {
                "type": "object",
                "required": ["id", "type", "target"],
                "properties": {
                    "id": {"type": "string", "minLength": 1},
                    "type": {"type": "string", "pattern": "^[a-z][a-z0-9_.-]+$"},
                    "target": {
                        "type": "object",
                        "required": ["robot_id"],
                        "properties": {
                            "robot_id": {"type": "string", "minLength": 1},
                            "robot_type": {"type": "string"}
                        }
                    },
                    "params": {"type": "object"},
                    "timeout_ms": {"type": "integer", "minimum": 100, "maximum": 600_000},
                    "priority": {"type": "string", "enum": ["low", "normal", "high"]}
                }
            },
            "auth": {
                "type": "object",
                "properties": {"token": {"type": "string"}}
            },
            "labels": {"type": "object"}
        }
    })
});

static COMMAND_RESPONSE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["trace_id", "timestamp", "command"],
        "properties": {
            "trace_id": {"type": "string", "minLength": 1},
            "timestamp": {"type": "string"},
            "command": {
                "type": "object",
                "required": ["id", "status"],
                "properties": {
                    "id": {"type": "string", "minLength": 1},
                    "status": {
                        "type": "string",
                        "enum": ["pending", "accepted", "running", "succeeded", "failed", "cancelled"]
                    }
                }
            },
            "result": {
                "type": ["object", "null"],
                "properties": {
                    "data": {"type": ["object", "null"]},
                    "summary": {"type": "string"}
                }
            },
            "error": {
                "type": ["object", "null"],
                "required": ["code", "message"],
                "properties": {
                    "code": {
                        "type": "string",
                        "enum": [
                            "ERR_VALIDATION",
                            "ERR_UNAUTHORIZED",
                            "ERR_ROBOT_NOT_FOUND",
                            "ERR_ROBOT_OFFLINE",
                            "ERR_ROBOT_BUSY",
                            "ERR_PROTOCOL",
                            "ERR_TIMEOUT",
                            "ERR_INTERNAL"
                        ]
                    },
                    "message": {"type": "string"},
                    "details": {"type": ["object", "null"]}
                }
            }
        }
    })
});

static EVENT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["trace_id", "timestamp", "severity", "category", "message"],
        "properties": {
            "trace_id": {"type": "string", "minLength": 1},
            "timestamp": {"type": "string"},
            "severity": {"type": "string", "enum": ["DEBUG", "INFO", "WARN", "ERROR"]},
            "category": {
                "type": "string",
                "enum": ["command", "auth", "protocol", "robot", "sync", "state", "audit"]
            },
            "message": {"type": "string", "minLength": 1},
            "context": {"type": "object"}
        }
    })
});

static COMMAND_REQUEST_VALIDATOR: Lazy<JSONSchema> = Lazy::new(|| compile(&COMMAND_REQUEST_SCHEMA));
static COMMAND_RESPONSE_VALIDATOR: Lazy<JSONSchema> =
    Lazy::new(|| compile(&COMMAND_RESPONSE_SCHEMA));
static EVENT_VALIDATOR: Lazy<JSONSchema> = Lazy::new(|| compile(&EVENT_SCHEMA));

fn compile(schema: &Value) -> JSONSchema {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .expect("builtin schema must compile")
}

fn check(validator: &JSONSchema, data: &Value) -> Result<(), EdgeLinkError> {
    if let Err(errors) = validator.validate(data) {
        let message = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(EdgeLinkError::SchemaValidation(message));
    }

    // Timestamps are structurally plain strings; enforce RFC 3339 here.
    if let Some(ts) = data.get("timestamp").and_then(Value::as_str) {
        if DateTime::parse_from_rfc3339(ts).is_err() {
            return Err(EdgeLinkError::SchemaValidation(format!(
                "timestamp is not RFC 3339: '{ts}'"
            )));
        }
    }
    Ok(())
}

/// Validates an inbound command request envelope.
pub fn validate_command_request(data: &Value) -> Result<(), EdgeLinkError> {
    check(&COMMAND_REQUEST_VALIDATOR, data)
}

/// Validates an outbound command response envelope.
pub fn validate_command_response(data: &Value) -> Result<(), EdgeLinkError> {
    check(&COMMAND_RESPONSE_VALIDATOR, data)
}

/// Validates an event envelope.
pub fn validate_event(data: &Value) -> Result<(), EdgeLinkError> {
    check(&EVENT_VALIDATOR, data)
}
