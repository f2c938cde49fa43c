// src/core/errors.rs

//! Defines the primary error type for the entire application.

use crate::core::models::ErrorCode;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the platform.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum EdgeLinkError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Token rejected: {0}")]
    TokenRejected(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Robot not found: {0}")]
    RobotNotFound(String),

    #[error("Robot offline: {0}")]
    RobotOffline(String),

    #[error("Robot busy: {0}")]
    RobotBusy(String),

    #[error("Protocol failure: {0}")]
    ProtocolFailure(String),

    #[error("Command timed out after {0}ms")]
    Timeout(u64),

    #[error("Sync queue is full")]
    QueueFull,

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EdgeLinkError {
    /// Maps an internal error onto the wire-level error taxonomy.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            EdgeLinkError::SchemaValidation(_) | EdgeLinkError::InvalidRequest(_) => {
                ErrorCode::ErrValidation
            }
            EdgeLinkError::AuthRequired
            | EdgeLinkError::TokenRejected(_)
            | EdgeLinkError::PermissionDenied(_)
            | EdgeLinkError::UnknownUser(_) => ErrorCode::ErrUnauthorized,
            EdgeLinkError::RobotNotFound(_) => ErrorCode::ErrRobotNotFound,
            EdgeLinkError::RobotOffline(_) => ErrorCode::ErrRobotOffline,
            EdgeLinkError::RobotBusy(_) => ErrorCode::ErrRobotBusy,
            EdgeLinkError::ProtocolFailure(_) | EdgeLinkError::HttpClient(_) => {
                ErrorCode::ErrProtocol
            }
            EdgeLinkError::Timeout(_) => ErrorCode::ErrTimeout,
            _ => ErrorCode::ErrInternal,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for EdgeLinkError {
    fn from(e: std::io::Error) -> Self {
        EdgeLinkError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for EdgeLinkError {
    fn from(e: reqwest::Error) -> Self {
        EdgeLinkError::HttpClient(e.to_string())
    }
}

impl From<rusqlite::Error> for EdgeLinkError {
    fn from(e: rusqlite::Error) -> Self {
        EdgeLinkError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for EdgeLinkError {
    fn from(e: serde_json::Error) -> Self {
        EdgeLinkError::Json(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for EdgeLinkError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        EdgeLinkError::TokenRejected(e.to_string())
    }
}

impl From<uuid::Error> for EdgeLinkError {
    fn from(e: uuid::Error) -> Self {
        EdgeLinkError::Internal(format!("Failed to generate UUID: {e}"))
    }
}
