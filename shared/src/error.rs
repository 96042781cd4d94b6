//! Error handling for the scheduler platform.
//!
//! Error kinds follow the system's error handling design: not_found,
//! invalid_input, external_unavailable, conflict, capacity, auth, timeout.
//! Pure scheduling functions never raise for business reasons — they
//! signal via empty results or an explicit outcome record. Errors here
//! are reserved for I/O failures and malformed client input.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias used across every crate in the workspace.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Main error type for the scheduler platform.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("not found: {resource} {id}")]
    NotFound { resource: String, id: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("validation error: {errors:?}")]
    ValidationError { errors: HashMap<String, Vec<String>> },

    #[error("external service unavailable: {service} - {message}")]
    ExternalUnavailable { service: String, message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("capacity exceeded: {message}")]
    Capacity { message: String },

    #[error("authentication/authorization failed: {message}")]
    Auth { message: String },

    #[error("timeout: operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SchedulerError {
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::Capacity {
            message: message.into(),
        }
    }

    pub fn external_unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code for this error, used by the gateway and service layers.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::ValidationError { .. } => StatusCode::BAD_REQUEST,
            Self::ExternalUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Capacity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Auth { .. } => StatusCode::UNAUTHORIZED,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput { .. } => "invalid_input",
            Self::ValidationError { .. } => "invalid_input",
            Self::ExternalUnavailable { .. } => "external_unavailable",
            Self::Conflict { .. } => "conflict",
            Self::Capacity { .. } => "capacity",
            Self::Auth { .. } => "auth",
            Self::Timeout { .. } => "timeout",
            Self::Internal { .. } => "internal",
        }
    }

    /// Failures that a poller or background loop should swallow and
    /// continue from, never crashing the loop.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ExternalUnavailable { .. } | Self::Timeout { .. }
        )
    }
}

/// Structured error body returned to clients on invalid input or failure.
/// State is never mutated when this is returned.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub message: String,
    pub request_id: Option<Uuid>,
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            kind: self.kind().to_string(),
            message: self.to_string(),
            request_id: None,
        };
        (status, Json(body)).into_response()
    }
}

impl From<redis::RedisError> for SchedulerError {
    fn from(err: redis::RedisError) -> Self {
        Self::ExternalUnavailable {
            service: "kv_substrate".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for SchedulerError {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidInput {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout_ms: 10_000 }
        } else {
            Self::ExternalUnavailable {
                service: "http_collaborator".to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = SchedulerError::not_found("task", "abc");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn capacity_maps_to_422() {
        let err = SchedulerError::capacity("no candidate fits");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn external_unavailable_is_transient() {
        let err = SchedulerError::external_unavailable("kv_substrate", "connection reset");
        assert!(err.is_transient());
        assert!(!SchedulerError::conflict("bad status").is_transient());
    }
}
