//! Error types for the collector server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use errors::{SessionError, SettingsError, StorageError};
use serde::Serialize;
use storage::ConfigUpdateError;
use thiserror::Error;

/// Result type alias for the collector.
pub type Result<T> = std::result::Result<T, CollectorError>;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config update error: {0}")]
    ConfigUpdate(#[from] ConfigUpdateError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("{resource} did not drain within {timeout_ms}ms")]
    DrainTimeout { resource: String, timeout_ms: u64 },

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body for HTTP endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CollectorError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::ConfigUpdate(ConfigUpdateError::StaleVersion { .. }) => {
                (StatusCode::CONFLICT, "STALE_VERSION")
            }
            Self::ConfigUpdate(ConfigUpdateError::Invalid { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_CONFIG")
            }
            Self::ConfigUpdate(_) | Self::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
            }
            Self::Session(e) if e.is_disconnect() => (StatusCode::NOT_FOUND, "AGENT_NOT_CONNECTED"),
            Self::Session(SessionError::Timeout { .. }) => {
                (StatusCode::GATEWAY_TIMEOUT, "AGENT_TIMEOUT")
            }
            Self::Session(_) => (StatusCode::BAD_GATEWAY, "AGENT_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Settings(_)
            | Self::Bind { .. }
            | Self::DrainTimeout { .. }
            | Self::Lifecycle(_)
            | Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();

        let (message, details) = if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
            ("An internal error occurred".to_string(), Some(self.to_string()))
        } else {
            (self.to_string(), None)
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
