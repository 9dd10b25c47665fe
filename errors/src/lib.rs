//! # Collector Errors
//!
//! Shared error taxonomy for the telemetry collector.
//!
//! - Uses `thiserror` for structured error definitions
//! - Named fields everywhere so log output carries its own context
//! - Each enum maps to one failure class: settings, storage, agent sessions

use thiserror::Error;

/// Errors resolving the static environment settings at startup.
///
/// Always fatal: the collector refuses to start on any of these.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid value for property {key}: {value:?} ({reason})")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String
    },

    #[error("Failed to read settings file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Settings validation failed: {reason}")]
    Validation { reason: String }
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection to {backend} failed: {reason}")]
    ConnectionError { backend: String, reason: String },

    #[error("Connection to {backend} timed out after {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u64 },

    #[error("Namespace {namespace} could not be prepared: {reason}")]
    NamespaceError { namespace: String, reason: String },

    #[error("Query on {backend} failed: {reason}")]
    QueryError { backend: String, reason: String },

    #[error("Serialization error: {error_type} - {reason}")]
    SerializationError { error_type: String, reason: String },

    #[error("Session on {backend} is closed")]
    Closed { backend: String },

    #[error("Drain of {backend} timed out with {in_flight} operations still running")]
    DrainTimeout { backend: String, in_flight: usize }
}

impl StorageError {
    /// Convenience constructor for serde failures while encoding or decoding
    /// a row.
    pub fn serialization(error_type: &str, err: &serde_json::Error) -> Self {
        Self::SerializationError {
            error_type: error_type.to_string(),
            reason: err.to_string()
        }
    }
}

/// Agent session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Agent {agent_id} is not connected")]
    NotConnected { agent_id: String },

    #[error("Session for agent {agent_id} was superseded by a newer connection")]
    Superseded { agent_id: String },

    #[error("Handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("Agent {agent_id} did not answer within {timeout_ms}ms")]
    Timeout { agent_id: String, timeout_ms: u64 },

    #[error("Send to agent {agent_id} failed: {reason}")]
    SendFailed { agent_id: String, reason: String },

    #[error("Protocol error: {reason}")]
    Protocol { reason: String }
}

impl SessionError {
    /// Whether the caller may retry once the agent reconnects.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected { .. } | Self::Superseded { .. })
    }
}
