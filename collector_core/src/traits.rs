//! Seams between the agent server, the repositories and the UI layer

use std::time::Duration;

use async_trait::async_trait;
use errors::{SessionError, StorageError};

use crate::types::{AgentCommand, AgentId, TelemetryKind, TelemetryMessage};

/// Destination for one kind of agent telemetry.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// The message kind this sink accepts.
    fn kind(&self) -> TelemetryKind;

    async fn accept(&self, agent_id: &AgentId, message: &TelemetryMessage)
    -> Result<(), StorageError>;
}

/// Delivery of commands to connected agents.
///
/// Delivery targets the agent's live session only: nothing is queued for an
/// agent that is not connected, and failed pushes are not retried.
#[async_trait]
pub trait DownstreamPush: Send + Sync {
    async fn push_to(&self, agent_id: &AgentId, command: AgentCommand) -> Result<(), SessionError>;

    /// Push a command and wait for the agent's result.
    async fn request(
        &self,
        agent_id: &AgentId,
        command: AgentCommand,
        timeout: Duration
    ) -> Result<serde_json::Value, SessionError>;

    fn is_connected(&self, agent_id: &AgentId) -> bool;
}

/// Storage maintenance hooks exposed to operators.
#[async_trait]
pub trait RepoAdmin: Send + Sync {
    /// Reclaims space held by expired data. Returns the number of rows
    /// removed.
    async fn defrag(&self) -> Result<u64, StorageError>;

    /// Shrinks trace storage to the configured quota. Returns the number of
    /// rows removed.
    async fn resize_if_necessary(&self) -> Result<u64, StorageError>;
}
