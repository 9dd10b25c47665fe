//! JSON frames exchanged with agents over the WebSocket transport.

use collector_core::{AgentCommand, AgentEnvironment, TelemetryMessage};
use config::TransactionConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames sent by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentFrame {
    #[serde(rename_all = "camelCase")]
    Hello {
        agent_id: String,
        #[serde(default)]
        environment: AgentEnvironment,
    },
    #[serde(rename_all = "camelCase")]
    Telemetry {
        message: TelemetryMessage,
    },
    /// Answer to a `command` frame that carried a request id. `error` set
    /// means the agent could not run the command.
    #[serde(rename_all = "camelCase")]
    CommandResult {
        request_id: Uuid,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Ping,
}

/// Frames sent by the collector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    HelloAck {
        session_id: Uuid,
        transaction_config: TransactionConfig,
    },
    #[serde(rename_all = "camelCase")]
    Command {
        request_id: Uuid,
        command: AgentCommand,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
    },
    Pong,
}
