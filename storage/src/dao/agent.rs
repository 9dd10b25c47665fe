use collector_core::{AgentEnvironment, AgentId};
use config::TransactionConfig;
use errors::StorageError;
use serde::{Deserialize, Serialize};

use crate::session::SessionHandle;

const AGENT_TABLE: &str = "agent";
const AGENT_CONFIG_TABLE: &str = "agent_config";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub environment: AgentEnvironment,
    /// Epoch millis of the most recent handshake.
    pub last_connected_at: i64
}

/// Known agents and their per-agent transaction config.
#[derive(Clone)]
pub struct AgentDao {
    session: SessionHandle
}

impl AgentDao {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub async fn store_environment(
        &self,
        agent_id: &AgentId,
        environment: &AgentEnvironment,
        connected_at: i64
    ) -> Result<(), StorageError> {
        let record = AgentRecord {
            agent_id: agent_id.clone(),
            environment: environment.clone(),
            last_connected_at: connected_at
        };
        self.session
            .put_json(AGENT_TABLE, agent_id.as_str(), &record)
            .await
    }

    pub async fn read_agent(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>, StorageError> {
        self.session.get_json(AGENT_TABLE, agent_id.as_str()).await
    }

    pub async fn read_agents(&self) -> Result<Vec<AgentRecord>, StorageError> {
        Ok(self
            .session
            .scan_json::<AgentRecord>(AGENT_TABLE, "")
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    pub async fn read_transaction_config(
        &self,
        agent_id: &AgentId
    ) -> Result<Option<TransactionConfig>, StorageError> {
        self.session
            .get_json(AGENT_CONFIG_TABLE, agent_id.as_str())
            .await
    }

    pub async fn store_transaction_config(
        &self,
        agent_id: &AgentId,
        config: &TransactionConfig
    ) -> Result<(), StorageError> {
        self.session
            .put_json(AGENT_CONFIG_TABLE, agent_id.as_str(), config)
            .await
    }
}
