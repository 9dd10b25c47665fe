use collector_core::AgentId;
use config::AlertConfig;
use errors::StorageError;

use crate::session::SessionHandle;

const ALERT_CONFIG_TABLE: &str = "alert_config";

/// Alert lists, stored whole per agent.
#[derive(Clone)]
pub struct AlertConfigDao {
    session: SessionHandle
}

impl AlertConfigDao {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub async fn read(&self, agent_id: &AgentId) -> Result<Vec<AlertConfig>, StorageError> {
        Ok(self
            .session
            .get_json(ALERT_CONFIG_TABLE, agent_id.as_str())
            .await?
            .unwrap_or_default())
    }

    pub async fn store(&self, agent_id: &AgentId, alerts: &[AlertConfig]) -> Result<(), StorageError> {
        self.session
            .put_json(ALERT_CONFIG_TABLE, agent_id.as_str(), alerts)
            .await
    }
}
