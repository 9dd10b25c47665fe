use collector_core::AgentId;
use errors::StorageError;

use crate::session::SessionHandle;

const TRANSACTION_TYPE_TABLE: &str = "transaction_type";

/// Catalog of transaction types seen per agent.
#[derive(Clone)]
pub struct TransactionTypeDao {
    session: SessionHandle
}

impl TransactionTypeDao {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub async fn record(&self, agent_id: &AgentId, transaction_type: &str) -> Result<(), StorageError> {
        let key = format!("{}\u{1f}{}", agent_id, transaction_type);
        self.session
            .put(TRANSACTION_TYPE_TABLE, &key, transaction_type)
            .await
    }

    pub async fn read(&self, agent_id: &AgentId) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{}\u{1f}", agent_id);
        Ok(self
            .session
            .scan(TRANSACTION_TYPE_TABLE, &prefix)
            .await?
            .into_iter()
            .map(|(_, transaction_type)| transaction_type)
            .collect())
    }
}
