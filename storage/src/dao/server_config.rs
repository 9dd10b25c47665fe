use config::StorageConfig;
use errors::StorageError;

use crate::session::SessionHandle;

const SERVER_CONFIG_TABLE: &str = "server_config";
const STORAGE_CONFIG_KEY: &str = "storage";

/// Persisted server-wide configuration values.
#[derive(Clone)]
pub struct ServerConfigDao {
    session: SessionHandle
}

impl ServerConfigDao {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub async fn read_storage_config(&self) -> Result<Option<StorageConfig>, StorageError> {
        self.session
            .get_json(SERVER_CONFIG_TABLE, STORAGE_CONFIG_KEY)
            .await
    }

    pub async fn store_storage_config(&self, config: &StorageConfig) -> Result<(), StorageError> {
        self.session
            .put_json(SERVER_CONFIG_TABLE, STORAGE_CONFIG_KEY, config)
            .await
    }
}
