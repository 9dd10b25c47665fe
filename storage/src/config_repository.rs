//! # Config Repository
//!
//! Owner of the live configuration values.
//!
//! Reads are lock-free snapshots. Writers are serialized: the version check,
//! persistence and swap of an update happen under one async mutex, so two
//! writers starting from the same version can never both succeed.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use collector_core::{AgentCommand, AgentId, DownstreamPush};
use config::{
    AlertConfig, AlertConfigData, StorageConfig, StorageConfigPatch, TransactionConfig,
    TransactionConfigPatch, Validate, Versioned,
};
use errors::StorageError;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dao::{AgentDao, AlertConfigDao, ServerConfigDao};
use crate::rollup::RollupLevel;

/// Bucket widths of the rollup levels, finest first.
pub const ROLLUP_INTERVALS: [Duration; config::ROLLUP_LEVEL_COUNT] = [
    Duration::from_secs(60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(24 * 60 * 60)
];

#[derive(Debug, Error)]
pub enum ConfigUpdateError {
    #[error("Stale {config} config: expected version {expected}, current is {current}")]
    StaleVersion {
        config: String,
        expected: String,
        current: String
    },

    #[error("Invalid {config} config: {reason}")]
    Invalid { config: String, reason: String },

    #[error("Downstream push is already registered")]
    DownstreamAlreadyRegistered,

    #[error(transparent)]
    Storage(#[from] StorageError)
}

/// What happened to the agent copy of an updated transaction config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDelivery {
    Delivered,
    /// The agent picks the config up at its next handshake.
    Deferred { reason: String }
}

#[derive(Debug, Clone)]
pub struct TransactionConfigUpdate {
    pub config: TransactionConfig,
    pub delivery: ConfigDelivery
}

pub struct ConfigRepository {
    agent_dao: AgentDao,
    server_config_dao: ServerConfigDao,
    alert_config_dao: AlertConfigDao,
    storage_config: ArcSwap<StorageConfig>,
    write_lock: Mutex<()>,
    downstream: OnceLock<Arc<dyn DownstreamPush>>
}

impl ConfigRepository {
    /// Loads the persisted storage config, falling back to the default.
    pub async fn load(
        agent_dao: AgentDao,
        server_config_dao: ServerConfigDao,
        alert_config_dao: AlertConfigDao
    ) -> Result<Self, StorageError> {
        let storage_config = match server_config_dao.read_storage_config().await? {
            Some(config) => {
                debug!(version = %config.version(), "Loaded persisted storage config");
                config
            }
            None => {
                info!("No persisted storage config, using defaults");
                StorageConfig::default()
            }
        };

        Ok(Self {
            agent_dao,
            server_config_dao,
            alert_config_dao,
            storage_config: ArcSwap::from_pointee(storage_config),
            write_lock: Mutex::new(()),
            downstream: OnceLock::new()
        })
    }

    /// Wires the channel used to push config changes to agents. Only the
    /// first registration takes effect.
    pub fn register_downstream(
        &self,
        downstream: Arc<dyn DownstreamPush>
    ) -> Result<(), ConfigUpdateError> {
        self.downstream
            .set(downstream)
            .map_err(|_| ConfigUpdateError::DownstreamAlreadyRegistered)
    }

    pub fn has_downstream(&self) -> bool {
        self.downstream.get().is_some()
    }

    pub fn storage_config(&self) -> Arc<StorageConfig> {
        self.storage_config.load_full()
    }

    pub async fn update_storage_config(
        &self,
        patch: StorageConfigPatch,
        prior_version: &str
    ) -> Result<Arc<StorageConfig>, ConfigUpdateError> {
        let result = self.apply_storage_update(patch, prior_version).await;
        record_update("storage", &result);
        result
    }

    async fn apply_storage_update(
        &self,
        patch: StorageConfigPatch,
        prior_version: &str
    ) -> Result<Arc<StorageConfig>, ConfigUpdateError> {
        let _guard = self.write_lock.lock().await;

        let current = self.storage_config.load_full();
        check_version("storage", current.as_ref(), prior_version)?;

        let updated = StorageConfig::overlay(&current).apply(patch).build();
        validate("storage", &updated)?;

        if updated.version() != current.version() {
            self.server_config_dao.store_storage_config(&updated).await?;
            info!(version = %updated.version(), "Storage config updated");
        }

        let updated = Arc::new(updated);
        self.storage_config.store(Arc::clone(&updated));
        Ok(updated)
    }

    pub async fn transaction_config(&self, agent_id: &AgentId) -> Result<TransactionConfig, StorageError> {
        Ok(self
            .agent_dao
            .read_transaction_config(agent_id)
            .await?
            .unwrap_or_default())
    }

    /// Persists the new config, then pushes it to the agent if it is
    /// connected. A failed push does not undo the update.
    ///
    /// The push happens under the write lock, so agents receive updates in
    /// the order they were persisted.
    pub async fn update_transaction_config(
        &self,
        agent_id: &AgentId,
        patch: TransactionConfigPatch,
        prior_version: &str
    ) -> Result<TransactionConfigUpdate, ConfigUpdateError> {
        let _guard = self.write_lock.lock().await;

        let result = self
            .apply_transaction_update(agent_id, patch, prior_version)
            .await;
        record_update("transaction", &result);
        let config = result?;

        let delivery = self.deliver_transaction_config(agent_id, &config).await;
        Ok(TransactionConfigUpdate { config, delivery })
    }

    async fn deliver_transaction_config(
        &self,
        agent_id: &AgentId,
        config: &TransactionConfig
    ) -> ConfigDelivery {
        let Some(downstream) = self.downstream.get() else {
            return ConfigDelivery::Deferred {
                reason: "no downstream registered".to_string()
            };
        };

        let command = AgentCommand::UpdateTransactionConfig {
            config: config.clone()
        };
        match downstream.push_to(agent_id, command).await {
            Ok(()) => ConfigDelivery::Delivered,
            Err(e) => {
                debug!(agent_id = %agent_id, error = %e, "Transaction config push deferred");
                ConfigDelivery::Deferred {
                    reason: e.to_string()
                }
            }
        }
    }

    /// Caller holds `write_lock`.
    async fn apply_transaction_update(
        &self,
        agent_id: &AgentId,
        patch: TransactionConfigPatch,
        prior_version: &str
    ) -> Result<TransactionConfig, ConfigUpdateError> {
        let current = self.transaction_config(agent_id).await?;
        check_version("transaction", &current, prior_version)?;

        let updated = TransactionConfig::overlay(&current).apply(patch).build();
        validate("transaction", &updated)?;

        if updated.version() != current.version() {
            self.agent_dao
                .store_transaction_config(agent_id, &updated)
                .await?;
            info!(agent_id = %agent_id, version = %updated.version(), "Transaction config updated");
        }
        Ok(updated)
    }

    pub async fn alert_configs(&self, agent_id: &AgentId) -> Result<Vec<AlertConfig>, StorageError> {
        self.alert_config_dao.read(agent_id).await
    }

    pub async fn insert_alert_config(
        &self,
        agent_id: &AgentId,
        data: AlertConfigData
    ) -> Result<AlertConfig, ConfigUpdateError> {
        validate("alert", &data)?;
        let _guard = self.write_lock.lock().await;

        let mut alerts = self.alert_config_dao.read(agent_id).await?;
        let alert = AlertConfig::new(data);
        if alerts.iter().any(|a| a.version() == alert.version()) {
            return Err(ConfigUpdateError::Invalid {
                config: "alert".to_string(),
                reason: "an identical alert already exists".to_string()
            });
        }
        alerts.push(alert.clone());
        self.alert_config_dao.store(agent_id, &alerts).await?;
        record_outcome("alert", "success");
        Ok(alert)
    }

    /// Replaces the alert whose version is `prior_version`.
    pub async fn update_alert_config(
        &self,
        agent_id: &AgentId,
        prior_version: &str,
        data: AlertConfigData
    ) -> Result<AlertConfig, ConfigUpdateError> {
        validate("alert", &data)?;
        let _guard = self.write_lock.lock().await;

        let mut alerts = self.alert_config_dao.read(agent_id).await?;
        let Some(slot) = alerts.iter_mut().find(|a| a.is_version(prior_version)) else {
            record_outcome("alert", "conflict");
            return Err(missing_alert(prior_version));
        };
        let alert = AlertConfig::new(data);
        *slot = alert.clone();
        self.alert_config_dao.store(agent_id, &alerts).await?;
        record_outcome("alert", "success");
        Ok(alert)
    }

    pub async fn delete_alert_config(
        &self,
        agent_id: &AgentId,
        version: &str
    ) -> Result<(), ConfigUpdateError> {
        let _guard = self.write_lock.lock().await;

        let mut alerts = self.alert_config_dao.read(agent_id).await?;
        let before = alerts.len();
        alerts.retain(|a| !a.is_version(version));
        if alerts.len() == before {
            record_outcome("alert", "conflict");
            return Err(missing_alert(version));
        }
        self.alert_config_dao.store(agent_id, &alerts).await?;
        record_outcome("alert", "success");
        Ok(())
    }

    /// Current rollup levels: fixed intervals, retention from the live
    /// storage config.
    pub fn rollup_levels(&self) -> Vec<RollupLevel> {
        let storage_config = self.storage_config();
        ROLLUP_INTERVALS
            .iter()
            .enumerate()
            .map(|(level, interval)| RollupLevel {
                level,
                interval: *interval,
                expiration: storage_config
                    .rollup_expiration(level)
                    .unwrap_or(Duration::ZERO)
            })
            .collect()
    }
}

fn check_version<T: Versioned>(
    config: &str,
    current: &T,
    prior_version: &str
) -> Result<(), ConfigUpdateError> {
    if current.is_version(prior_version) {
        Ok(())
    } else {
        Err(ConfigUpdateError::StaleVersion {
            config: config.to_string(),
            expected: prior_version.to_string(),
            current: current.version().to_string()
        })
    }
}

fn validate<T: Validate>(config: &str, value: &T) -> Result<(), ConfigUpdateError> {
    value.validate().map_err(|e| ConfigUpdateError::Invalid {
        config: config.to_string(),
        reason: e.to_string()
    })
}

fn missing_alert(version: &str) -> ConfigUpdateError {
    ConfigUpdateError::StaleVersion {
        config: "alert".to_string(),
        expected: version.to_string(),
        current: String::new()
    }
}

fn record_update<T>(config: &'static str, result: &Result<T, ConfigUpdateError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(ConfigUpdateError::StaleVersion { .. }) => "conflict",
        Err(ConfigUpdateError::Invalid { .. }) => "invalid",
        Err(e) => {
            warn!(config, error = %e, "Config update failed");
            "error"
        }
    };
    record_outcome(config, outcome);
}

fn record_outcome(config: &'static str, outcome: &'static str) {
    metrics::counter!(
        "collector_config_updates_total",
        "config" => config,
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterConnection, ClusterSettings};
    use crate::memory_cluster::MemoryClusterDriver;
    use crate::session::SessionHandle;

    async fn session() -> SessionHandle {
        let settings = ClusterSettings {
            contact_points: vec![],
            namespace: "test".to_string(),
            connect_timeout: None
        };
        ClusterConnection::open(&MemoryClusterDriver::new(), &settings)
            .await
            .unwrap()
            .session()
    }

    async fn repository(session: &SessionHandle) -> ConfigRepository {
        ConfigRepository::load(
            AgentDao::new(session.clone()),
            ServerConfigDao::new(session.clone()),
            AlertConfigDao::new(session.clone())
        )
        .await
        .unwrap()
    }

    fn alert(threshold_millis: u32) -> AlertConfigData {
        AlertConfigData {
            transaction_type: "Web".to_string(),
            percentile: 99.0,
            threshold_millis,
            time_period_minutes: 5,
            min_transaction_count: 1,
            email_addresses: vec!["ops@example.com".to_string()]
        }
    }

    #[tokio::test]
    async fn test_load_defaults_when_nothing_persisted() {
        let session = session().await;
        let repo = repository(&session).await;
        assert_eq!(*repo.storage_config(), StorageConfig::default());
    }

    #[tokio::test]
    async fn test_storage_update_persists_and_swaps() {
        let session = session().await;
        let repo = repository(&session).await;
        let prior = repo.storage_config();

        let patch = StorageConfigPatch {
            trace_expiration_hours: Some(24),
            ..StorageConfigPatch::default()
        };
        let updated = repo
            .update_storage_config(patch, prior.version())
            .await
            .unwrap();

        assert_eq!(updated.trace_expiration_hours(), 24);
        assert_eq!(repo.storage_config().version(), updated.version());
        assert_eq!(prior.trace_expiration_hours(), 168);

        let reloaded = repository(&session).await;
        assert_eq!(reloaded.storage_config().version(), updated.version());
    }

    #[tokio::test]
    async fn test_stale_storage_update_is_rejected() {
        let session = session().await;
        let repo = repository(&session).await;

        let result = repo
            .update_storage_config(StorageConfigPatch::default(), "not-a-version")
            .await;
        assert!(matches!(result, Err(ConfigUpdateError::StaleVersion { .. })));
        assert_eq!(*repo.storage_config(), StorageConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_storage_update_leaves_config_unchanged() {
        let session = session().await;
        let repo = repository(&session).await;
        let prior = repo.storage_config();

        let patch = StorageConfigPatch {
            rollup_expiration_hours: Some(vec![1]),
            ..StorageConfigPatch::default()
        };
        let result = repo.update_storage_config(patch, prior.version()).await;

        assert!(matches!(result, Err(ConfigUpdateError::Invalid { .. })));
        assert_eq!(repo.storage_config().version(), prior.version());
    }

    #[tokio::test]
    async fn test_concurrent_writers_with_same_version_exactly_one_wins() {
        let session = session().await;
        let repo = Arc::new(repository(&session).await);
        let prior = repo.storage_config().version().to_string();

        let mut handles = Vec::new();
        for hours in 1..=8u32 {
            let repo = Arc::clone(&repo);
            let prior = prior.clone();
            handles.push(tokio::spawn(async move {
                let patch = StorageConfigPatch {
                    trace_expiration_hours: Some(hours),
                    ..StorageConfigPatch::default()
                };
                repo.update_storage_config(patch, &prior).await
            }));
        }

        let mut successes = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(ConfigUpdateError::StaleVersion { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}")
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_transaction_update_without_downstream_is_deferred() {
        let session = session().await;
        let repo = repository(&session).await;
        let agent = AgentId::new("agent-1").unwrap();
        let prior = repo.transaction_config(&agent).await.unwrap();

        let patch = TransactionConfigPatch {
            slow_threshold_millis: Some(100),
            ..TransactionConfigPatch::default()
        };
        let update = repo
            .update_transaction_config(&agent, patch, prior.version())
            .await
            .unwrap();

        assert_eq!(update.config.slow_threshold_millis(), 100);
        assert!(matches!(update.delivery, ConfigDelivery::Deferred { .. }));
        assert_eq!(
            repo.transaction_config(&agent).await.unwrap(),
            update.config
        );
    }

    #[tokio::test]
    async fn test_alert_lifecycle() {
        let session = session().await;
        let repo = repository(&session).await;
        let agent = AgentId::new("agent-1").unwrap();

        let first = repo.insert_alert_config(&agent, alert(500)).await.unwrap();
        let second = repo.insert_alert_config(&agent, alert(900)).await.unwrap();
        assert_eq!(repo.alert_configs(&agent).await.unwrap().len(), 2);

        let replaced = repo
            .update_alert_config(&agent, first.version(), alert(600))
            .await
            .unwrap();
        assert!(matches!(
            repo.update_alert_config(&agent, first.version(), alert(700)).await,
            Err(ConfigUpdateError::StaleVersion { .. })
        ));

        repo.delete_alert_config(&agent, second.version())
            .await
            .unwrap();
        let remaining = repo.alert_configs(&agent).await.unwrap();
        assert_eq!(remaining, vec![replaced]);

        assert!(matches!(
            repo.delete_alert_config(&agent, second.version()).await,
            Err(ConfigUpdateError::StaleVersion { .. })
        ));
    }

    #[tokio::test]
    async fn test_rollup_levels_follow_live_storage_config() {
        let session = session().await;
        let repo = repository(&session).await;

        let levels = repo.rollup_levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].interval, Duration::from_secs(60));
        assert_eq!(levels[2].expiration, Duration::from_secs(8760 * 3600));

        let patch = StorageConfigPatch {
            rollup_expiration_hours: Some(vec![1, 2, 3]),
            ..StorageConfigPatch::default()
        };
        let prior = repo.storage_config();
        repo.update_storage_config(patch, prior.version())
            .await
            .unwrap();

        assert_eq!(repo.rollup_levels()[2].expiration, Duration::from_secs(3 * 3600));
    }

    #[tokio::test]
    async fn test_downstream_registers_once() {
        struct NoopDownstream;

        #[async_trait::async_trait]
        impl DownstreamPush for NoopDownstream {
            async fn push_to(
                &self,
                _agent_id: &AgentId,
                _command: AgentCommand
            ) -> Result<(), errors::SessionError> {
                Ok(())
            }

            async fn request(
                &self,
                _agent_id: &AgentId,
                _command: AgentCommand,
                _timeout: Duration
            ) -> Result<serde_json::Value, errors::SessionError> {
                Ok(serde_json::Value::Null)
            }

            fn is_connected(&self, _agent_id: &AgentId) -> bool {
                true
            }
        }

        let session = session().await;
        let repo = repository(&session).await;
        assert!(!repo.has_downstream());
        repo.register_downstream(Arc::new(NoopDownstream)).unwrap();
        assert!(repo.has_downstream());
        assert!(matches!(
            repo.register_downstream(Arc::new(NoopDownstream)),
            Err(ConfigUpdateError::DownstreamAlreadyRegistered)
        ));

        let agent = AgentId::new("agent-1").unwrap();
        let prior = repo.transaction_config(&agent).await.unwrap();
        let update = repo
            .update_transaction_config(&agent, TransactionConfigPatch::default(), prior.version())
            .await
            .unwrap();
        assert_eq!(update.delivery, ConfigDelivery::Delivered);
    }

    /// Records pushed thresholds; the first push stalls until released.
    struct SlowFirstDownstream {
        pushed: parking_lot::Mutex<Vec<u32>>,
        first_entered: tokio::sync::Notify
    }

    #[async_trait::async_trait]
    impl DownstreamPush for SlowFirstDownstream {
        async fn push_to(
            &self,
            _agent_id: &AgentId,
            command: AgentCommand
        ) -> Result<(), errors::SessionError> {
            let AgentCommand::UpdateTransactionConfig { config } = command else {
                return Ok(());
            };
            let first = self.pushed.lock().is_empty();
            if first {
                self.first_entered.notify_one();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.pushed.lock().push(config.slow_threshold_millis());
            Ok(())
        }

        async fn request(
            &self,
            _agent_id: &AgentId,
            _command: AgentCommand,
            _timeout: Duration
        ) -> Result<serde_json::Value, errors::SessionError> {
            Ok(serde_json::Value::Null)
        }

        fn is_connected(&self, _agent_id: &AgentId) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_transaction_pushes_follow_persistence_order() {
        let session = session().await;
        let repo = Arc::new(repository(&session).await);
        let downstream = Arc::new(SlowFirstDownstream {
            pushed: parking_lot::Mutex::new(Vec::new()),
            first_entered: tokio::sync::Notify::new()
        });
        repo.register_downstream(downstream.clone()).unwrap();
        let agent = AgentId::new("agent-1").unwrap();

        let base = TransactionConfig::default();
        let first_config = TransactionConfig::overlay(&base)
            .set_slow_threshold_millis(111)
            .build();

        let first = {
            let repo = Arc::clone(&repo);
            let agent = agent.clone();
            let prior = base.version().to_string();
            tokio::spawn(async move {
                let patch = TransactionConfigPatch {
                    slow_threshold_millis: Some(111),
                    ..TransactionConfigPatch::default()
                };
                repo.update_transaction_config(&agent, patch, &prior).await
            })
        };
        downstream.first_entered.notified().await;

        let patch = TransactionConfigPatch {
            slow_threshold_millis: Some(222),
            ..TransactionConfigPatch::default()
        };
        repo.update_transaction_config(&agent, patch, first_config.version())
            .await
            .unwrap();
        first.await.unwrap().unwrap();

        let stored = repo.transaction_config(&agent).await.unwrap();
        assert_eq!(stored.slow_threshold_millis(), 222);
        assert_eq!(*downstream.pushed.lock(), vec![111, 222]);
    }
}
