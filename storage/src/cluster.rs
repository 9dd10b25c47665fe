//! # Cluster Connection
//!
//! Driver-agnostic access to the storage cluster.
//!
//! A [`ClusterDriver`] produces a [`Cluster`] handle; the handle opens a
//! [`ClusterSession`] that is bound to one namespace before any table access.
//! [`ClusterConnection::open`] runs that whole bootstrap and releases whatever
//! it acquired if a later step fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::EnvironmentSettings;
use errors::StorageError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::session::SessionHandle;

/// Replication settings recorded with a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationPolicy {
    pub class: String,
    pub replication_factor: u32
}

impl ReplicationPolicy {
    pub fn simple(replication_factor: u32) -> Self {
        Self {
            class: "SimpleStrategy".to_string(),
            replication_factor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSettings {
    pub contact_points: Vec<String>,
    pub namespace: String,
    /// `None` waits for the driver indefinitely.
    pub connect_timeout: Option<Duration>
}

impl ClusterSettings {
    pub fn from_environment(settings: &EnvironmentSettings) -> Self {
        Self {
            contact_points: settings.contact_points.clone(),
            namespace: settings.namespace.clone(),
            connect_timeout: settings.connect_timeout
        }
    }
}

#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Backend name used in errors and logs.
    fn backend(&self) -> &str;

    async fn connect(&self, contact_points: &[String]) -> Result<Arc<dyn Cluster>, StorageError>;
}

#[async_trait]
pub trait Cluster: Send + Sync {
    async fn open_session(&self) -> Result<Arc<dyn ClusterSession>, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// Table-level operations on one namespace.
///
/// Tables are flat string-keyed maps; values are opaque strings (JSON in
/// practice). Every table operation fails until `use_namespace` succeeded.
#[async_trait]
pub trait ClusterSession: Send + Sync {
    /// Creates the namespace if absent. Never alters an existing one.
    async fn ensure_namespace(
        &self,
        namespace: &str,
        replication: &ReplicationPolicy
    ) -> Result<(), StorageError>;

    async fn use_namespace(&self, namespace: &str) -> Result<(), StorageError>;

    async fn put(&self, table: &str, key: &str, value: &str) -> Result<(), StorageError>;

    async fn get(&self, table: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// All rows whose key starts with `prefix`, ordered by key.
    async fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, String)>, StorageError>;

    /// Returns whether a row was removed.
    async fn delete(&self, table: &str, key: &str) -> Result<bool, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// An open cluster handle plus the namespace-bound session on it.
pub struct ClusterConnection {
    backend: String,
    cluster: Arc<dyn Cluster>,
    session: SessionHandle
}

impl ClusterConnection {
    /// Connect, ensure the namespace exists with replication factor 1 and bind
    /// the session to it.
    ///
    /// Without a `connect_timeout` a driver that never answers keeps this
    /// future pending.
    pub async fn open(
        driver: &dyn ClusterDriver,
        settings: &ClusterSettings
    ) -> Result<Self, StorageError> {
        let backend = driver.backend().to_string();
        info!(
            backend = %backend,
            contact_points = ?settings.contact_points,
            "Connecting to storage cluster"
        );

        let connect = driver.connect(&settings.contact_points);
        let cluster = match settings.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| StorageError::Timeout {
                    backend: backend.clone(),
                    timeout_ms: timeout.as_millis() as u64
                })??,
            None => connect.await?
        };

        let session = match cluster.open_session().await {
            Ok(session) => session,
            Err(e) => {
                release_cluster(&backend, cluster.as_ref()).await;
                return Err(e);
            }
        };

        if let Err(e) = bootstrap_namespace(session.as_ref(), &settings.namespace).await {
            if let Err(close_err) = session.close().await {
                warn!(backend = %backend, error = %close_err, "Failed to close session after bootstrap failure");
            }
            release_cluster(&backend, cluster.as_ref()).await;
            return Err(e);
        }

        info!(backend = %backend, namespace = %settings.namespace, "Storage session ready");
        Ok(Self {
            session: SessionHandle::new(backend.clone(), session),
            backend,
            cluster
        })
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Shared handle for DAO construction.
    pub fn session(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Drain in-flight operations (bounded by `drain_timeout`) and close the
    /// session.
    pub async fn close_session(&self, drain_timeout: Duration) -> Result<(), StorageError> {
        self.session.close(drain_timeout).await
    }

    pub async fn close_cluster(&self) -> Result<(), StorageError> {
        self.cluster.close().await
    }
}

async fn bootstrap_namespace(session: &dyn ClusterSession, namespace: &str) -> Result<(), StorageError> {
    session
        .ensure_namespace(namespace, &ReplicationPolicy::simple(1))
        .await?;
    session.use_namespace(namespace).await
}

async fn release_cluster(backend: &str, cluster: &dyn Cluster) {
    if let Err(e) = cluster.close().await {
        warn!(backend = %backend, error = %e, "Failed to close cluster after startup failure");
    }
}
