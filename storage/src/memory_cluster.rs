//! In-process cluster backend.
//!
//! Tables live in a map shared by every connection made through the same
//! driver, so reconnecting with a clone of the driver sees earlier writes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use errors::StorageError;
use parking_lot::RwLock;

use crate::cluster::{Cluster, ClusterDriver, ClusterSession, ReplicationPolicy};

const BACKEND: &str = "Memory";

#[derive(Default)]
struct MemoryState {
    namespaces: DashMap<String, ReplicationPolicy>,
    tables: DashMap<(String, String), BTreeMap<String, String>>
}

#[derive(Clone, Default)]
pub struct MemoryClusterDriver {
    state: Arc<MemoryState>
}

impl MemoryClusterDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace_policy(&self, namespace: &str) -> Option<ReplicationPolicy> {
        self.state
            .namespaces
            .get(namespace)
            .map(|policy| policy.value().clone())
    }
}

#[async_trait]
impl ClusterDriver for MemoryClusterDriver {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn connect(&self, _contact_points: &[String]) -> Result<Arc<dyn Cluster>, StorageError> {
        Ok(Arc::new(MemoryCluster {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false)
        }))
    }
}

struct MemoryCluster {
    state: Arc<MemoryState>,
    closed: AtomicBool
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn open_session(&self) -> Result<Arc<dyn ClusterSession>, StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed {
                backend: BACKEND.to_string()
            });
        }
        Ok(Arc::new(MemorySession {
            state: Arc::clone(&self.state),
            namespace: RwLock::new(None),
            closed: AtomicBool::new(false)
        }))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemorySession {
    state: Arc<MemoryState>,
    namespace: RwLock<Option<String>>,
    closed: AtomicBool
}

impl MemorySession {
    fn table_key(&self, table: &str) -> Result<(String, String), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed {
                backend: BACKEND.to_string()
            });
        }
        let namespace = self
            .namespace
            .read()
            .clone()
            .ok_or_else(|| StorageError::NamespaceError {
                namespace: String::new(),
                reason: "no namespace selected".to_string()
            })?;
        Ok((namespace, table.to_string()))
    }
}

#[async_trait]
impl ClusterSession for MemorySession {
    async fn ensure_namespace(
        &self,
        namespace: &str,
        replication: &ReplicationPolicy
    ) -> Result<(), StorageError> {
        self.state
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| replication.clone());
        Ok(())
    }

    async fn use_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        if !self.state.namespaces.contains_key(namespace) {
            return Err(StorageError::NamespaceError {
                namespace: namespace.to_string(),
                reason: "namespace does not exist".to_string()
            });
        }
        *self.namespace.write() = Some(namespace.to_string());
        Ok(())
    }

    async fn put(&self, table: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let table_key = self.table_key(table)?;
        self.state
            .tables
            .entry(table_key)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<String>, StorageError> {
        let table_key = self.table_key(table)?;
        Ok(self
            .state
            .tables
            .get(&table_key)
            .and_then(|rows| rows.get(key).cloned()))
    }

    async fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let table_key = self.table_key(table)?;
        let Some(rows) = self.state.tables.get(&table_key) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<bool, StorageError> {
        let table_key = self.table_key(table)?;
        Ok(self
            .state
            .tables
            .get_mut(&table_key)
            .is_some_and(|mut rows| rows.remove(key).is_some()))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
