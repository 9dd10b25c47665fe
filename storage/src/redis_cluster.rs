//! Redis-backed cluster driver.
//!
//! Layout:
//! - `collector:namespaces`: hash of namespace name to replication policy
//! - `{namespace}:{table}`: one hash per table, field = row key

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use errors::StorageError;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::cluster::{Cluster, ClusterDriver, ClusterSession, ReplicationPolicy};

const BACKEND: &str = "Redis";
const NAMESPACE_REGISTRY: &str = "collector:namespaces";

fn query_error(e: redis::RedisError) -> StorageError {
    StorageError::QueryError {
        backend: BACKEND.to_string(),
        reason: e.to_string()
    }
}

fn contact_url(contact_point: &str) -> String {
    if contact_point.contains("://") {
        contact_point.to_string()
    } else {
        format!("redis://{}", contact_point)
    }
}

/// Connects to the first reachable contact point.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisClusterDriver;

impl RedisClusterDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClusterDriver for RedisClusterDriver {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn connect(&self, contact_points: &[String]) -> Result<Arc<dyn Cluster>, StorageError> {
        let mut failures = Vec::new();

        for point in contact_points {
            let url = contact_url(point);
            let client = match redis::Client::open(url.as_str()) {
                Ok(client) => client,
                Err(e) => {
                    failures.push(format!("{}: {}", point, e));
                    continue;
                }
            };

            match client.get_connection_manager().await {
                Ok(manager) => {
                    debug!(contact_point = %point, "Connected to Redis");
                    return Ok(Arc::new(RedisCluster {
                        manager,
                        closed: AtomicBool::new(false)
                    }));
                }
                Err(e) => {
                    warn!(contact_point = %point, error = %e, "Redis contact point unreachable");
                    failures.push(format!("{}: {}", point, e));
                }
            }
        }

        Err(StorageError::ConnectionError {
            backend: BACKEND.to_string(),
            reason: if failures.is_empty() {
                "no contact points configured".to_string()
            } else {
                failures.join("; ")
            }
        })
    }
}

struct RedisCluster {
    manager: ConnectionManager,
    closed: AtomicBool
}

#[async_trait]
impl Cluster for RedisCluster {
    async fn open_session(&self) -> Result<Arc<dyn ClusterSession>, StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed {
                backend: BACKEND.to_string()
            });
        }
        Ok(Arc::new(RedisSession {
            manager: self.manager.clone(),
            namespace: RwLock::new(None),
            closed: AtomicBool::new(false)
        }))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct RedisSession {
    manager: ConnectionManager,
    namespace: RwLock<Option<String>>,
    closed: AtomicBool
}

impl RedisSession {
    fn table_key(&self, table: &str) -> Result<String, StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed {
                backend: BACKEND.to_string()
            });
        }
        match self.namespace.read().as_deref() {
            Some(namespace) => Ok(format!("{}:{}", namespace, table)),
            None => Err(StorageError::NamespaceError {
                namespace: String::new(),
                reason: "no namespace selected".to_string()
            })
        }
    }
}

#[async_trait]
impl ClusterSession for RedisSession {
    async fn ensure_namespace(
        &self,
        namespace: &str,
        replication: &ReplicationPolicy
    ) -> Result<(), StorageError> {
        let policy = serde_json::to_string(replication)
            .map_err(|e| StorageError::serialization("ReplicationPolicy", &e))?;
        let mut conn = self.manager.clone();

        let created: bool = redis::cmd("HSETNX")
            .arg(NAMESPACE_REGISTRY)
            .arg(namespace)
            .arg(policy)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::NamespaceError {
                namespace: namespace.to_string(),
                reason: e.to_string()
            })?;

        debug!(namespace, created, "Namespace ensured");
        Ok(())
    }

    async fn use_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        let mut conn = self.manager.clone();
        let exists: bool = redis::cmd("HEXISTS")
            .arg(NAMESPACE_REGISTRY)
            .arg(namespace)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::NamespaceError {
                namespace: namespace.to_string(),
                reason: e.to_string()
            })?;

        if !exists {
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
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(&table_key)
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<String>, StorageError> {
        let table_key = self.table_key(table)?;
        let mut conn = self.manager.clone();
        redis::cmd("HGET")
            .arg(&table_key)
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(query_error)
    }

    async fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let table_key = self.table_key(table)?;
        let mut conn = self.manager.clone();
        let rows: BTreeMap<String, String> = redis::cmd("HGETALL")
            .arg(&table_key)
            .query_async(&mut conn)
            .await
            .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .collect())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<bool, StorageError> {
        let table_key = self.table_key(table)?;
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("HDEL")
            .arg(&table_key)
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(query_error)?;
        Ok(removed > 0)
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
