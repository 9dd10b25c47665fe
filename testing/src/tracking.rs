use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use errors::StorageError;
use parking_lot::Mutex;
use storage::{Cluster, ClusterDriver, ClusterSession, MemoryClusterDriver, ReplicationPolicy};

const BACKEND: &str = "Tracking";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    Connect,
    OpenSession,
    EnsureNamespace(String),
    UseNamespace(String),
    Put(String),
    Get(String),
    Scan(String),
    Delete(String),
    CloseSession,
    CloseCluster
}

impl ClusterEvent {
    pub fn is_table_access(&self) -> bool {
        matches!(
            self,
            Self::Put(_) | Self::Get(_) | Self::Scan(_) | Self::Delete(_)
        )
    }
}

#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<ClusterEvent>>
}

impl EventLog {
    pub fn record(&self, event: ClusterEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.events.lock().clone()
    }

    pub fn position(&self, predicate: impl Fn(&ClusterEvent) -> bool) -> Option<usize> {
        self.events.lock().iter().position(predicate)
    }

    pub fn contains(&self, event: &ClusterEvent) -> bool {
        self.events.lock().contains(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    #[default]
    Succeed,
    Fail,
    /// Never completes.
    Hang
}

/// Cluster driver over in-process tables that records every call and keeps
/// count of handles not yet closed.
#[derive(Clone, Default)]
pub struct TrackingClusterDriver {
    inner: MemoryClusterDriver,
    log: Arc<EventLog>,
    connect: ConnectBehavior,
    fail_namespace: bool,
    fail_session_close: bool,
    hang_reads: bool,
    open_clusters: Arc<AtomicUsize>,
    open_sessions: Arc<AtomicUsize>
}

impl TrackingClusterDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect(mut self) -> Self {
        self.connect = ConnectBehavior::Fail;
        self
    }

    pub fn hanging_connect(mut self) -> Self {
        self.connect = ConnectBehavior::Hang;
        self
    }

    pub fn failing_namespace(mut self) -> Self {
        self.fail_namespace = true;
        self
    }

    /// Every `get` and `scan` never completes.
    pub fn hanging_reads(mut self) -> Self {
        self.hang_reads = true;
        self
    }

    pub fn failing_session_close(mut self) -> Self {
        self.fail_session_close = true;
        self
    }

    pub fn log(&self) -> Arc<EventLog> {
        Arc::clone(&self.log)
    }

    pub fn open_clusters(&self) -> usize {
        self.open_clusters.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterDriver for TrackingClusterDriver {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn connect(&self, contact_points: &[String]) -> Result<Arc<dyn Cluster>, StorageError> {
        self.log.record(ClusterEvent::Connect);
        match self.connect {
            ConnectBehavior::Succeed => {}
            ConnectBehavior::Fail => {
                return Err(StorageError::ConnectionError {
                    backend: BACKEND.to_string(),
                    reason: "connection refused".to_string()
                });
            }
            ConnectBehavior::Hang => std::future::pending::<()>().await
        }

        let inner = self.inner.connect(contact_points).await?;
        self.open_clusters.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TrackingCluster {
            inner,
            driver: self.clone()
        }))
    }
}

struct TrackingCluster {
    inner: Arc<dyn Cluster>,
    driver: TrackingClusterDriver
}

#[async_trait]
impl Cluster for TrackingCluster {
    async fn open_session(&self) -> Result<Arc<dyn ClusterSession>, StorageError> {
        self.driver.log.record(ClusterEvent::OpenSession);
        let inner = self.inner.open_session().await?;
        self.driver.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TrackingSession {
            inner,
            driver: self.driver.clone()
        }))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.driver.log.record(ClusterEvent::CloseCluster);
        self.driver.open_clusters.fetch_sub(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

struct TrackingSession {
    inner: Arc<dyn ClusterSession>,
    driver: TrackingClusterDriver
}

#[async_trait]
impl ClusterSession for TrackingSession {
    async fn ensure_namespace(
        &self,
        namespace: &str,
        replication: &ReplicationPolicy
    ) -> Result<(), StorageError> {
        self.driver
            .log
            .record(ClusterEvent::EnsureNamespace(namespace.to_string()));
        if self.driver.fail_namespace {
            return Err(StorageError::NamespaceError {
                namespace: namespace.to_string(),
                reason: "permission denied".to_string()
            });
        }
        self.inner.ensure_namespace(namespace, replication).await
    }

    async fn use_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        self.driver
            .log
            .record(ClusterEvent::UseNamespace(namespace.to_string()));
        self.inner.use_namespace(namespace).await
    }

    async fn put(&self, table: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.driver.log.record(ClusterEvent::Put(table.to_string()));
        self.inner.put(table, key, value).await
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<String>, StorageError> {
        self.driver.log.record(ClusterEvent::Get(table.to_string()));
        if self.driver.hang_reads {
            std::future::pending::<()>().await;
        }
        self.inner.get(table, key).await
    }

    async fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        self.driver.log.record(ClusterEvent::Scan(table.to_string()));
        if self.driver.hang_reads {
            std::future::pending::<()>().await;
        }
        self.inner.scan(table, prefix).await
    }

    async fn delete(&self, table: &str, key: &str) -> Result<bool, StorageError> {
        self.driver.log.record(ClusterEvent::Delete(table.to_string()));
        self.inner.delete(table, key).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.driver.log.record(ClusterEvent::CloseSession);
        self.driver.open_sessions.fetch_sub(1, Ordering::SeqCst);
        self.inner.close().await?;
        if self.driver.fail_session_close {
            return Err(StorageError::QueryError {
                backend: BACKEND.to_string(),
                reason: "session close failed".to_string()
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_and_counts_handles() {
        let driver = TrackingClusterDriver::new();
        let cluster = driver.connect(&[]).await.unwrap();
        let session = cluster.open_session().await.unwrap();
        session
            .ensure_namespace("ns", &ReplicationPolicy::simple(1))
            .await
            .unwrap();
        session.use_namespace("ns").await.unwrap();
        session.put("agent", "k", "v").await.unwrap();

        assert_eq!(driver.open_clusters(), 1);
        assert_eq!(driver.open_sessions(), 1);

        session.close().await.unwrap();
        cluster.close().await.unwrap();

        assert_eq!(driver.open_clusters(), 0);
        assert_eq!(driver.open_sessions(), 0);
        assert_eq!(
            driver.log().events(),
            vec![
                ClusterEvent::Connect,
                ClusterEvent::OpenSession,
                ClusterEvent::EnsureNamespace("ns".to_string()),
                ClusterEvent::UseNamespace("ns".to_string()),
                ClusterEvent::Put("agent".to_string()),
                ClusterEvent::CloseSession,
                ClusterEvent::CloseCluster,
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_connect() {
        let driver = TrackingClusterDriver::new().failing_connect();
        assert!(driver.connect(&[]).await.is_err());
        assert_eq!(driver.open_clusters(), 0);
    }
}
