//! Shared session handle with a bounded shutdown drain.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use errors::StorageError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::cluster::ClusterSession;

/// Tracks in-flight operations so shutdown can wait for them.
///
/// Once closed, `enter` refuses new operations; `wait_idle` resolves when the
/// last admitted operation finishes.
#[derive(Debug, Default)]
pub struct DrainGate {
    in_flight: AtomicUsize,
    closing: AtomicBool,
    idle: Notify
}

pub struct DrainPermit<'a> {
    gate: &'a DrainGate
}

impl Drop for DrainPermit<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}

impl DrainGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> Option<DrainPermit<'_>> {
        if self.closing.load(Ordering::SeqCst) {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.closing.load(Ordering::SeqCst) {
            self.leave();
            return None;
        }
        Some(DrainPermit { gate: self })
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no operation is in flight. Returns the number still
    /// running if `timeout` elapses first.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), usize> {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| self.in_flight())
    }
}

/// Cloneable handle on the namespace-bound cluster session.
///
/// Every DAO holds a clone; all of them share one drain gate.
#[derive(Clone)]
pub struct SessionHandle {
    backend: Arc<str>,
    inner: Arc<dyn ClusterSession>,
    gate: Arc<DrainGate>
}

impl SessionHandle {
    pub fn new(backend: impl Into<Arc<str>>, inner: Arc<dyn ClusterSession>) -> Self {
        Self {
            backend: backend.into(),
            inner,
            gate: Arc::new(DrainGate::new())
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    async fn guarded<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>
    {
        let _permit = self.gate.enter().ok_or_else(|| StorageError::Closed {
            backend: self.backend.to_string()
        })?;
        op.await
    }

    pub async fn put(&self, table: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.guarded(self.inner.put(table, key, value)).await
    }

    pub async fn get(&self, table: &str, key: &str) -> Result<Option<String>, StorageError> {
        self.guarded(self.inner.get(table, key)).await
    }

    pub async fn scan(
        &self,
        table: &str,
        prefix: &str
    ) -> Result<Vec<(String, String)>, StorageError> {
        self.guarded(self.inner.scan(table, prefix)).await
    }

    pub async fn delete(&self, table: &str, key: &str) -> Result<bool, StorageError> {
        self.guarded(self.inner.delete(table, key)).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        table: &str,
        key: &str,
        value: &T
    ) -> Result<(), StorageError> {
        let encoded =
            serde_json::to_string(value).map_err(|e| StorageError::serialization(table, &e))?;
        self.put(table, key, &encoded).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        table: &str,
        key: &str
    ) -> Result<Option<T>, StorageError> {
        match self.get(table, key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::serialization(table, &e)),
            None => Ok(None)
        }
    }

    pub async fn scan_json<T: DeserializeOwned>(
        &self,
        table: &str,
        prefix: &str
    ) -> Result<Vec<(String, T)>, StorageError> {
        self.scan(table, prefix)
            .await?
            .into_iter()
            .map(|(key, raw)| {
                serde_json::from_str(&raw)
                    .map(|value| (key, value))
                    .map_err(|e| StorageError::serialization(table, &e))
            })
            .collect()
    }

    /// Stop admitting operations, wait for running ones up to
    /// `drain_timeout`, then close the underlying session.
    ///
    /// The session is closed even when the drain times out; the timeout is
    /// still reported.
    pub async fn close(&self, drain_timeout: Duration) -> Result<(), StorageError> {
        self.gate.close();
        let drained = self.gate.wait_idle(drain_timeout).await;
        if let Err(in_flight) = drained {
            warn!(backend = %self.backend, in_flight, "Session drain timed out");
        }

        self.inner.close().await?;
        debug!(backend = %self.backend, "Session closed");

        drained.map_err(|in_flight| StorageError::DrainTimeout {
            backend: self.backend.to_string(),
            in_flight
        })
    }
}
