use std::sync::Arc;

use async_trait::async_trait;
use collector_core::{AgentId, TelemetryKind, TelemetryMessage, TelemetrySink, TimeRange, Trace};
use errors::StorageError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::aggregate::unexpected_message;
use super::{TransactionTypeDao, time_key};
use crate::config_repository::ConfigRepository;
use crate::session::SessionHandle;

const TRACE_TABLE: &str = "trace";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraceRow {
    trace: Trace,
    /// Encoded size of `trace`, used for the capped-size quota.
    size_bytes: u64
}

/// Individual traces with time-based expiry and a size quota.
pub struct TraceDao {
    session: SessionHandle,
    config_repository: Arc<ConfigRepository>,
    transaction_type_dao: TransactionTypeDao
}

impl TraceDao {
    pub fn new(
        session: SessionHandle,
        config_repository: Arc<ConfigRepository>,
        transaction_type_dao: TransactionTypeDao
    ) -> Self {
        Self {
            session,
            config_repository,
            transaction_type_dao
        }
    }

    fn key(agent_id: &AgentId, trace: &Trace) -> String {
        format!("{}\u{1f}{}\u{1f}{}", agent_id, time_key(trace.start_time), trace.id)
    }

    pub async fn store(&self, agent_id: &AgentId, trace: &Trace) -> Result<(), StorageError> {
        let size_bytes = serde_json::to_vec(trace)
            .map_err(|e| StorageError::serialization("Trace", &e))?
            .len() as u64;
        let row = TraceRow {
            trace: trace.clone(),
            size_bytes
        };

        self.transaction_type_dao
            .record(agent_id, &trace.transaction_type)
            .await?;
        self.session
            .put_json(TRACE_TABLE, &Self::key(agent_id, trace), &row)
            .await?;
        debug!(agent_id = %agent_id, trace_id = %trace.id, size_bytes, "Stored trace");
        Ok(())
    }

    /// Traces started inside `range`, most recent first.
    pub async fn read(
        &self,
        agent_id: &AgentId,
        range: TimeRange,
        limit: usize
    ) -> Result<Vec<Trace>, StorageError> {
        let prefix = format!("{}\u{1f}", agent_id);
        let mut traces: Vec<Trace> = self
            .session
            .scan_json::<TraceRow>(TRACE_TABLE, &prefix)
            .await?
            .into_iter()
            .map(|(_, row)| row.trace)
            .filter(|trace| range.contains(trace.start_time))
            .collect();
        traces.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        traces.truncate(limit);
        Ok(traces)
    }

    /// Deletes traces older than the configured trace retention.
    pub async fn purge_expired(&self, now_millis: i64) -> Result<u64, StorageError> {
        let retention = self.config_repository.storage_config().trace_expiration();
        let cutoff = now_millis - retention.as_millis() as i64;
        let mut removed = 0;

        for (key, row) in self.session.scan_json::<TraceRow>(TRACE_TABLE, "").await? {
            if row.trace.start_time < cutoff && self.session.delete(TRACE_TABLE, &key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deletes the oldest traces until the total stored size fits the
    /// capped database size.
    pub async fn trim_to_capped_size(&self) -> Result<u64, StorageError> {
        let limit = self
            .config_repository
            .storage_config()
            .capped_database_size_bytes();
        self.trim_to_size(limit).await
    }

    pub async fn trim_to_size(&self, limit_bytes: u64) -> Result<u64, StorageError> {
        let mut rows = self.session.scan_json::<TraceRow>(TRACE_TABLE, "").await?;
        let mut total: u64 = rows.iter().map(|(_, row)| row.size_bytes).sum();
        if total <= limit_bytes {
            return Ok(0);
        }

        rows.sort_by(|(_, a), (_, b)| a.trace.start_time.cmp(&b.trace.start_time));
        let mut removed = 0;
        for (key, row) in rows {
            if total <= limit_bytes {
                break;
            }
            if self.session.delete(TRACE_TABLE, &key).await? {
                removed += 1;
            }
            total = total.saturating_sub(row.size_bytes);
        }

        info!(removed, remaining_bytes = total, limit_bytes, "Trimmed trace storage");
        Ok(removed)
    }
}

#[async_trait]
impl TelemetrySink for TraceDao {
    fn kind(&self) -> TelemetryKind {
        TelemetryKind::Trace
    }

    async fn accept(&self, agent_id: &AgentId, message: &TelemetryMessage) -> Result<(), StorageError> {
        match message {
            TelemetryMessage::Trace(trace) => self.store(agent_id, trace).await,
            other => Err(unexpected_message(self.kind(), other.kind()))
        }
    }
}
