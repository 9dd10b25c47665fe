use std::sync::Arc;

use async_trait::async_trait;
use collector_core::{AgentId, TelemetryKind, TelemetryMessage, TelemetrySink, TimeRange, TransactionAggregate};
use errors::StorageError;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{TransactionTypeDao, rollup_capture_time, time_key};
use crate::config_repository::ConfigRepository;
use crate::session::SessionHandle;

const AGGREGATE_TABLE: &str = "aggregate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatePoint {
    pub capture_time: i64,
    pub aggregate: TransactionAggregate
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregateRow {
    level: usize,
    capture_time: i64,
    aggregate: TransactionAggregate
}

/// Transaction aggregates, rolled up into every level on write.
pub struct AggregateDao {
    session: SessionHandle,
    config_repository: Arc<ConfigRepository>,
    transaction_type_dao: TransactionTypeDao,
    merge_lock: Mutex<()>
}

impl AggregateDao {
    pub fn new(
        session: SessionHandle,
        config_repository: Arc<ConfigRepository>,
        transaction_type_dao: TransactionTypeDao
    ) -> Self {
        Self {
            session,
            config_repository,
            transaction_type_dao,
            merge_lock: Mutex::new(())
        }
    }

    fn prefix(agent_id: &AgentId, level: usize, transaction_type: &str) -> String {
        format!("{}\u{1f}{}\u{1f}{}\u{1f}", agent_id, level, transaction_type)
    }

    pub async fn store(
        &self,
        agent_id: &AgentId,
        capture_time: i64,
        aggregates: &[TransactionAggregate]
    ) -> Result<(), StorageError> {
        let levels = self.config_repository.rollup_levels();
        let _guard = self.merge_lock.lock().await;

        for aggregate in aggregates {
            self.transaction_type_dao
                .record(agent_id, &aggregate.transaction_type)
                .await?;

            for level in &levels {
                let bucket = rollup_capture_time(capture_time, level.interval_millis());
                let key = format!(
                    "{}{}",
                    Self::prefix(agent_id, level.level, &aggregate.transaction_type),
                    time_key(bucket)
                );

                let row = match self
                    .session
                    .get_json::<AggregateRow>(AGGREGATE_TABLE, &key)
                    .await?
                {
                    Some(mut existing) => {
                        existing.aggregate.merge(aggregate);
                        existing
                    }
                    None => AggregateRow {
                        level: level.level,
                        capture_time: bucket,
                        aggregate: aggregate.clone()
                    }
                };
                self.session.put_json(AGGREGATE_TABLE, &key, &row).await?;
            }
        }

        debug!(agent_id = %agent_id, count = aggregates.len(), "Stored aggregates");
        Ok(())
    }

    /// Points of one level whose bucket end falls inside `range`, oldest
    /// first.
    pub async fn read(
        &self,
        agent_id: &AgentId,
        transaction_type: &str,
        level: usize,
        range: TimeRange
    ) -> Result<Vec<AggregatePoint>, StorageError> {
        let prefix = Self::prefix(agent_id, level, transaction_type);
        Ok(self
            .session
            .scan_json::<AggregateRow>(AGGREGATE_TABLE, &prefix)
            .await?
            .into_iter()
            .map(|(_, row)| row)
            .filter(|row| range.contains(row.capture_time))
            .map(|row| AggregatePoint {
                capture_time: row.capture_time,
                aggregate: row.aggregate
            })
            .collect())
    }

    /// Deletes rows older than their level's retention.
    pub async fn purge_expired(&self, now_millis: i64) -> Result<u64, StorageError> {
        let levels = self.config_repository.rollup_levels();
        let _guard = self.merge_lock.lock().await;
        let mut removed = 0;

        for (key, row) in self
            .session
            .scan_json::<AggregateRow>(AGGREGATE_TABLE, "")
            .await?
        {
            let Some(level) = levels.get(row.level) else {
                continue;
            };
            if row.capture_time < now_millis - level.expiration.as_millis() as i64
                && self.session.delete(AGGREGATE_TABLE, &key).await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl TelemetrySink for AggregateDao {
    fn kind(&self) -> TelemetryKind {
        TelemetryKind::Aggregates
    }

    async fn accept(&self, agent_id: &AgentId, message: &TelemetryMessage) -> Result<(), StorageError> {
        match message {
            TelemetryMessage::Aggregates {
                capture_time,
                aggregates
            } => self.store(agent_id, *capture_time, aggregates).await,
            other => Err(unexpected_message(self.kind(), other.kind()))
        }
    }
}

pub(crate) fn unexpected_message(expected: TelemetryKind, actual: TelemetryKind) -> StorageError {
    StorageError::SerializationError {
        error_type: expected.to_string(),
        reason: format!("sink for {} received {}", expected, actual)
    }
}
