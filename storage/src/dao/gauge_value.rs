use std::sync::Arc;

use async_trait::async_trait;
use collector_core::{AgentId, GaugeValue, TelemetryKind, TelemetryMessage, TelemetrySink, TimeRange};
use errors::StorageError;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::aggregate::unexpected_message;
use super::{rollup_capture_time, time_key};
use crate::config_repository::ConfigRepository;
use crate::session::SessionHandle;

const GAUGE_VALUE_TABLE: &str = "gauge_value";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GaugeRow {
    level: usize,
    value: GaugeValue
}

/// JVM gauge samples, averaged into every rollup level on write.
pub struct GaugeValueDao {
    session: SessionHandle,
    config_repository: Arc<ConfigRepository>,
    merge_lock: Mutex<()>
}

impl GaugeValueDao {
    pub fn new(session: SessionHandle, config_repository: Arc<ConfigRepository>) -> Self {
        Self {
            session,
            config_repository,
            merge_lock: Mutex::new(())
        }
    }

    fn prefix(agent_id: &AgentId, level: usize, gauge_name: &str) -> String {
        format!("{}\u{1f}{}\u{1f}{}\u{1f}", agent_id, level, gauge_name)
    }

    pub async fn store(&self, agent_id: &AgentId, values: &[GaugeValue]) -> Result<(), StorageError> {
        let levels = self.config_repository.rollup_levels();
        let _guard = self.merge_lock.lock().await;

        for value in values {
            for level in &levels {
                let bucket = rollup_capture_time(value.capture_time, level.interval_millis());
                let key = format!(
                    "{}{}",
                    Self::prefix(agent_id, level.level, &value.gauge_name),
                    time_key(bucket)
                );

                let mut sample = value.clone();
                sample.capture_time = bucket;
                let row = match self
                    .session
                    .get_json::<GaugeRow>(GAUGE_VALUE_TABLE, &key)
                    .await?
                {
                    Some(mut existing) => {
                        existing.value.merge(&sample);
                        existing
                    }
                    None => GaugeRow {
                        level: level.level,
                        value: sample
                    }
                };
                self.session.put_json(GAUGE_VALUE_TABLE, &key, &row).await?;
            }
        }
        Ok(())
    }

    pub async fn read(
        &self,
        agent_id: &AgentId,
        gauge_name: &str,
        level: usize,
        range: TimeRange
    ) -> Result<Vec<GaugeValue>, StorageError> {
        let prefix = Self::prefix(agent_id, level, gauge_name);
        Ok(self
            .session
            .scan_json::<GaugeRow>(GAUGE_VALUE_TABLE, &prefix)
            .await?
            .into_iter()
            .map(|(_, row)| row.value)
            .filter(|value| range.contains(value.capture_time))
            .collect())
    }

    pub async fn purge_expired(&self, now_millis: i64) -> Result<u64, StorageError> {
        let levels = self.config_repository.rollup_levels();
        let _guard = self.merge_lock.lock().await;
        let mut removed = 0;

        for (key, row) in self
            .session
            .scan_json::<GaugeRow>(GAUGE_VALUE_TABLE, "")
            .await?
        {
            let Some(level) = levels.get(row.level) else {
                continue;
            };
            if row.value.capture_time < now_millis - level.expiration.as_millis() as i64
                && self.session.delete(GAUGE_VALUE_TABLE, &key).await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl TelemetrySink for GaugeValueDao {
    fn kind(&self) -> TelemetryKind {
        TelemetryKind::GaugeValues
    }

    async fn accept(&self, agent_id: &AgentId, message: &TelemetryMessage) -> Result<(), StorageError> {
        match message {
            TelemetryMessage::GaugeValues { values } => self.store(agent_id, values).await,
            other => Err(unexpected_message(self.kind(), other.kind()))
        }
    }
}
