//! Operator maintenance hooks.

use std::sync::Arc;

use async_trait::async_trait;
use collector_core::{Clock, RepoAdmin};
use errors::StorageError;
use tracing::info;

use crate::dao::{AggregateDao, GaugeValueDao, TraceDao};

/// Used when repository maintenance is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopRepoAdmin;

#[async_trait]
impl RepoAdmin for NopRepoAdmin {
    async fn defrag(&self) -> Result<u64, StorageError> {
        Ok(0)
    }

    async fn resize_if_necessary(&self) -> Result<u64, StorageError> {
        Ok(0)
    }
}

/// Maintenance by deleting rows past their retention or over quota.
pub struct ExpirationRepoAdmin {
    aggregate_dao: Arc<AggregateDao>,
    trace_dao: Arc<TraceDao>,
    gauge_value_dao: Arc<GaugeValueDao>,
    clock: Arc<dyn Clock>
}

impl ExpirationRepoAdmin {
    pub fn new(
        aggregate_dao: Arc<AggregateDao>,
        trace_dao: Arc<TraceDao>,
        gauge_value_dao: Arc<GaugeValueDao>,
        clock: Arc<dyn Clock>
    ) -> Self {
        Self {
            aggregate_dao,
            trace_dao,
            gauge_value_dao,
            clock
        }
    }
}

#[async_trait]
impl RepoAdmin for ExpirationRepoAdmin {
    async fn defrag(&self) -> Result<u64, StorageError> {
        let now = self.clock.now_millis();
        let aggregates = self.aggregate_dao.purge_expired(now).await?;
        let gauges = self.gauge_value_dao.purge_expired(now).await?;
        let traces = self.trace_dao.purge_expired(now).await?;

        info!(aggregates, gauges, traces, "Purged expired rows");
        Ok(aggregates + gauges + traces)
    }

    async fn resize_if_necessary(&self) -> Result<u64, StorageError> {
        self.trace_dao.trim_to_capped_size().await
    }
}
