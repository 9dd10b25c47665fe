use std::sync::Arc;

use collector_core::{DownstreamPush, RepoAdmin};
use metrics_exporter_prometheus::PrometheusHandle;
use storage::dao::{AgentDao, AggregateDao, GaugeValueDao, TraceDao, TransactionTypeDao};
use storage::{ConfigRepository, RollupLevelService};

/// Handles the UI layer reads from and writes through.
pub struct UiState {
    pub config_repository: Arc<ConfigRepository>,
    pub agent_dao: AgentDao,
    pub transaction_type_dao: TransactionTypeDao,
    pub aggregate_dao: Arc<AggregateDao>,
    pub trace_dao: Arc<TraceDao>,
    pub gauge_value_dao: Arc<GaugeValueDao>,
    pub rollup: Arc<RollupLevelService>,
    pub downstream: Arc<dyn DownstreamPush>,
    pub repo_admin: Arc<dyn RepoAdmin>,
    /// Absent when no global recorder is installed; `/metrics` is then
    /// empty.
    pub metrics: Option<PrometheusHandle>,
}
