//! HTTP request handlers for the UI layer.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use collector_core::{AgentCommand, AgentId, GaugeValue, TimeRange, Trace};
use config::{
    AlertConfig, AlertConfigData, StorageConfig, StorageConfigPatch, TransactionConfig,
    TransactionConfigPatch, UiView,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use storage::dao::{AgentRecord, AggregatePoint};
use storage::{ConfigDelivery, RollupLevel};

use super::state::UiState;
use crate::error::{CollectorError, Result};

const DEFAULT_TRACE_LIMIT: usize = 100;
const THREAD_DUMP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionConfigResponse {
    #[serde(flatten)]
    pub view: UiView<TransactionConfig>,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferred_reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    #[serde(flatten)]
    pub record: AgentRecord,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelView {
    pub level: usize,
    pub interval_millis: u128,
    pub expiration_millis: u128,
}

impl From<RollupLevel> for LevelView {
    fn from(level: RollupLevel) -> Self {
        Self {
            level: level.level,
            interval_millis: level.interval.as_millis(),
            expiration_millis: level.expiration.as_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupLevelResponse {
    pub level: usize,
    pub max_data_points: u32,
    pub levels: Vec<LevelView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesResponse<T> {
    pub level: usize,
    pub points: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct AdminResponse {
    pub removed: u64,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateQuery {
    pub transaction_type: String,
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaugeQuery {
    pub gauge_name: String,
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Deserialize)]
pub struct TraceQuery {
    pub from: i64,
    pub to: i64,
    pub limit: Option<usize>,
}

fn parse_agent_id(raw: String) -> Result<AgentId> {
    AgentId::new(raw).ok_or_else(|| CollectorError::BadRequest("invalid agent id".to_string()))
}

/// Splits a POST body into its `version` and the remaining fields parsed
/// as `T`.
fn split_body<T: DeserializeOwned>(mut body: Map<String, Value>) -> Result<(Option<String>, T)> {
    let version = match body.remove("version") {
        None | Some(Value::Null) => None,
        Some(Value::String(version)) => Some(version),
        Some(_) => {
            return Err(CollectorError::BadRequest(
                "version must be a string".to_string(),
            ));
        }
    };
    let fields = serde_json::from_value(Value::Object(body))
        .map_err(|e| CollectorError::BadRequest(e.to_string()))?;
    Ok((version, fields))
}

fn require_version(version: Option<String>) -> Result<String> {
    version.ok_or_else(|| CollectorError::BadRequest("missing version".to_string()))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// GET /metrics
///
/// Prometheus exposition text for the installed recorder.
pub async fn metrics(State(state): State<Arc<UiState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (StatusCode::OK, body)
}

/// GET /backend/config/storage
pub async fn get_storage_config(State(state): State<Arc<UiState>>) -> Json<UiView<StorageConfig>> {
    Json(UiView::of(state.config_repository.storage_config().as_ref()))
}

/// POST /backend/config/storage
pub async fn update_storage_config(
    State(state): State<Arc<UiState>>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<UiView<StorageConfig>>> {
    let (version, patch) = split_body::<StorageConfigPatch>(body)?;
    let version = require_version(version)?;

    let updated = state
        .config_repository
        .update_storage_config(patch, &version)
        .await?;
    Ok(Json(UiView::of(updated.as_ref())))
}

/// GET /backend/config/transaction/{agent_id}
pub async fn get_transaction_config(
    State(state): State<Arc<UiState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<UiView<TransactionConfig>>> {
    let agent_id = parse_agent_id(agent_id)?;
    let config = state.config_repository.transaction_config(&agent_id).await?;
    Ok(Json(UiView::of(&config)))
}

/// POST /backend/config/transaction/{agent_id}
///
/// The update is persisted whether or not the agent is connected;
/// `delivered` tells whether it was pushed right away.
pub async fn update_transaction_config(
    State(state): State<Arc<UiState>>,
    Path(agent_id): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<TransactionConfigResponse>> {
    let agent_id = parse_agent_id(agent_id)?;
    let (version, patch) = split_body::<TransactionConfigPatch>(body)?;
    let version = require_version(version)?;

    let update = state
        .config_repository
        .update_transaction_config(&agent_id, patch, &version)
        .await?;
    let (delivered, deferred_reason) = match update.delivery {
        ConfigDelivery::Delivered => (true, None),
        ConfigDelivery::Deferred { reason } => (false, Some(reason)),
    };
    Ok(Json(TransactionConfigResponse {
        view: UiView::of(&update.config),
        delivered,
        deferred_reason,
    }))
}

/// GET /backend/config/alerts/{agent_id}
pub async fn get_alert_configs(
    State(state): State<Arc<UiState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<Vec<UiView<AlertConfig>>>> {
    let agent_id = parse_agent_id(agent_id)?;
    let alerts = state.config_repository.alert_configs(&agent_id).await?;
    Ok(Json(alerts.iter().map(UiView::of).collect()))
}

/// POST /backend/config/alerts/{agent_id}
///
/// Without `version` the body creates a new alert; with it, the body
/// replaces the alert carrying that version.
pub async fn save_alert_config(
    State(state): State<Arc<UiState>>,
    Path(agent_id): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<impl IntoResponse> {
    let agent_id = parse_agent_id(agent_id)?;
    let (version, data) = split_body::<AlertConfigData>(body)?;

    let (status, alert) = match version {
        Some(prior) => (
            StatusCode::OK,
            state
                .config_repository
                .update_alert_config(&agent_id, &prior, data)
                .await?,
        ),
        None => (
            StatusCode::CREATED,
            state
                .config_repository
                .insert_alert_config(&agent_id, data)
                .await?,
        ),
    };
    Ok((status, Json(UiView::of(&alert))))
}

/// DELETE /backend/config/alerts/{agent_id}/{version}
pub async fn delete_alert_config(
    State(state): State<Arc<UiState>>,
    Path((agent_id, version)): Path<(String, String)>,
) -> Result<StatusCode> {
    let agent_id = parse_agent_id(agent_id)?;
    state
        .config_repository
        .delete_alert_config(&agent_id, &version)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /backend/agents
pub async fn get_agents(State(state): State<Arc<UiState>>) -> Result<Json<Vec<AgentSummary>>> {
    let agents = state.agent_dao.read_agents().await?;
    Ok(Json(
        agents
            .into_iter()
            .map(|record| AgentSummary {
                connected: state.downstream.is_connected(&record.agent_id),
                record,
            })
            .collect(),
    ))
}

/// GET /backend/transaction-types/{agent_id}
pub async fn get_transaction_types(
    State(state): State<Arc<UiState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<Vec<String>>> {
    let agent_id = parse_agent_id(agent_id)?;
    Ok(Json(state.transaction_type_dao.read(&agent_id).await?))
}

/// GET /backend/rollup-level?from=&to=
pub async fn get_rollup_level(
    State(state): State<Arc<UiState>>,
    Query(query): Query<RangeQuery>,
) -> Json<RollupLevelResponse> {
    Json(RollupLevelResponse {
        level: state.rollup.level_for(query.from, query.to),
        max_data_points: state.rollup.max_data_points(),
        levels: state.rollup.levels().into_iter().map(LevelView::from).collect(),
    })
}

/// GET /backend/aggregates/{agent_id}?transactionType=&from=&to=
pub async fn get_aggregates(
    State(state): State<Arc<UiState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<AggregateQuery>,
) -> Result<Json<SeriesResponse<AggregatePoint>>> {
    let agent_id = parse_agent_id(agent_id)?;
    let level = state.rollup.level_for(query.from, query.to);
    let points = state
        .aggregate_dao
        .read(
            &agent_id,
            &query.transaction_type,
            level,
            TimeRange::new(query.from, query.to),
        )
        .await?;
    Ok(Json(SeriesResponse { level, points }))
}

/// GET /backend/gauges/{agent_id}?gaugeName=&from=&to=
pub async fn get_gauge_values(
    State(state): State<Arc<UiState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<GaugeQuery>,
) -> Result<Json<SeriesResponse<GaugeValue>>> {
    let agent_id = parse_agent_id(agent_id)?;
    let level = state.rollup.level_for(query.from, query.to);
    let points = state
        .gauge_value_dao
        .read(
            &agent_id,
            &query.gauge_name,
            level,
            TimeRange::new(query.from, query.to),
        )
        .await?;
    Ok(Json(SeriesResponse { level, points }))
}

/// GET /backend/traces/{agent_id}?from=&to=&limit=
pub async fn get_traces(
    State(state): State<Arc<UiState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<TraceQuery>,
) -> Result<Json<Vec<Trace>>> {
    let agent_id = parse_agent_id(agent_id)?;
    let traces = state
        .trace_dao
        .read(
            &agent_id,
            TimeRange::new(query.from, query.to),
            query.limit.unwrap_or(DEFAULT_TRACE_LIMIT),
        )
        .await?;
    Ok(Json(traces))
}

/// POST /backend/admin/defrag
pub async fn defrag(State(state): State<Arc<UiState>>) -> Result<Json<AdminResponse>> {
    let removed = state.repo_admin.defrag().await?;
    Ok(Json(AdminResponse { removed }))
}

/// POST /backend/admin/resize
pub async fn resize(State(state): State<Arc<UiState>>) -> Result<Json<AdminResponse>> {
    let removed = state.repo_admin.resize_if_necessary().await?;
    Ok(Json(AdminResponse { removed }))
}

/// POST /backend/jvm/{agent_id}/thread-dump
pub async fn thread_dump(
    State(state): State<Arc<UiState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>> {
    let agent_id = parse_agent_id(agent_id)?;
    let dump = state
        .downstream
        .request(&agent_id, AgentCommand::ThreadDump, THREAD_DUMP_TIMEOUT)
        .await?;
    Ok(Json(dump))
}
