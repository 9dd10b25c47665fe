//! UI routes driven in-process through the router.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use collector::agent_server::SessionRegistry;
use collector::ui::create_router;
use collector::{DownstreamService, UiState};
use collector_core::FixedClock;
use serde_json::{Value, json};
use storage::dao::{
    AgentDao, AggregateDao, AlertConfigDao, GaugeValueDao, ServerConfigDao, TraceDao,
    TransactionTypeDao,
};
use storage::{
    ClusterConnection, ClusterSettings, ConfigRepository, MemoryClusterDriver, NopRepoAdmin,
    RollupLevelService,
};
use tower::ServiceExt;

const NOW: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;

async fn router() -> Router {
    let settings = ClusterSettings {
        contact_points: vec![],
        namespace: "ui".to_string(),
        connect_timeout: None,
    };
    let session = ClusterConnection::open(&MemoryClusterDriver::new(), &settings)
        .await
        .unwrap()
        .session();

    let agent_dao = AgentDao::new(session.clone());
    let transaction_type_dao = TransactionTypeDao::new(session.clone());
    let config_repository = Arc::new(
        ConfigRepository::load(
            agent_dao.clone(),
            ServerConfigDao::new(session.clone()),
            AlertConfigDao::new(session.clone()),
        )
        .await
        .unwrap(),
    );
    let clock = Arc::new(FixedClock::new(NOW));

    let state = UiState {
        aggregate_dao: Arc::new(AggregateDao::new(
            session.clone(),
            Arc::clone(&config_repository),
            transaction_type_dao.clone(),
        )),
        trace_dao: Arc::new(TraceDao::new(
            session.clone(),
            Arc::clone(&config_repository),
            transaction_type_dao.clone(),
        )),
        gauge_value_dao: Arc::new(GaugeValueDao::new(
            session,
            Arc::clone(&config_repository),
        )),
        rollup: Arc::new(RollupLevelService::new(
            Arc::clone(&config_repository),
            clock,
            1000,
        )),
        downstream: Arc::new(DownstreamService::new(Arc::new(SessionRegistry::new()))),
        repo_admin: Arc::new(NopRepoAdmin),
        metrics: None,
        config_repository,
        agent_dao,
        transaction_type_dao,
    };
    create_router(Arc::new(state))
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn alert_body(threshold: u32) -> Value {
    json!({
        "transactionType": "Web",
        "percentile": 95.0,
        "thresholdMillis": threshold,
        "timePeriodMinutes": 5,
        "minTransactionCount": 10,
        "emailAddresses": ["ops@example.com"]
    })
}

#[tokio::test]
async fn test_health() {
    let router = router().await;
    let (status, body) = call(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_storage_config_update_and_conflict() {
    let router = router().await;
    let (status, current) = call(&router, "GET", "/backend/config/storage", None).await;
    assert_eq!(status, StatusCode::OK);
    let version = current["version"].as_str().unwrap().to_string();

    let (status, updated) = call(
        &router,
        "POST",
        "/backend/config/storage",
        Some(json!({ "version": version, "cappedDatabaseSizeMb": 2048 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["cappedDatabaseSizeMb"], 2048);
    assert_ne!(updated["version"], current["version"]);

    let (status, error) = call(
        &router,
        "POST",
        "/backend/config/storage",
        Some(json!({ "version": version, "cappedDatabaseSizeMb": 4096 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "STALE_VERSION");
}

#[tokio::test]
async fn test_storage_config_rejects_bad_bodies() {
    let router = router().await;
    let (_, current) = call(&router, "GET", "/backend/config/storage", None).await;

    let (status, _) = call(
        &router,
        "POST",
        "/backend/config/storage",
        Some(json!({ "version": current["version"], "unknownField": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        "POST",
        "/backend/config/storage",
        Some(json!({ "cappedDatabaseSizeMb": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transaction_config_update_for_offline_agent_is_deferred() {
    let router = router().await;
    let (_, current) = call(&router, "GET", "/backend/config/transaction/web-1", None).await;
    assert_eq!(current["slowThresholdMillis"], 2000);

    let (status, updated) = call(
        &router,
        "POST",
        "/backend/config/transaction/web-1",
        Some(json!({ "version": current["version"], "slowThresholdMillis": 750 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["slowThresholdMillis"], 750);
    assert_eq!(updated["delivered"], false);
    assert!(updated["deferredReason"].is_string());
}

#[tokio::test]
async fn test_alert_lifecycle() {
    let router = router().await;
    let uri = "/backend/config/alerts/web-1";

    let (status, created) = call(&router, "POST", uri, Some(alert_body(500))).await;
    assert_eq!(status, StatusCode::CREATED);
    let first_version = created["version"].as_str().unwrap().to_string();

    let mut replacement = alert_body(800);
    replacement["version"] = json!(first_version);
    let (status, updated) = call(&router, "POST", uri, Some(replacement)).await;
    assert_eq!(status, StatusCode::OK);
    let second_version = updated["version"].as_str().unwrap().to_string();

    let (_, alerts) = call(&router, "GET", uri, None).await;
    assert_eq!(alerts.as_array().unwrap().len(), 1);
    assert_eq!(alerts[0]["thresholdMillis"], 800);

    let (status, _) = call(&router, "DELETE", &format!("{uri}/{first_version}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&router, "DELETE", &format!("{uri}/{second_version}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, alerts) = call(&router, "GET", uri, None).await;
    assert!(alerts.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_alert_is_rejected() {
    let router = router().await;
    let mut body = alert_body(500);
    body["emailAddresses"] = json!(["not-an-address"]);

    let (status, error) = call(&router, "POST", "/backend/config/alerts/web-1", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "INVALID_CONFIG");
}

#[tokio::test]
async fn test_rollup_level_endpoint() {
    let router = router().await;
    let uri = format!("/backend/rollup-level?from={}&to={}", NOW - 16 * HOUR, NOW);

    let (status, body) = call(&router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], 0);
    assert_eq!(body["levels"].as_array().unwrap().len(), 3);
    assert_eq!(body["levels"][1]["intervalMillis"], HOUR);
}

#[tokio::test]
async fn test_thread_dump_for_offline_agent_is_not_found() {
    let router = router().await;
    let (status, error) = call(&router, "POST", "/backend/jvm/web-1/thread-dump", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "AGENT_NOT_CONNECTED");
}

#[tokio::test]
async fn test_admin_defrag_with_maintenance_disabled() {
    let router = router().await;
    let (status, body) = call(&router, "POST", "/backend/admin/defrag", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);
}

#[tokio::test]
async fn test_agents_and_traces_start_empty() {
    let router = router().await;
    let (status, agents) = call(&router, "GET", "/backend/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agents, json!([]));

    let (status, traces) = call(&router, "GET", "/backend/traces/web-1?from=0&to=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(traces, json!([]));
}
