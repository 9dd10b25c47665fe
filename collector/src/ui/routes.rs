//! Route definitions for the UI layer.

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::UiState;

/// Creates the Axum router with all routes configured.
pub fn create_router(state: Arc<UiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let config = Router::new()
        .route(
            "/storage",
            get(handlers::get_storage_config).post(handlers::update_storage_config),
        )
        .route(
            "/transaction/{agent_id}",
            get(handlers::get_transaction_config).post(handlers::update_transaction_config),
        )
        .route(
            "/alerts/{agent_id}",
            get(handlers::get_alert_configs).post(handlers::save_alert_config),
        )
        .route(
            "/alerts/{agent_id}/{version}",
            delete(handlers::delete_alert_config),
        );

    let backend = Router::new()
        .nest("/config", config)
        .route("/agents", get(handlers::get_agents))
        .route(
            "/transaction-types/{agent_id}",
            get(handlers::get_transaction_types),
        )
        .route("/rollup-level", get(handlers::get_rollup_level))
        .route("/aggregates/{agent_id}", get(handlers::get_aggregates))
        .route("/gauges/{agent_id}", get(handlers::get_gauge_values))
        .route("/traces/{agent_id}", get(handlers::get_traces))
        .route("/admin/defrag", post(handlers::defrag))
        .route("/admin/resize", post(handlers::resize))
        .route("/jvm/{agent_id}/thread-dump", post(handlers::thread_dump));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .nest("/backend", backend)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
