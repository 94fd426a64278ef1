use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/healthz", get(handlers::api::health))
}

// API Routes - REST API consumed by the dashboard UI
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Schema
            .route("/schema", get(handlers::api::get_schema))
            // Read path
            .route("/query/generate", post(handlers::api::generate_query))
            .route("/query/run", post(handlers::api::run_query))
            .route("/query/ask", post(handlers::api::ask))
            .route("/query/explain", post(handlers::api::explain_query))
            .route("/query/chart", post(handlers::api::chart_config))
            // Write path
            .route("/dml/generate", post(handlers::api::generate_dml))
            .route("/dml/run", post(handlers::api::run_dml))
            // History
            .route("/queries", get(handlers::api::query_history))
            // Dashboards
            .route(
                "/dashboards",
                get(handlers::api::list_dashboards).post(handlers::api::save_dashboard),
            )
            .route("/dashboards/generate", post(handlers::api::generate_dashboard))
            .route(
                "/dashboards/{id}",
                get(handlers::api::get_dashboard).delete(handlers::api::delete_dashboard),
            ),
    )
}
