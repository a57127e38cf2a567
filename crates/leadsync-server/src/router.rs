use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Build the axum router with all LeadSync endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route("/v1/sources/:source/events", post(handler::ingest_handler))
        .route("/v1/leads", get(handler::list_leads_handler))
        .route("/v1/leads/:id", get(handler::get_lead_handler))
        .route("/v1/dead-letters", get(handler::dead_letters_handler))
        .route("/v1/stats", get(handler::stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
