use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

/// REST API for the assistant: the ask pipeline plus catalog and status
/// lookups.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // The question-to-insight pipeline
            .route("/ask", post(handlers::ask))
            .route("/sessions/{session_id}/clear", post(handlers::clear_session))
            .route("/suggestions", get(handlers::suggestions))
            // Catalog
            .route("/schema", get(handlers::schema))
            .route("/allowlist", get(handlers::allow_list))
            // System status
            .route("/status", get(handlers::system_status)),
    )
}
