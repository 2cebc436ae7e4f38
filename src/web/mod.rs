//! REST and WebSocket surface over the search registry.

mod api;

pub use api::{ApiError, ResultsPage, StartRequest, WsFrame};

use crate::config::SearchDefaults;
use crate::search::SearchRegistry;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct WebState {
    pub registry: Arc<SearchRegistry>,
    /// Applied to fields a start request leaves out
    pub defaults: Arc<SearchDefaults>,
}

/// Create the web router with all routes
pub fn create_router(registry: Arc<SearchRegistry>, defaults: SearchDefaults) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = WebState {
        registry,
        defaults: Arc::new(defaults),
    };

    Router::new()
        .route("/api/health", get(api::health_handler))
        .route(
            "/api/searches",
            get(api::list_handler).post(api::create_handler),
        )
        .route(
            "/api/searches/{id}",
            get(api::summary_handler).delete(api::remove_handler),
        )
        .route("/api/searches/{id}/start", post(api::start_handler))
        .route("/api/searches/{id}/stop", post(api::stop_handler))
        .route("/api/searches/{id}/results", get(api::results_handler))
        .route("/api/searches/{id}/export", get(api::export_handler))
        .route("/api/searches/{id}/messages", get(api::messages_handler))
        .route("/api/filters/validate", get(api::validate_handler))
        .route("/ws/searches/{id}", get(api::ws_search_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
