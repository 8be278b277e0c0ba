//! Axum router construction for the coordination API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS, request tracing, and a per-request timeout.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// See [`handlers`] for the endpoint table. `GET /ws` is the change
/// event stream.
///
/// CORS allows any origin so dashboards can be served from anywhere.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let timeout = TimeoutLayer::new(state.request_timeout);

    Router::new()
        .route("/health", get(handlers::health))
        // WebSocket
        .route("/ws", get(ws::ws_events))
        // Disaster records
        .route(
            "/disasters",
            get(handlers::list_disasters).post(handlers::create_disaster),
        )
        .route(
            "/disasters/{id}",
            get(handlers::get_disaster)
                .put(handlers::update_disaster)
                .delete(handlers::delete_disaster),
        )
        // Dependent data
        .route(
            "/disasters/{id}/resources",
            get(handlers::get_resources).post(handlers::create_resource),
        )
        .route("/disasters/{id}/social-media", get(handlers::get_social_media))
        .route(
            "/disasters/{id}/reports",
            get(handlers::list_reports).post(handlers::create_report),
        )
        .route("/disasters/{id}/verify-image", post(handlers::verify_image))
        .layer(timeout)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
