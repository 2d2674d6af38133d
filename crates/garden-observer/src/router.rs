//! Axum router construction.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for the browser dashboard.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /gardens`, `GET /gardens/{id}`, `GET /gardens/{id}/readings`
/// - `POST /boundary-points`, `POST /color-readings`
/// - `DELETE /gardens/{id}`
/// - `GET /health`
/// - `GET /ws` -- live viewer stream
/// - the `/api/...` routes used by deployed field devices
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Viewer channel
        .route("/ws", get(ws::ws_viewer))
        // REST API
        .route("/gardens", get(handlers::list_gardens))
        .route(
            "/gardens/{id}",
            get(handlers::get_garden).delete(handlers::delete_garden),
        )
        .route("/gardens/{id}/readings", get(handlers::list_readings))
        .route("/boundary-points", post(handlers::submit_boundary_point))
        .route("/color-readings", post(handlers::submit_color_reading))
        .route("/health", get(handlers::health))
        // Device firmware routes
        .route("/api/upload_point", post(handlers::submit_boundary_point))
        .route("/api/upload_color", post(handlers::submit_color_reading))
        .route("/api/get_all_gardens", get(handlers::list_gardens))
        .route("/api/get_garden_colors/{id}", get(handlers::list_readings))
        .route("/api/delete_garden/{id}", delete(handlers::delete_garden))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
