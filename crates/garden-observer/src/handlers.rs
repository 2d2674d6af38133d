//! REST endpoint handlers.
//!
//! Submission bodies are read as raw bytes and decoded by the gateway so
//! that every malformed body, whatever its content type, is reported as an
//! `invalid input` error with the same JSON shape.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/gardens` | Full snapshot of every garden |
//! | `GET` | `/gardens/{id}` | One garden |
//! | `GET` | `/gardens/{id}/readings` | Raw reading log of one garden |
//! | `POST` | `/boundary-points` | Submit a boundary corner |
//! | `POST` | `/color-readings` | Submit a color sample |
//! | `DELETE` | `/gardens/{id}` | Delete a garden and all of its data |
//! | `GET` | `/health` | Liveness plus garden and viewer counts |
//!
//! The `/api/...` device routes registered in [`crate::router`] map onto
//! the same handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use garden_core::{BoundaryPointSubmission, ColorReadingSubmission};
use garden_types::{ColorReading, GardenId, GardenView};
use serde::Serialize;
use tracing::info;

use crate::error::ObserverError;
use crate::state::AppState;

/// Acknowledgement body for accepted submissions.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    /// Human-readable outcome.
    pub message: &'static str,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server answers.
    pub status: &'static str,
    /// Number of known gardens.
    pub gardens: usize,
    /// Number of connected viewers.
    pub viewers: usize,
}

fn parse_garden_id(raw: &str) -> Result<GardenId, ObserverError> {
    GardenId::parse(raw)
        .ok_or_else(|| ObserverError::InvalidInput(format!("invalid garden id {raw:?}")))
}

/// Full snapshot of every garden, ordered by identifier.
pub async fn list_gardens(State(state): State<Arc<AppState>>) -> Json<Vec<GardenView>> {
    Json(state.gateway().snapshot().await)
}

/// One garden's full state.
pub async fn get_garden(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<GardenView>, ObserverError> {
    let garden_id = parse_garden_id(&id)?;
    Ok(Json(state.gateway().garden(&garden_id).await?))
}

/// The raw reading log of one garden, oldest first.
pub async fn list_readings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ColorReading>>, ObserverError> {
    let garden_id = parse_garden_id(&id)?;
    Ok(Json(state.gateway().readings(&garden_id).await?))
}

/// Accept one boundary corner.
pub async fn submit_boundary_point(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<MessageResponse>, ObserverError> {
    let submission = BoundaryPointSubmission::from_json(&body)?;
    state.gateway().submit_boundary_point(submission).await?;
    Ok(Json(MessageResponse {
        message: "Point received",
    }))
}

/// Accept one color sample.
pub async fn submit_color_reading(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<MessageResponse>, ObserverError> {
    let submission = ColorReadingSubmission::from_json(&body)?;
    state.gateway().submit_color_reading(submission).await?;
    Ok(Json(MessageResponse {
        message: "Color received",
    }))
}

/// Delete a garden and everything recorded for it.
pub async fn delete_garden(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ObserverError> {
    let garden_id = parse_garden_id(&id)?;
    state.gateway().delete_garden(&garden_id).await?;
    info!(garden_id = %garden_id, "Garden deleted via API");
    Ok(Json(MessageResponse {
        message: "Garden deleted",
    }))
}

/// Liveness check.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        gardens: state.gateway().store().len().await,
        viewers: state.viewer_count(),
    })
}
