//! Error types for the HTTP layer.
//!
//! [`ObserverError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use garden_core::GardenError;

/// Errors that can occur in the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// A request field or path segment is malformed or out of range.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The garden's boundary is not complete yet.
    #[error("BoundaryNotReady: {0}")]
    BoundaryNotReady(String),

    /// The requested garden was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The persistence backend could not serve the request.
    #[error("storage unavailable: {0}")]
    StorageFailure(String),
}

impl From<GardenError> for ObserverError {
    fn from(err: GardenError) -> Self {
        let message = err.to_string();
        match err {
            GardenError::InvalidInput(_) => Self::InvalidInput(message),
            GardenError::BoundaryNotReady(_) => Self::BoundaryNotReady(message),
            GardenError::NotFound(_) => Self::NotFound(message),
            GardenError::StorageFailure(_) => Self::StorageFailure(message),
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidInput(_) | Self::BoundaryNotReady(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StorageFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
