//! Error types for the garden state engine.
//!
//! [`GardenError`] is the taxonomy every caller sees. A sample that falls
//! outside a garden's grid box is absent: that is a normal
//! outcome ([`Placement::OutOfBounds`](crate::grid::Placement)), recorded in
//! the reading log but not an error.

use garden_types::GardenId;

/// Errors returned by the state store and the ingestion gateway.
#[derive(Debug, thiserror::Error)]
pub enum GardenError {
    /// A request field is missing, malformed, or out of range. Nothing
    /// was mutated.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The garden is unknown or its boundary does not have four corners
    /// yet. Expected while a device is still walking the boundary; the
    /// client should retry once the boundary is complete.
    #[error("garden {0} boundary is not complete")]
    BoundaryNotReady(GardenId),

    /// No garden with this identifier exists.
    #[error("garden {0} not found")]
    NotFound(GardenId),

    /// The persistence backend could not serve a request for which it is
    /// the only source of truth.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl From<StorageError> for GardenError {
    fn from(err: StorageError) -> Self {
        Self::StorageFailure(err.to_string())
    }
}

/// Failure reported by a persistence backend.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StorageError {
    message: String,
}

impl StorageError {
    /// Create a storage error from a description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_converts_to_storage_failure() {
        let err = GardenError::from(StorageError::new("connection refused"));
        assert!(matches!(err, GardenError::StorageFailure(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn boundary_not_ready_names_garden() {
        let id = GardenId::parse("12");
        assert!(id.is_some());
        if let Some(id) = id {
            let msg = GardenError::BoundaryNotReady(id).to_string();
            assert!(msg.contains("12"));
        }
    }
}
