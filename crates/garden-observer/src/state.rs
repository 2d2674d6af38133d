//! Shared application state for the HTTP server.
//!
//! [`AppState`] wraps the [`IngestionGateway`], which owns the garden
//! state store and the viewer hub. Handlers never touch the store
//! directly for writes, so every mutation is ordered and broadcast by the
//! gateway.

use std::sync::Arc;

use garden_core::{GardenStateStore, IngestionGateway, SyncHub};

/// State shared across all request handlers.
#[derive(Debug)]
pub struct AppState {
    gateway: IngestionGateway,
}

impl AppState {
    /// Wrap a gateway.
    pub const fn new(gateway: IngestionGateway) -> Self {
        Self { gateway }
    }

    /// Build state from a store and a hub.
    pub fn from_parts(store: GardenStateStore, hub: Arc<SyncHub>) -> Self {
        Self::new(IngestionGateway::new(store, hub))
    }

    /// The ingestion gateway.
    pub const fn gateway(&self) -> &IngestionGateway {
        &self.gateway
    }

    /// Number of connected viewers.
    pub fn viewer_count(&self) -> usize {
        self.gateway.hub().viewer_count()
    }
}
