//! HTTP and `WebSocket` transport for the garden grid service.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **REST endpoints** for device submissions (boundary corners and color
//!   readings), garden snapshots, reading logs, and deletion
//! - **`WebSocket` endpoint** (`/ws`) streaming a snapshot followed by live
//!   [`SyncEvent`](garden_types::SyncEvent)s to each viewer
//! - the `/api/...` routes used by deployed field firmware
//!
//! All state lives behind the [`IngestionGateway`](garden_core::IngestionGateway)
//! held in [`AppState`]; this crate only translates HTTP to gateway calls
//! and gateway errors to HTTP status codes.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ObserverError;
pub use router::build_router;
pub use server::{serve, start_server, ServerConfig, ServerError};
pub use state::AppState;
