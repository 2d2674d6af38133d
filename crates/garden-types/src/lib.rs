//! Shared type definitions for the garden grid synchronization service.
//!
//! This crate is the single source of truth for the types that cross crate
//! boundaries: the ingestion gateway, the state store, the persistence
//! backends, and the viewer wire protocol. Types flow downstream to
//! `TypeScript` via `ts-rs` for the viewer dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Garden and viewer identifiers
//! - [`structs`] -- Geometry, colors, boundary, grid, and reading records
//! - [`events`] -- Real-time events pushed to connected viewers

pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use events::{CellUpdate, GardenDeleted, GardenSummary, SyncEvent};
pub use ids::{GardenId, ViewerId, MAX_GARDEN_ID_LEN};
pub use structs::{
    Boundary, BoundaryState, Cell, CellIndex, ColorReading, GardenView, GeoPoint, Grid,
    GridSizeError, PointNo, Rgb, BOUNDARY_POINTS, GRID_CELLS, GRID_SIDE,
};
