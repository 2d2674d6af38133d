//! Garden grid state engine.
//!
//! Turns device submissions into authoritative garden state and a live
//! event stream for viewers:
//!
//! ```text
//! device ──> IngestionGateway ──> GardenStateStore ──> persistence queue ──> backend
//!                  │                     │
//!                  └──── SyncHub <───────┘ (state changes)
//!                           │
//!                        viewers
//! ```
//!
//! # Modules
//!
//! - [`grid`] -- Maps a geo sample to one of a garden's 100 cells
//! - [`store`] -- In-memory authority for boundaries and grids
//! - [`hub`] -- Bounded per-viewer fan-out of [`SyncEvent`](garden_types::SyncEvent)s
//! - [`gateway`] -- Validation, ordering, and broadcast of submissions
//! - [`persist`] -- Write-behind queue and the backend trait
//! - [`memory`] -- In-process backend
//! - [`config`] -- YAML configuration with environment overrides
//! - [`error`] -- Error taxonomy

pub mod config;
pub mod error;
pub mod gateway;
pub mod grid;
pub mod hub;
pub mod memory;
pub mod persist;
pub mod store;

pub use config::{ConfigError, GardenConfig, StorageBackend};
pub use error::{GardenError, StorageError};
pub use gateway::{BoundaryPointSubmission, ColorReadingSubmission, IngestionGateway};
pub use grid::{map_to_cell, GridBox, Placement};
pub use hub::{SyncHub, ViewerSession};
pub use memory::MemoryRepository;
pub use persist::{
    spawn_persistence, GardenRecord, GardenRepository, PersistenceHandle, PersistenceWorker,
    RetryPolicy, StoreWrite,
};
pub use store::{BoundaryUpdateResult, ColorUpdateResult, GardenStateStore};
