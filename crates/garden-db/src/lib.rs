//! `PostgreSQL` persistence backend for garden grid state.
//!
//! The in-memory state store is authoritative while the server runs;
//! `PostgreSQL` holds the durable copy that rebuilds it at startup and
//! the append-only reading log.
//!
//! ```text
//! PersistenceWorker
//!     |
//!     +-- StoreWrite --> PostgresRepository --> GardenStore
//!                                                |-- gardens
//!                                                |-- boundary_points
//!                                                |-- cells
//!                                                +-- readings
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`garden_store`] -- Table operations and row types
//! - [`repository`] -- The backend seam used by the persistence worker
//! - [`error`] -- Shared error types

pub mod error;
pub mod garden_store;
pub mod postgres;
pub mod repository;

pub use error::DbError;
pub use garden_store::{BoundaryPointRow, CellRow, GardenRow, GardenStore, ReadingRow};
pub use postgres::{PostgresConfig, PostgresPool};
pub use repository::PostgresRepository;
