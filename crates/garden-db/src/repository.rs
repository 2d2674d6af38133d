//! [`GardenRepository`] backed by `PostgreSQL`.

use garden_core::{GardenRecord, GardenRepository, StorageError, StoreWrite};
use garden_types::{ColorReading, GardenId};

use crate::garden_store::GardenStore;
use crate::postgres::PostgresPool;

/// Durable garden state in `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PostgresPool,
}

impl PostgresRepository {
    /// Wrap a connected, migrated pool.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    fn store(&self) -> GardenStore<'_> {
        GardenStore::new(self.pool.pool())
    }
}

impl GardenRepository for PostgresRepository {
    async fn load_gardens(&self) -> Result<Vec<GardenRecord>, StorageError> {
        Ok(self.store().load_gardens().await?)
    }

    async fn apply(&self, write: &StoreWrite) -> Result<(), StorageError> {
        Ok(self.store().apply(write).await?)
    }

    async fn readings(&self, garden_id: &GardenId) -> Result<Vec<ColorReading>, StorageError> {
        Ok(self.store().readings(garden_id).await?)
    }
}
