//! Process-local persistence backend.
//!
//! Keeps the same tables and referential rules as the `PostgreSQL` schema
//! so the server runs (and the engine is tested) without a database.
//! Clones share one set of tables.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use garden_types::{ColorReading, GardenId};

use crate::error::StorageError;
use crate::persist::{GardenRecord, GardenRepository, StoreWrite};

#[derive(Debug, Default)]
struct Tables {
    gardens: BTreeMap<GardenId, GardenRecord>,
    readings: Vec<ColorReading>,
}

/// In-memory [`GardenRepository`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored record for one garden.
    pub fn garden(&self, garden_id: &GardenId) -> Option<GardenRecord> {
        self.lock().gardens.get(garden_id).cloned()
    }

    /// Total number of stored readings across all gardens.
    pub fn reading_count(&self) -> usize {
        self.lock().readings.len()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_sync(&self, write: &StoreWrite) -> Result<(), StorageError> {
        let mut tables = self.lock();
        match write {
            StoreWrite::CreateGarden {
                garden_id,
                created_at,
            } => {
                tables
                    .gardens
                    .entry(garden_id.clone())
                    .or_insert_with(|| GardenRecord::new(garden_id.clone(), *created_at));
            }
            StoreWrite::SetBoundaryPoint {
                garden_id,
                point_no,
                point,
            } => {
                existing(&mut tables, garden_id)?
                    .boundary
                    .set(*point_no, *point);
            }
            StoreWrite::SetCell {
                garden_id,
                cell_index,
                cell,
            } => {
                existing(&mut tables, garden_id)?
                    .cells
                    .insert(*cell_index, *cell);
            }
            StoreWrite::AppendReading(reading) => {
                existing(&mut tables, &reading.garden_id)?;
                tables.readings.push(reading.clone());
            }
            StoreWrite::DeleteGarden { garden_id } => {
                tables.gardens.remove(garden_id);
                tables.readings.retain(|r| &r.garden_id != garden_id);
            }
        }
        Ok(())
    }
}

fn existing<'t>(
    tables: &'t mut Tables,
    garden_id: &GardenId,
) -> Result<&'t mut GardenRecord, StorageError> {
    tables
        .gardens
        .get_mut(garden_id)
        .ok_or_else(|| StorageError::new(format!("garden {garden_id} does not exist")))
}

impl GardenRepository for MemoryRepository {
    async fn load_gardens(&self) -> Result<Vec<GardenRecord>, StorageError> {
        Ok(self.lock().gardens.values().cloned().collect())
    }

    async fn apply(&self, write: &StoreWrite) -> Result<(), StorageError> {
        self.apply_sync(write)
    }

    async fn readings(&self, garden_id: &GardenId) -> Result<Vec<ColorReading>, StorageError> {
        Ok(self
            .lock()
            .readings
            .iter()
            .filter(|r| &r.garden_id == garden_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use garden_types::{Cell, CellIndex, GeoPoint, PointNo};

    use super::*;

    fn id(raw: &str) -> GardenId {
        GardenId::parse(raw).unwrap()
    }

    fn reading(garden: &str) -> ColorReading {
        ColorReading {
            garden_id: id(garden),
            lat: 14.476,
            lng: 100.118,
            r: 10,
            g: 20,
            b: 30,
            measured_at: Utc::now(),
            cell_index: CellIndex::new(44),
        }
    }

    #[tokio::test]
    async fn children_require_an_existing_garden() {
        let repo = MemoryRepository::new();
        let point = StoreWrite::SetBoundaryPoint {
            garden_id: id("a"),
            point_no: PointNo::new(1).unwrap(),
            point: GeoPoint::new(1.0, 2.0),
        };
        assert!(repo.apply(&point).await.is_err());
        assert!(repo.apply(&StoreWrite::AppendReading(reading("a"))).await.is_err());

        repo.apply(&StoreWrite::CreateGarden {
            garden_id: id("a"),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        repo.apply(&point).await.unwrap();
        repo.apply(&StoreWrite::AppendReading(reading("a"))).await.unwrap();

        let record = repo.garden(&id("a")).unwrap();
        assert_eq!(record.boundary.filled(), 1);
        assert_eq!(repo.reading_count(), 1);
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let repo = MemoryRepository::new();
        let first = Utc::now();
        let create = |at| StoreWrite::CreateGarden {
            garden_id: id("a"),
            created_at: at,
        };
        repo.apply(&create(first)).await.unwrap();
        repo.apply(&create(first + chrono::Duration::seconds(5)))
            .await
            .unwrap();
        assert_eq!(repo.garden(&id("a")).unwrap().created_at, first);
    }

    #[tokio::test]
    async fn delete_removes_every_record_kind() {
        let repo = MemoryRepository::new();
        for garden in ["a", "b"] {
            repo.apply(&StoreWrite::CreateGarden {
                garden_id: id(garden),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
            repo.apply(&StoreWrite::SetCell {
                garden_id: id(garden),
                cell_index: CellIndex::new(3).unwrap(),
                cell: Cell::from_reading(&reading(garden)),
            })
            .await
            .unwrap();
            repo.apply(&StoreWrite::AppendReading(reading(garden)))
                .await
                .unwrap();
        }

        repo.apply(&StoreWrite::DeleteGarden { garden_id: id("a") })
            .await
            .unwrap();

        assert!(repo.garden(&id("a")).is_none());
        assert!(repo.readings(&id("a")).await.unwrap().is_empty());
        assert_eq!(repo.readings(&id("b")).await.unwrap().len(), 1);
        assert_eq!(repo.load_gardens().await.unwrap().len(), 1);
    }
}
