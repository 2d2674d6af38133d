//! Authoritative in-memory garden state.
//!
//! [`GardenStateStore`] owns every garden's boundary and grid. Reads are
//! served from memory. Each mutation is applied in memory first and then
//! described to the persistence queue while the write lock is still held,
//! so the durable copy sees mutations in the order they happened.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use garden_types::{
    Boundary, Cell, CellIndex, ColorReading, GardenId, GardenSummary, GardenView, GeoPoint, Grid,
    PointNo, Rgb,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::GardenError;
use crate::grid::map_to_cell;
use crate::persist::{GardenRecord, PersistenceHandle, StoreWrite};

/// Outcome of storing a boundary corner.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryUpdateResult {
    /// The garden.
    pub garden_id: GardenId,
    /// `true` only for the submission that filled the fourth slot.
    pub became_complete: bool,
    /// The boundary after the update.
    pub boundary: Boundary,
    /// When the garden record was created.
    pub created_at: DateTime<Utc>,
}

impl BoundaryUpdateResult {
    /// Event payload for a newly completed boundary.
    pub fn summary(&self) -> GardenSummary {
        GardenSummary {
            garden_id: self.garden_id.clone(),
            boundary: self.boundary,
            created_at: self.created_at,
            grid: None,
        }
    }
}

/// Outcome of storing a color reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorUpdateResult {
    /// The reading was appended to the log.
    pub accepted: bool,
    /// The cell it landed in, `None` when outside the grid box.
    pub cell_index: Option<CellIndex>,
    /// The reading as logged, with its server-assigned timestamp.
    pub reading: ColorReading,
}

impl ColorUpdateResult {
    /// The new contents of the updated cell, if any.
    pub fn cell(&self) -> Option<(CellIndex, Cell)> {
        self.cell_index
            .map(|index| (index, Cell::from_reading(&self.reading)))
    }
}

#[derive(Debug, Clone)]
struct Garden {
    created_at: DateTime<Utc>,
    boundary: Boundary,
    grid: Grid,
}

impl Garden {
    fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            boundary: Boundary::new(),
            grid: Grid::new(),
        }
    }

    fn from_record(record: GardenRecord) -> Self {
        let mut grid = Grid::new();
        for (index, cell) in record.cells {
            grid.set(index, cell);
        }
        Self {
            created_at: record.created_at,
            boundary: record.boundary,
            grid,
        }
    }

    fn view(&self, garden_id: &GardenId) -> GardenView {
        GardenView {
            garden_id: garden_id.clone(),
            boundary: self.boundary,
            created_at: self.created_at,
            grid: self.grid.clone(),
        }
    }
}

/// The authoritative garden state.
#[derive(Debug)]
pub struct GardenStateStore {
    gardens: RwLock<BTreeMap<GardenId, Garden>>,
    persistence: PersistenceHandle,
}

impl GardenStateStore {
    /// An empty store writing behind to `persistence`.
    pub fn new(persistence: PersistenceHandle) -> Self {
        Self::hydrate(Vec::new(), persistence)
    }

    /// A store rebuilt from records loaded at startup.
    pub fn hydrate(records: Vec<GardenRecord>, persistence: PersistenceHandle) -> Self {
        let gardens: BTreeMap<_, _> = records
            .into_iter()
            .map(|record| (record.garden_id.clone(), Garden::from_record(record)))
            .collect();
        if !gardens.is_empty() {
            info!(gardens = gardens.len(), "Garden state hydrated from storage");
        }
        Self {
            gardens: RwLock::new(gardens),
            persistence,
        }
    }

    /// Record one boundary corner, creating the garden on first contact.
    ///
    /// Re-submitting a slot overwrites it. Re-submitting an identical
    /// point is a no-op for storage.
    pub async fn submit_boundary_point(
        &self,
        garden_id: &GardenId,
        point_no: PointNo,
        point: GeoPoint,
    ) -> Result<BoundaryUpdateResult, GardenError> {
        if !point.is_valid() {
            return Err(GardenError::InvalidInput(format!(
                "boundary point ({}, {}) is not a valid coordinate",
                point.lat, point.lng
            )));
        }

        let mut gardens = self.gardens.write().await;
        let garden = match gardens.entry(garden_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let created_at = Utc::now();
                self.persistence.enqueue(StoreWrite::CreateGarden {
                    garden_id: garden_id.clone(),
                    created_at,
                });
                info!(garden_id = %garden_id, "Garden created");
                entry.insert(Garden::new(created_at))
            }
        };

        let was_complete = garden.boundary.is_complete();
        let previous = garden.boundary.set(point_no, point);
        if previous != Some(point) {
            self.persistence.enqueue(StoreWrite::SetBoundaryPoint {
                garden_id: garden_id.clone(),
                point_no,
                point,
            });
        }
        let became_complete = !was_complete && garden.boundary.is_complete();

        debug!(
            garden_id = %garden_id,
            point_no = point_no.get(),
            filled = garden.boundary.filled(),
            became_complete,
            "Boundary point stored"
        );

        Ok(BoundaryUpdateResult {
            garden_id: garden_id.clone(),
            became_complete,
            boundary: garden.boundary,
            created_at: garden.created_at,
        })
    }

    /// Record a color sample against a garden with a complete boundary.
    ///
    /// The sample is appended to the reading log. If it falls inside the
    /// grid box the mapped cell is overwritten; the timestamp is assigned
    /// here, under the write lock, so a later submission always wins.
    pub async fn submit_color_reading(
        &self,
        garden_id: &GardenId,
        point: GeoPoint,
        color: Rgb,
    ) -> Result<ColorUpdateResult, GardenError> {
        if !point.is_valid() {
            return Err(GardenError::InvalidInput(format!(
                "reading location ({}, {}) is not a valid coordinate",
                point.lat, point.lng
            )));
        }

        let mut gardens = self.gardens.write().await;
        let garden = gardens
            .get_mut(garden_id)
            .ok_or_else(|| GardenError::BoundaryNotReady(garden_id.clone()))?;
        let corners = garden
            .boundary
            .corners()
            .ok_or_else(|| GardenError::BoundaryNotReady(garden_id.clone()))?;

        let cell_index = map_to_cell(&corners, point).cell();
        let reading = ColorReading {
            garden_id: garden_id.clone(),
            lat: point.lat,
            lng: point.lng,
            r: color.r,
            g: color.g,
            b: color.b,
            measured_at: Utc::now(),
            cell_index,
        };
        self.persistence
            .enqueue(StoreWrite::AppendReading(reading.clone()));

        if let Some(index) = cell_index {
            let cell = Cell::from_reading(&reading);
            garden.grid.set(index, cell);
            self.persistence.enqueue(StoreWrite::SetCell {
                garden_id: garden_id.clone(),
                cell_index: index,
                cell,
            });
            debug!(garden_id = %garden_id, cell_index = index.get(), "Cell updated");
        } else {
            debug!(
                garden_id = %garden_id,
                lat = point.lat,
                lng = point.lng,
                "Reading outside grid box, logged only"
            );
        }

        Ok(ColorUpdateResult {
            accepted: true,
            cell_index,
            reading,
        })
    }

    /// Remove a garden and everything recorded for it. Returns whether it
    /// existed.
    pub async fn delete_garden(&self, garden_id: &GardenId) -> bool {
        let mut gardens = self.gardens.write().await;
        let existed = gardens.remove(garden_id).is_some();
        if existed {
            self.persistence.enqueue(StoreWrite::DeleteGarden {
                garden_id: garden_id.clone(),
            });
            info!(garden_id = %garden_id, "Garden deleted");
        }
        existed
    }

    /// Every garden, ordered by identifier.
    pub async fn snapshot(&self) -> Vec<GardenView> {
        self.gardens
            .read()
            .await
            .iter()
            .map(|(id, garden)| garden.view(id))
            .collect()
    }

    /// One garden.
    pub async fn garden(&self, garden_id: &GardenId) -> Option<GardenView> {
        self.gardens
            .read()
            .await
            .get(garden_id)
            .map(|garden| garden.view(garden_id))
    }

    /// Full state of every garden whose boundary is complete, as sent to a
    /// viewer on connect.
    pub async fn complete_summaries(&self) -> Vec<GardenSummary> {
        self.gardens
            .read()
            .await
            .iter()
            .filter(|(_, garden)| garden.boundary.is_complete())
            .map(|(id, garden)| GardenSummary::from(garden.view(id)))
            .collect()
    }

    /// Number of known gardens.
    pub async fn len(&self) -> usize {
        self.gardens.read().await.len()
    }

    /// Whether no garden is known.
    pub async fn is_empty(&self) -> bool {
        self.gardens.read().await.is_empty()
    }

    /// The reading log of one garden, oldest first.
    ///
    /// Served by the persistence backend after every previously queued
    /// write.
    pub async fn readings(&self, garden_id: &GardenId) -> Result<Vec<ColorReading>, GardenError> {
        if !self.gardens.read().await.contains_key(garden_id) {
            return Err(GardenError::NotFound(garden_id.clone()));
        }
        Ok(self.persistence.readings(garden_id).await?)
    }

    /// Wait until the persistence queue has caught up with this store.
    pub async fn flush(&self) -> Result<(), GardenError> {
        Ok(self.persistence.flush().await?)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::arithmetic_side_effects
)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::StorageError;
    use crate::memory::MemoryRepository;
    use crate::persist::{spawn_persistence, GardenRepository, RetryPolicy};

    /// Rejects every call, like a database that is down.
    pub(crate) struct DownRepository;

    impl GardenRepository for DownRepository {
        async fn load_gardens(&self) -> Result<Vec<GardenRecord>, StorageError> {
            Err(StorageError::new("connection refused"))
        }

        async fn apply(&self, _write: &StoreWrite) -> Result<(), StorageError> {
            Err(StorageError::new("connection refused"))
        }

        async fn readings(&self, _garden_id: &GardenId) -> Result<Vec<ColorReading>, StorageError> {
            Err(StorageError::new("connection refused"))
        }
    }

    pub(crate) fn id(raw: &str) -> GardenId {
        GardenId::parse(raw).unwrap()
    }

    pub(crate) fn corner(n: i64) -> PointNo {
        PointNo::new(n).unwrap()
    }

    pub(crate) fn square() -> [GeoPoint; 4] {
        [
            GeoPoint::new(14.4755, 100.1180),
            GeoPoint::new(14.4755, 100.1190),
            GeoPoint::new(14.4765, 100.1190),
            GeoPoint::new(14.4765, 100.1180),
        ]
    }

    fn store() -> (GardenStateStore, MemoryRepository) {
        let repo = MemoryRepository::new();
        let (handle, _task) = spawn_persistence(repo.clone(), RetryPolicy::default());
        (GardenStateStore::new(handle), repo)
    }

    async fn complete(store: &GardenStateStore, garden: &str) {
        for (n, point) in (1..=4).zip(square()) {
            store
                .submit_boundary_point(&id(garden), corner(n), point)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn first_point_creates_the_garden() {
        let (store, repo) = store();
        let result = store
            .submit_boundary_point(&id("1"), corner(1), square()[0])
            .await
            .unwrap();
        assert!(!result.became_complete);
        assert_eq!(result.boundary.filled(), 1);
        assert_eq!(store.len().await, 1);

        let view = store.garden(&id("1")).await.unwrap();
        assert_eq!(view.grid.set_count(), 0);

        store.flush().await.unwrap();
        let record = repo.garden(&id("1")).unwrap();
        assert_eq!(record.created_at, view.created_at);
        assert_eq!(record.boundary.filled(), 1);
    }

    #[tokio::test]
    async fn completion_fires_once_and_any_order_works() {
        let (store, _repo) = store();
        let g = id("g");
        let pts = square();
        let mut flags = Vec::new();
        for n in [3, 1, 4, 2] {
            let slot = usize::try_from(n - 1).unwrap();
            let r = store.submit_boundary_point(&g, corner(n), pts[slot]).await.unwrap();
            flags.push(r.became_complete);
        }
        assert_eq!(flags, vec![false, false, false, true]);

        // Overwriting a corner of a complete boundary is not a new completion.
        let again = store
            .submit_boundary_point(&g, corner(2), GeoPoint::new(14.4754, 100.1191))
            .await
            .unwrap();
        assert!(!again.became_complete);
        assert!(again.boundary.is_complete());
        assert_eq!(again.boundary.get(corner(2)).unwrap().lat, 14.4754);
    }

    #[tokio::test]
    async fn invalid_boundary_point_is_rejected_without_mutation() {
        let (store, _repo) = store();
        let err = store
            .submit_boundary_point(&id("1"), corner(1), GeoPoint::new(91.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, GardenError::InvalidInput(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn reading_requires_complete_boundary() {
        let (store, repo) = store();
        let sample = GeoPoint::new(14.476, 100.1185);
        let color = Rgb::new(1, 2, 3);

        let unknown = store.submit_color_reading(&id("x"), sample, color).await;
        assert!(matches!(unknown, Err(GardenError::BoundaryNotReady(_))));

        store
            .submit_boundary_point(&id("x"), corner(1), square()[0])
            .await
            .unwrap();
        let partial = store.submit_color_reading(&id("x"), sample, color).await;
        assert!(matches!(partial, Err(GardenError::BoundaryNotReady(_))));

        store.flush().await.unwrap();
        assert_eq!(repo.reading_count(), 0);
    }

    #[tokio::test]
    async fn reading_updates_mapped_cell() {
        let (store, _repo) = store();
        complete(&store, "g").await;

        let result = store
            .submit_color_reading(&id("g"), GeoPoint::new(14.476_45, 100.118_05), Rgb::new(255, 0, 0))
            .await
            .unwrap();
        assert!(result.accepted);
        assert_eq!(result.cell_index.unwrap().get(), 0);

        let view = store.garden(&id("g")).await.unwrap();
        let cell = view.grid.cells()[0];
        assert_eq!(cell.color(), Rgb::new(255, 0, 0));
        assert_eq!(cell.lat, Some(14.476_45));
        assert_eq!(cell.measured_at, Some(result.reading.measured_at));
        assert_eq!(view.grid.set_count(), 1);
    }

    #[tokio::test]
    async fn later_reading_wins_the_cell() {
        let (store, _repo) = store();
        complete(&store, "g").await;
        let sample = GeoPoint::new(14.476_03, 100.118_47);

        store
            .submit_color_reading(&id("g"), sample, Rgb::new(255, 0, 0))
            .await
            .unwrap();
        store
            .submit_color_reading(&id("g"), sample, Rgb::new(0, 0, 255))
            .await
            .unwrap();

        let view = store.garden(&id("g")).await.unwrap();
        assert_eq!(view.grid.cells()[44].color(), Rgb::new(0, 0, 255));
        assert_eq!(store.readings(&id("g")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn out_of_bounds_reading_is_logged_only() {
        let (store, _repo) = store();
        complete(&store, "g").await;

        let result = store
            .submit_color_reading(&id("g"), GeoPoint::new(0.0, 0.0), Rgb::new(9, 9, 9))
            .await
            .unwrap();
        assert!(result.accepted);
        assert!(result.cell_index.is_none());
        assert!(result.cell().is_none());

        assert_eq!(store.garden(&id("g")).await.unwrap().grid.set_count(), 0);
        let log = store.readings(&id("g")).await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].cell_index.is_none());
    }

    #[tokio::test]
    async fn delete_removes_garden_and_log() {
        let (store, repo) = store();
        complete(&store, "g").await;
        complete(&store, "h").await;
        store
            .submit_color_reading(&id("g"), GeoPoint::new(14.476, 100.1185), Rgb::new(1, 1, 1))
            .await
            .unwrap();

        assert!(store.delete_garden(&id("g")).await);
        assert!(!store.delete_garden(&id("g")).await);
        assert!(store.garden(&id("g")).await.is_none());
        assert!(matches!(
            store.readings(&id("g")).await,
            Err(GardenError::NotFound(_))
        ));

        store.flush().await.unwrap();
        assert!(repo.garden(&id("g")).is_none());
        assert!(repo.garden(&id("h")).is_some());
        assert_eq!(repo.reading_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_is_ordered_and_summaries_skip_incomplete() {
        let (store, _repo) = store();
        complete(&store, "b").await;
        complete(&store, "a").await;
        store
            .submit_boundary_point(&id("c"), corner(1), square()[0])
            .await
            .unwrap();

        let ids: Vec<_> = store
            .snapshot()
            .await
            .into_iter()
            .map(|v| v.garden_id.as_str().to_owned())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let summaries = store.complete_summaries().await;
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.grid.is_some()));
    }

    #[tokio::test]
    async fn hydrate_restores_state_from_storage() {
        let (first, repo) = store();
        complete(&first, "g").await;
        first
            .submit_color_reading(&id("g"), GeoPoint::new(14.476_03, 100.118_47), Rgb::new(7, 8, 9))
            .await
            .unwrap();
        first.flush().await.unwrap();
        let before = first.garden(&id("g")).await.unwrap();

        let records = crate::persist::GardenRepository::load_gardens(&repo)
            .await
            .unwrap();
        let (handle, _task) = spawn_persistence(repo, RetryPolicy::default());
        let second = GardenStateStore::hydrate(records, handle);

        assert_eq!(second.garden(&id("g")).await.unwrap(), before);
        assert_eq!(second.readings(&id("g")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_readings_are_all_logged() {
        let (store, _repo) = store();
        complete(&store, "g").await;
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for i in 0..20_u8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .submit_color_reading(&id("g"), GeoPoint::new(14.476, 100.1185), Rgb::new(i, 0, 0))
                    .await
                    .unwrap()
            }));
        }
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        let latest = results
            .iter()
            .max_by_key(|r| r.reading.measured_at)
            .unwrap();
        let index = latest.cell_index.unwrap();
        let view = store.garden(&id("g")).await.unwrap();
        assert_eq!(view.grid.get(index).unwrap().measured_at, Some(latest.reading.measured_at));
        assert_eq!(store.readings(&id("g")).await.unwrap().len(), 20);
    }
}
