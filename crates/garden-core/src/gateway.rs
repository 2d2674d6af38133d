//! Ingestion gateway: validation, ordering, and broadcast.
//!
//! Every ingestion request and every viewer join passes through one
//! sequencing lock. Holding it across "apply to the store, then
//! broadcast" makes the order of events on every viewer stream equal the
//! order of state changes in the store, and a joining viewer's snapshot
//! can never miss or repeat a concurrent update.

use std::sync::Arc;

use garden_types::{
    CellUpdate, ColorReading, GardenDeleted, GardenId, GardenView, GeoPoint, PointNo, Rgb,
    SyncEvent,
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::GardenError;
use crate::hub::{SyncHub, ViewerSession};
use crate::store::{BoundaryUpdateResult, ColorUpdateResult, GardenStateStore};

/// Body of a boundary-point submission.
///
/// All fields are optional at the parse stage so that a missing field is
/// reported by name rather than as a generic decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoundaryPointSubmission {
    /// Device-assigned garden identifier.
    pub garden_id: Option<GardenId>,
    /// Corner slot, `1..=4`.
    pub point_no: Option<i64>,
    /// Corner latitude.
    pub latitude: Option<f64>,
    /// Corner longitude.
    pub longitude: Option<f64>,
}

/// Body of a color-reading submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColorReadingSubmission {
    /// Device-assigned garden identifier.
    pub garden_id: Option<GardenId>,
    /// Sample latitude.
    pub latitude: Option<f64>,
    /// Sample longitude.
    pub longitude: Option<f64>,
    /// Red intensity, `0..=255`.
    pub r: Option<i64>,
    /// Green intensity, `0..=255`.
    pub g: Option<i64>,
    /// Blue intensity, `0..=255`.
    pub b: Option<i64>,
}

impl BoundaryPointSubmission {
    /// Decode a JSON request body.
    pub fn from_json(body: &[u8]) -> Result<Self, GardenError> {
        decode(body)
    }

    fn validate(self) -> Result<(GardenId, PointNo, GeoPoint), GardenError> {
        let garden_id = required("garden_id", self.garden_id)?;
        let raw_point_no = required("point_no", self.point_no)?;
        let point_no = PointNo::new(raw_point_no).ok_or_else(|| {
            GardenError::InvalidInput(format!("point_no must be 1..=4, got {raw_point_no}"))
        })?;
        let point = coordinate(self.latitude, self.longitude)?;
        Ok((garden_id, point_no, point))
    }
}

impl ColorReadingSubmission {
    /// Decode a JSON request body.
    pub fn from_json(body: &[u8]) -> Result<Self, GardenError> {
        decode(body)
    }

    fn validate(self) -> Result<(GardenId, GeoPoint, Rgb), GardenError> {
        let garden_id = required("garden_id", self.garden_id)?;
        let point = coordinate(self.latitude, self.longitude)?;
        let color = Rgb::new(
            channel("r", self.r)?,
            channel("g", self.g)?,
            channel("b", self.b)?,
        );
        Ok((garden_id, point, color))
    }
}

fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, GardenError> {
    serde_json::from_slice(body)
        .map_err(|e| GardenError::InvalidInput(format!("malformed request body: {e}")))
}

fn required<T>(field: &str, value: Option<T>) -> Result<T, GardenError> {
    value.ok_or_else(|| GardenError::InvalidInput(format!("missing field `{field}`")))
}

fn coordinate(latitude: Option<f64>, longitude: Option<f64>) -> Result<GeoPoint, GardenError> {
    let point = GeoPoint::new(
        required("latitude", latitude)?,
        required("longitude", longitude)?,
    );
    if point.is_valid() {
        Ok(point)
    } else {
        Err(GardenError::InvalidInput(format!(
            "coordinate ({}, {}) is out of range",
            point.lat, point.lng
        )))
    }
}

fn channel(name: &str, value: Option<i64>) -> Result<u8, GardenError> {
    let raw = required(name, value)?;
    u8::try_from(raw)
        .map_err(|e| GardenError::InvalidInput(format!("`{name}` must be 0..=255, got {raw}: {e}")))
}

/// Front door for device submissions and viewer connections.
#[derive(Debug)]
pub struct IngestionGateway {
    store: GardenStateStore,
    hub: Arc<SyncHub>,
    sequencer: Mutex<()>,
}

impl IngestionGateway {
    /// Wire a store to a hub.
    pub fn new(store: GardenStateStore, hub: Arc<SyncHub>) -> Self {
        Self {
            store,
            hub,
            sequencer: Mutex::new(()),
        }
    }

    /// The underlying state store.
    pub const fn store(&self) -> &GardenStateStore {
        &self.store
    }

    /// The viewer hub.
    pub const fn hub(&self) -> &Arc<SyncHub> {
        &self.hub
    }

    /// Validate and apply a boundary corner. Broadcasts
    /// [`SyncEvent::BoundaryCompleted`] when this corner completes the
    /// boundary.
    pub async fn submit_boundary_point(
        &self,
        submission: BoundaryPointSubmission,
    ) -> Result<BoundaryUpdateResult, GardenError> {
        let (garden_id, point_no, point) = submission.validate()?;

        let _order = self.sequencer.lock().await;
        let result = self
            .store
            .submit_boundary_point(&garden_id, point_no, point)
            .await?;
        if result.became_complete {
            let viewers = self
                .hub
                .broadcast(SyncEvent::BoundaryCompleted(result.summary()));
            debug!(garden_id = %garden_id, viewers, "Boundary completion announced");
        }
        Ok(result)
    }

    /// Validate and apply a color reading. Broadcasts
    /// [`SyncEvent::CellUpdated`] when the reading lands on the grid.
    pub async fn submit_color_reading(
        &self,
        submission: ColorReadingSubmission,
    ) -> Result<ColorUpdateResult, GardenError> {
        let (garden_id, point, color) = submission.validate()?;

        let _order = self.sequencer.lock().await;
        let result = self
            .store
            .submit_color_reading(&garden_id, point, color)
            .await?;
        if let Some((cell_index, cell)) = result.cell() {
            self.hub.broadcast(SyncEvent::CellUpdated(CellUpdate {
                garden_id,
                cell_index,
                cell,
            }));
        }
        Ok(result)
    }

    /// Remove a garden and tell every viewer.
    pub async fn delete_garden(&self, garden_id: &GardenId) -> Result<(), GardenError> {
        let _order = self.sequencer.lock().await;
        if !self.store.delete_garden(garden_id).await {
            return Err(GardenError::NotFound(garden_id.clone()));
        }
        self.hub.broadcast(SyncEvent::GardenDeleted(GardenDeleted {
            garden_id: garden_id.clone(),
        }));
        Ok(())
    }

    /// Connect a viewer. Its stream opens with one
    /// [`SyncEvent::BoundaryCompleted`] (grid included) per complete
    /// garden, followed by every later live event.
    pub async fn connect_viewer(&self) -> ViewerSession {
        let _order = self.sequencer.lock().await;
        let snapshot = self
            .store
            .complete_summaries()
            .await
            .into_iter()
            .map(SyncEvent::BoundaryCompleted)
            .collect();
        self.hub.join(snapshot)
    }

    /// Every garden, ordered by identifier.
    pub async fn snapshot(&self) -> Vec<GardenView> {
        self.store.snapshot().await
    }

    /// One garden.
    pub async fn garden(&self, garden_id: &GardenId) -> Result<GardenView, GardenError> {
        self.store
            .garden(garden_id)
            .await
            .ok_or_else(|| GardenError::NotFound(garden_id.clone()))
    }

    /// A garden's reading log, oldest first.
    pub async fn readings(&self, garden_id: &GardenId) -> Result<Vec<ColorReading>, GardenError> {
        self.store.readings(garden_id).await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryRepository;
    use crate::persist::{spawn_persistence, RetryPolicy};
    use crate::store::tests::{id, square, DownRepository};

    fn gateway(capacity: usize) -> IngestionGateway {
        let (handle, _task) = spawn_persistence(MemoryRepository::new(), RetryPolicy::default());
        IngestionGateway::new(GardenStateStore::new(handle), Arc::new(SyncHub::new(capacity)))
    }

    fn point(garden: &str, point_no: i64, p: GeoPoint) -> BoundaryPointSubmission {
        BoundaryPointSubmission {
            garden_id: Some(id(garden)),
            point_no: Some(point_no),
            latitude: Some(p.lat),
            longitude: Some(p.lng),
        }
    }

    fn reading(garden: &str, lat: f64, lng: f64, rgb: (i64, i64, i64)) -> ColorReadingSubmission {
        ColorReadingSubmission {
            garden_id: Some(id(garden)),
            latitude: Some(lat),
            longitude: Some(lng),
            r: Some(rgb.0),
            g: Some(rgb.1),
            b: Some(rgb.2),
        }
    }

    async fn complete(gw: &IngestionGateway, garden: &str) {
        for (n, p) in (1..=4).zip(square()) {
            gw.submit_boundary_point(point(garden, n, p)).await.unwrap();
        }
    }

    #[test]
    fn decodes_string_and_integer_ids_and_ignores_extras() {
        let body = br#"{"garden_id": 7, "point_no": 2, "latitude": 14.1, "longitude": 100.2, "device_id": "esp32"}"#;
        let sub = BoundaryPointSubmission::from_json(body).unwrap();
        assert_eq!(sub.garden_id.unwrap().as_str(), "7");

        let body = br#"{"garden_id": "north", "latitude": 14.1, "longitude": 100.2, "r": 1, "g": 2, "b": 3, "ts": 99}"#;
        let sub = ColorReadingSubmission::from_json(body).unwrap();
        assert_eq!(sub.garden_id.unwrap().as_str(), "north");
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        for body in [&b"not json"[..], br#"{"garden_id": ""}"#, br#"{"latitude": "north"}"#] {
            assert!(matches!(
                BoundaryPointSubmission::from_json(body),
                Err(GardenError::InvalidInput(_))
            ));
        }
    }

    #[tokio::test]
    async fn invalid_submissions_do_not_mutate_or_broadcast() {
        let gw = gateway(8);
        let mut viewer = gw.connect_viewer().await;
        complete(&gw, "g").await;
        assert!(viewer.try_recv().is_some());

        let bad_points = [
            point("g", 0, square()[0]),
            point("g", 5, square()[0]),
            point("g", 1, GeoPoint::new(-91.0, 0.0)),
            point("g", 1, GeoPoint::new(0.0, 180.5)),
            BoundaryPointSubmission {
                point_no: None,
                ..point("g", 1, square()[0])
            },
        ];
        for sub in bad_points {
            let err = gw.submit_boundary_point(sub).await.unwrap_err();
            assert!(matches!(err, GardenError::InvalidInput(_)), "{err}");
        }

        for rgb in [(256, 0, 0), (0, -1, 0)] {
            let err = gw
                .submit_color_reading(reading("g", 14.476, 100.1185, rgb))
                .await
                .unwrap_err();
            assert!(matches!(err, GardenError::InvalidInput(_)));
        }
        let missing_b = ColorReadingSubmission {
            b: None,
            ..reading("g", 14.476, 100.1185, (1, 1, 1))
        };
        assert!(gw.submit_color_reading(missing_b).await.is_err());

        assert!(viewer.try_recv().is_none());
        assert_eq!(gw.garden(&id("g")).await.unwrap().grid.set_count(), 0);
        assert!(gw.readings(&id("g")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_and_cell_updates_are_broadcast() {
        let gw = gateway(8);
        let mut viewer = gw.connect_viewer().await;

        complete(&gw, "g").await;
        let event = viewer.recv().await.unwrap();
        let SyncEvent::BoundaryCompleted(summary) = event.as_ref() else {
            panic!("expected boundary_completed, got {event:?}");
        };
        assert!(summary.grid.is_none());
        assert!(summary.boundary.is_complete());
        assert!(viewer.try_recv().is_none());

        gw.submit_color_reading(reading("g", 14.476_03, 100.118_47, (10, 20, 30)))
            .await
            .unwrap();
        let event = viewer.recv().await.unwrap();
        let SyncEvent::CellUpdated(update) = event.as_ref() else {
            panic!("expected cell_updated, got {event:?}");
        };
        assert_eq!(update.cell_index.get(), 44);
        assert_eq!(update.cell.color(), Rgb::new(10, 20, 30));
    }

    #[tokio::test(start_paused = true)]
    async fn storage_outage_does_not_block_live_state() {
        let retry_forever = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let (handle, _task) = spawn_persistence(DownRepository, retry_forever);
        let handle = handle.with_query_timeout(Duration::from_secs(1));
        let gw = IngestionGateway::new(GardenStateStore::new(handle), Arc::new(SyncHub::new(8)));
        let mut viewer = gw.connect_viewer().await;

        complete(&gw, "g").await;
        assert!(matches!(
            viewer.recv().await.unwrap().as_ref(),
            SyncEvent::BoundaryCompleted(_)
        ));

        let result = gw
            .submit_color_reading(reading("g", 14.476_03, 100.118_47, (10, 20, 30)))
            .await
            .unwrap();
        assert!(result.accepted);
        assert!(matches!(
            viewer.recv().await.unwrap().as_ref(),
            SyncEvent::CellUpdated(_)
        ));

        let view = gw.garden(&id("g")).await.unwrap();
        assert_eq!(view.grid.set_count(), 1);

        let err = gw.readings(&id("g")).await.unwrap_err();
        assert!(matches!(err, GardenError::StorageFailure(_)));
    }

    #[tokio::test]
    async fn out_of_bounds_reading_is_not_broadcast() {
        let gw = gateway(8);
        complete(&gw, "g").await;
        let mut viewer = gw.connect_viewer().await;
        viewer.recv().await.unwrap();

        let result = gw
            .submit_color_reading(reading("g", 1.0, 1.0, (1, 2, 3)))
            .await
            .unwrap();
        assert!(result.cell_index.is_none());
        assert!(viewer.try_recv().is_none());
    }

    #[tokio::test]
    async fn reading_before_completion_is_rejected() {
        let gw = gateway(8);
        gw.submit_boundary_point(point("g", 1, square()[0])).await.unwrap();
        let err = gw
            .submit_color_reading(reading("g", 14.476, 100.1185, (1, 2, 3)))
            .await
            .unwrap_err();
        assert!(matches!(err, GardenError::BoundaryNotReady(_)));
    }

    #[tokio::test]
    async fn viewer_snapshot_carries_grids_of_complete_gardens() {
        let gw = gateway(8);
        complete(&gw, "a").await;
        gw.submit_color_reading(reading("a", 14.476_45, 100.118_05, (255, 0, 0)))
            .await
            .unwrap();
        gw.submit_boundary_point(point("b", 1, square()[0])).await.unwrap();

        let mut viewer = gw.connect_viewer().await;
        let event = viewer.recv().await.unwrap();
        let SyncEvent::BoundaryCompleted(summary) = event.as_ref() else {
            panic!("expected snapshot, got {event:?}");
        };
        assert_eq!(summary.garden_id.as_str(), "a");
        assert_eq!(summary.grid.as_ref().unwrap().set_count(), 1);
        assert!(viewer.try_recv().is_none());
    }

    #[tokio::test]
    async fn delete_broadcasts_and_unknown_is_not_found() {
        let gw = gateway(8);
        complete(&gw, "g").await;
        let mut viewer = gw.connect_viewer().await;
        viewer.recv().await.unwrap();

        gw.delete_garden(&id("g")).await.unwrap();
        assert_eq!(viewer.recv().await.unwrap().kind(), "garden_deleted");

        assert!(matches!(
            gw.delete_garden(&id("g")).await,
            Err(GardenError::NotFound(_))
        ));
        assert!(matches!(gw.garden(&id("g")).await, Err(GardenError::NotFound(_))));
        assert!(gw.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_boundary_point_is_idempotent() {
        let gw = gateway(8);
        let mut viewer = gw.connect_viewer().await;
        let p = GeoPoint::new(14.4758, 100.1184);

        let first = gw.submit_boundary_point(point("1", 2, p)).await.unwrap();
        let second = gw.submit_boundary_point(point("1", 2, p)).await.unwrap();
        assert_eq!(first.boundary, second.boundary);
        assert_eq!(first.created_at, second.created_at);
        assert!(!first.became_complete && !second.became_complete);
        assert!(viewer.try_recv().is_none());
    }

    #[tokio::test]
    async fn late_viewer_gets_one_message_per_complete_garden() {
        let gw = gateway(8);
        for garden in ["a", "b", "c"] {
            complete(&gw, garden).await;
        }
        for (n, p) in (1..=3).zip(square()) {
            gw.submit_boundary_point(point("d", n, p)).await.unwrap();
        }

        let mut viewer = gw.connect_viewer().await;
        let mut snapshot = Vec::new();
        while let Some(event) = viewer.try_recv() {
            snapshot.push(event.garden_id().as_str().to_owned());
        }
        assert_eq!(snapshot, vec!["a", "b", "c"]);

        gw.submit_boundary_point(point("d", 4, square()[3])).await.unwrap();
        assert_eq!(viewer.recv().await.unwrap().garden_id().as_str(), "d");
    }

    #[tokio::test]
    async fn deleting_unknown_garden_broadcasts_nothing() {
        let gw = gateway(8);
        let mut viewer = gw.connect_viewer().await;
        assert!(matches!(
            gw.delete_garden(&id("never")).await,
            Err(GardenError::NotFound(_))
        ));
        assert!(viewer.try_recv().is_none());
    }

    #[tokio::test]
    async fn concurrent_joins_see_every_event_once() {
        let gw = Arc::new(gateway(256));
        complete(&gw, "g").await;

        let writer = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move {
                for i in 0..50_i64 {
                    gw.submit_color_reading(reading("g", 14.476_03, 100.118_47, (i, 0, 0)))
                        .await
                        .unwrap();
                }
            })
        };
        let mut viewer = gw.connect_viewer().await;
        writer.await.unwrap();

        // Snapshot then live updates: red values continue from the snapshot
        // with no gap or repeat, ending at 49.
        let first = viewer.recv().await.unwrap();
        let SyncEvent::BoundaryCompleted(summary) = first.as_ref() else {
            panic!("expected snapshot, got {first:?}");
        };
        let mut last = summary
            .grid
            .as_ref()
            .and_then(|g| g.get(garden_types::CellIndex::new(44).unwrap()))
            .filter(|c| c.is_set())
            .map_or(-1, |c| i64::from(c.r));
        while let Some(event) = viewer.try_recv() {
            let SyncEvent::CellUpdated(update) = event.as_ref() else {
                panic!("unexpected {event:?}");
            };
            let r = i64::from(update.cell.r);
            assert_eq!(r, last + 1, "gap or repeat at {r}");
            last = r;
        }
        assert_eq!(last, 49);
    }
}
