//! Fan-out of state-change events to connected viewers.
//!
//! Each viewer owns a bounded queue. Broadcasting never waits on a viewer:
//! a viewer whose queue is full has fallen too far behind to be caught up
//! incrementally and is evicted, as is one whose receiving side is gone.
//! An evicted viewer's stream ends, and it resynchronizes by reconnecting
//! and receiving a fresh snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use garden_types::{SyncEvent, ViewerId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

type ViewerQueue = mpsc::Sender<Arc<SyncEvent>>;

/// Registry of connected viewers.
#[derive(Debug)]
pub struct SyncHub {
    viewers: Mutex<BTreeMap<ViewerId, ViewerQueue>>,
    capacity: usize,
}

impl SyncHub {
    /// A hub whose viewers may lag by at most `capacity` live events.
    pub fn new(capacity: usize) -> Self {
        Self {
            viewers: Mutex::new(BTreeMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a viewer whose stream starts with `initial` events.
    ///
    /// The queue is sized so the initial events never count against the
    /// live-event allowance. The caller must hold whatever lock orders
    /// broadcasts, or events may slip between `initial` and registration.
    pub fn join(self: &Arc<Self>, initial: Vec<SyncEvent>) -> ViewerSession {
        let id = ViewerId::new();
        let (tx, rx) = mpsc::channel(self.capacity.saturating_add(initial.len()));
        let snapshot_len = initial.len();
        for event in initial {
            if tx.try_send(Arc::new(event)).is_err() {
                warn!(viewer_id = %id, "Snapshot did not fit the viewer queue");
                break;
            }
        }

        let viewers = {
            let mut viewers = self.lock();
            viewers.insert(id, tx);
            viewers.len()
        };
        info!(viewer_id = %id, snapshot = snapshot_len, viewers, "Viewer joined");

        ViewerSession {
            id,
            rx,
            hub: Arc::clone(self),
        }
    }

    /// Deliver an event to every viewer. Returns how many received it.
    pub fn broadcast(&self, event: SyncEvent) -> usize {
        let event = Arc::new(event);
        let mut viewers = self.lock();
        let mut delivered: usize = 0;
        viewers.retain(|id, queue| match queue.try_send(Arc::clone(&event)) {
            Ok(()) => {
                delivered = delivered.saturating_add(1);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(viewer_id = %id, "Viewer queue full, evicting slow viewer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(viewer_id = %id, "Viewer gone, removing");
                false
            }
        });
        debug!(
            kind = event.kind(),
            garden_id = %event.garden_id(),
            delivered,
            "Event broadcast"
        );
        delivered
    }

    /// Remove a viewer. Returns whether it was still registered.
    pub fn leave(&self, id: ViewerId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            info!(viewer_id = %id, "Viewer left");
        }
        removed
    }

    /// Number of registered viewers.
    pub fn viewer_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ViewerId, ViewerQueue>> {
        self.viewers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connected viewer's end of the event stream.
///
/// Dropping the session removes the viewer from the hub.
#[derive(Debug)]
pub struct ViewerSession {
    id: ViewerId,
    rx: mpsc::Receiver<Arc<SyncEvent>>,
    hub: Arc<SyncHub>,
}

impl ViewerSession {
    /// This viewer's identifier.
    pub const fn id(&self) -> ViewerId {
        self.id
    }

    /// The next event, or `None` once the viewer has been evicted and its
    /// queue drained.
    pub async fn recv(&mut self) -> Option<Arc<SyncEvent>> {
        self.rx.recv().await
    }

    /// The next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<SyncEvent>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.hub.leave(self.id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use garden_types::{Boundary, GardenDeleted, GardenId, GardenSummary};

    use super::*;

    fn deleted(raw: &str) -> SyncEvent {
        SyncEvent::GardenDeleted(GardenDeleted {
            garden_id: GardenId::parse(raw).unwrap(),
        })
    }

    fn summary(raw: &str) -> SyncEvent {
        SyncEvent::BoundaryCompleted(GardenSummary {
            garden_id: GardenId::parse(raw).unwrap(),
            boundary: Boundary::new(),
            created_at: Utc::now(),
            grid: None,
        })
    }

    #[tokio::test]
    async fn broadcast_reaches_every_viewer_in_order() {
        let hub = Arc::new(SyncHub::new(8));
        let mut a = hub.join(Vec::new());
        let mut b = hub.join(Vec::new());

        assert_eq!(hub.broadcast(deleted("1")), 2);
        assert_eq!(hub.broadcast(deleted("2")), 2);

        for viewer in [&mut a, &mut b] {
            assert_eq!(viewer.recv().await.unwrap().garden_id().as_str(), "1");
            assert_eq!(viewer.recv().await.unwrap().garden_id().as_str(), "2");
        }
    }

    #[tokio::test]
    async fn snapshot_precedes_live_events() {
        let hub = Arc::new(SyncHub::new(1));
        let mut viewer = hub.join(vec![summary("a"), summary("b")]);
        hub.broadcast(deleted("a"));

        let kinds: Vec<_> = [
            viewer.recv().await.unwrap(),
            viewer.recv().await.unwrap(),
            viewer.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.kind())
        .collect();
        assert_eq!(
            kinds,
            vec!["boundary_completed", "boundary_completed", "garden_deleted"]
        );
    }

    #[test]
    fn broadcast_with_no_viewers_is_a_no_op() {
        let hub = SyncHub::new(4);
        assert_eq!(hub.broadcast(deleted("1")), 0);
    }

    #[tokio::test]
    async fn slow_viewer_is_evicted_without_affecting_others() {
        let hub = Arc::new(SyncHub::new(2));
        let mut slow = hub.join(Vec::new());
        let mut fast = hub.join(Vec::new());

        for n in 0..2 {
            hub.broadcast(deleted(&n.to_string()));
            fast.recv().await.unwrap();
        }
        // The slow viewer's queue is now full.
        assert_eq!(hub.broadcast(deleted("x")), 1);
        assert_eq!(hub.viewer_count(), 1);
        assert_eq!(fast.recv().await.unwrap().garden_id().as_str(), "x");

        // Queued events drain, then the stream ends.
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
    }

    #[test]
    fn dropping_a_session_leaves_the_hub() {
        let hub = Arc::new(SyncHub::new(4));
        let viewer = hub.join(Vec::new());
        let id = viewer.id();
        assert_eq!(hub.viewer_count(), 1);
        drop(viewer);
        assert_eq!(hub.viewer_count(), 0);
        assert!(!hub.leave(id));
    }

    #[test]
    fn leave_is_idempotent() {
        let hub = Arc::new(SyncHub::new(4));
        let mut viewer = hub.join(Vec::new());
        assert!(hub.leave(viewer.id()));
        assert!(!hub.leave(viewer.id()));
        assert!(viewer.try_recv().is_none());
        assert_eq!(hub.broadcast(deleted("1")), 0);
    }
}
