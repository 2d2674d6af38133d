//! Real-time events pushed to connected viewers.
//!
//! Every message on the viewer channel is a [`SyncEvent`], encoded as
//! `{"type": "...", "data": {...}}` with a snake-case type tag. The same
//! `boundary_completed` shape is used for the per-garden snapshot a
//! viewer receives on connect, in which case `data.grid` is present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::GardenId;
use crate::structs::{Boundary, Cell, CellIndex, GardenView, Grid};

/// A state change delivered to every connected viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SyncEvent {
    /// A garden's boundary gained its fourth corner (or, on connect, a
    /// complete garden's full state).
    BoundaryCompleted(GardenSummary),
    /// A color reading landed on a grid cell.
    CellUpdated(CellUpdate),
    /// A garden and all of its data were removed.
    GardenDeleted(GardenDeleted),
}

impl SyncEvent {
    /// The garden this event concerns.
    pub const fn garden_id(&self) -> &GardenId {
        match self {
            Self::BoundaryCompleted(summary) => &summary.garden_id,
            Self::CellUpdated(update) => &update.garden_id,
            Self::GardenDeleted(deleted) => &deleted.garden_id,
        }
    }

    /// The wire tag of this event.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BoundaryCompleted(_) => "boundary_completed",
            Self::CellUpdated(_) => "cell_updated",
            Self::GardenDeleted(_) => "garden_deleted",
        }
    }
}

/// Payload of [`SyncEvent::BoundaryCompleted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GardenSummary {
    /// The garden.
    pub garden_id: GardenId,
    /// Its four corners.
    pub boundary: Boundary,
    /// When the garden record was created.
    pub created_at: DateTime<Utc>,
    /// Full grid, present only in connect-time snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub grid: Option<Grid>,
}

impl From<GardenView> for GardenSummary {
    fn from(view: GardenView) -> Self {
        Self {
            garden_id: view.garden_id,
            boundary: view.boundary,
            created_at: view.created_at,
            grid: Some(view.grid),
        }
    }
}

/// Payload of [`SyncEvent::CellUpdated`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CellUpdate {
    /// The garden.
    pub garden_id: GardenId,
    /// Row-major index of the updated cell.
    pub cell_index: CellIndex,
    /// The new cell contents.
    pub cell: Cell,
}

/// Payload of [`SyncEvent::GardenDeleted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GardenDeleted {
    /// The removed garden.
    pub garden_id: GardenId,
}
