//! Geometry, color, boundary, grid, and reading records.
//!
//! A garden is a quadrilateral field area described by four corner points
//! and overlaid with a fixed 10x10 grid. Cells are addressed row-major by a
//! [`CellIndex`] in `0..100`, with row 0 at the northern edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::GardenId;

/// Number of rows (and columns) in a garden grid.
pub const GRID_SIDE: usize = 10;

/// Total number of cells in a garden grid.
pub const GRID_CELLS: usize = GRID_SIDE * GRID_SIDE;

/// Number of corner slots in a garden boundary.
pub const BOUNDARY_POINTS: usize = 4;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A WGS84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GeoPoint {
    /// Latitude, positive northwards.
    pub lat: f64,
    /// Longitude, positive eastwards.
    pub lng: f64,
}

impl GeoPoint {
    /// Create a coordinate pair without validation.
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether both components are finite and within the WGS84 ranges
    /// (`[-90, 90]` latitude, `[-180, 180]` longitude).
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A boundary slot number, `1..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PointNo(u8);

impl PointNo {
    /// Build a slot number, returning `None` outside `1..=4`.
    pub fn new(point_no: i64) -> Option<Self> {
        let n = u8::try_from(point_no).ok()?;
        (1..=4).contains(&n).then_some(Self(n))
    }

    /// The 1-based slot number.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// The 0-based array slot.
    pub const fn slot(self) -> usize {
        self.0.saturating_sub(1) as usize
    }
}

/// Row-major index of a grid cell, `0..100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CellIndex(u8);

impl CellIndex {
    /// Build a cell index, returning `None` if `index >= 100`.
    pub fn new(index: usize) -> Option<Self> {
        if index >= GRID_CELLS {
            return None;
        }
        u8::try_from(index).ok().map(Self)
    }

    /// Build a cell index from a row and column, each in `0..10`.
    pub fn from_row_col(row: usize, col: usize) -> Option<Self> {
        if row >= GRID_SIDE || col >= GRID_SIDE {
            return None;
        }
        Self::new(row.checked_mul(GRID_SIDE)?.checked_add(col)?)
    }

    /// The flat index.
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Row number, 0 is the northernmost row.
    pub const fn row(self) -> usize {
        self.get() / GRID_SIDE
    }

    /// Column number, 0 is the westernmost column.
    pub const fn col(self) -> usize {
        self.get() % GRID_SIDE
    }
}

/// An 8-bit RGB color sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Rgb {
    /// Red intensity.
    pub r: u8,
    /// Green intensity.
    pub g: u8,
    /// Blue intensity.
    pub b: u8,
}

impl Rgb {
    /// Create a color from its three channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

// ---------------------------------------------------------------------------
// Boundary
// ---------------------------------------------------------------------------

/// Completeness of a garden boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum BoundaryState {
    /// No corner has been submitted.
    Empty,
    /// One to three corners are present.
    Partial,
    /// All four corners are present.
    Complete,
}

/// The four corner slots of a garden, serialized as a 4-element array with
/// `null` for unfilled slots.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Boundary([Option<GeoPoint>; BOUNDARY_POINTS]);

impl Boundary {
    /// An empty boundary.
    pub const fn new() -> Self {
        Self([None; BOUNDARY_POINTS])
    }

    /// The corner in the given slot, if filled.
    pub fn get(&self, point_no: PointNo) -> Option<GeoPoint> {
        self.0.get(point_no.slot()).copied().flatten()
    }

    /// Overwrite the given slot. Returns the previous value.
    pub fn set(&mut self, point_no: PointNo, point: GeoPoint) -> Option<GeoPoint> {
        self.0
            .get_mut(point_no.slot())
            .and_then(|slot| slot.replace(point))
    }

    /// Number of filled slots.
    pub fn filled(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }

    /// Current completeness state.
    pub fn state(&self) -> BoundaryState {
        match self.filled() {
            0 => BoundaryState::Empty,
            BOUNDARY_POINTS => BoundaryState::Complete,
            _ => BoundaryState::Partial,
        }
    }

    /// Whether all four slots are filled.
    pub fn is_complete(&self) -> bool {
        self.state() == BoundaryState::Complete
    }

    /// The four corners in slot order, or `None` while incomplete.
    pub fn corners(&self) -> Option<[GeoPoint; BOUNDARY_POINTS]> {
        let [a, b, c, d] = self.0;
        Some([a?, b?, c?, d?])
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// One grid slot: the most recent color sample mapped onto it.
///
/// An unset cell is black with no coordinates or timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Cell {
    /// Red intensity.
    pub r: u8,
    /// Green intensity.
    pub g: u8,
    /// Blue intensity.
    pub b: u8,
    /// Latitude of the sample that last wrote this cell.
    pub lat: Option<f64>,
    /// Longitude of the sample that last wrote this cell.
    pub lng: Option<f64>,
    /// When that sample was measured.
    pub measured_at: Option<DateTime<Utc>>,
}

impl Cell {
    /// The cell a reading produces when it lands on the grid.
    pub fn from_reading(reading: &ColorReading) -> Self {
        Self {
            r: reading.r,
            g: reading.g,
            b: reading.b,
            lat: Some(reading.lat),
            lng: Some(reading.lng),
            measured_at: Some(reading.measured_at),
        }
    }

    /// Whether a reading has ever been written here.
    pub const fn is_set(&self) -> bool {
        self.measured_at.is_some()
    }

    /// The stored color.
    pub const fn color(&self) -> Rgb {
        Rgb::new(self.r, self.g, self.b)
    }
}

/// Error returned when a cell sequence is not exactly [`GRID_CELLS`] long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSizeError(pub usize);

impl core::fmt::Display for GridSizeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "grid must have exactly {GRID_CELLS} cells, got {}", self.0)
    }
}

impl std::error::Error for GridSizeError {}

/// A dense 100-cell grid in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(try_from = "Vec<Cell>")]
#[ts(export, export_to = "bindings/")]
pub struct Grid(Vec<Cell>);

impl Grid {
    /// A grid of unset cells.
    pub fn new() -> Self {
        Self(vec![Cell::default(); GRID_CELLS])
    }

    /// The cell at `index`.
    pub fn get(&self, index: CellIndex) -> Option<&Cell> {
        self.0.get(index.get())
    }

    /// Overwrite the cell at `index`.
    pub fn set(&mut self, index: CellIndex, cell: Cell) {
        if let Some(slot) = self.0.get_mut(index.get()) {
            *slot = cell;
        }
    }

    /// All cells in index order.
    pub fn cells(&self) -> &[Cell] {
        &self.0
    }

    /// Number of cells that have received a reading.
    pub fn set_count(&self) -> usize {
        self.0.iter().filter(|c| c.is_set()).count()
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Vec<Cell>> for Grid {
    type Error = GridSizeError;

    fn try_from(cells: Vec<Cell>) -> Result<Self, Self::Error> {
        if cells.len() == GRID_CELLS {
            Ok(Self(cells))
        } else {
            Err(GridSizeError(cells.len()))
        }
    }
}

// ---------------------------------------------------------------------------
// Gardens and readings
// ---------------------------------------------------------------------------

/// Full externally visible state of one garden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GardenView {
    /// Device-assigned identifier.
    pub garden_id: GardenId,
    /// Corner slots.
    pub boundary: Boundary,
    /// When the garden record was created.
    pub created_at: DateTime<Utc>,
    /// The 10x10 color grid.
    pub grid: Grid,
}

/// A raw color sample as accepted, kept in the append-only reading log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ColorReading {
    /// Garden the sample was submitted for.
    pub garden_id: GardenId,
    /// Sample latitude.
    pub lat: f64,
    /// Sample longitude.
    pub lng: f64,
    /// Red intensity.
    pub r: u8,
    /// Green intensity.
    pub g: u8,
    /// Blue intensity.
    pub b: u8,
    /// Server-assigned measurement timestamp.
    pub measured_at: DateTime<Utc>,
    /// Grid cell the sample landed in, `None` when outside the grid box.
    pub cell_index: Option<CellIndex>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn point_no_bounds() {
        assert!(PointNo::new(0).is_none());
        assert!(PointNo::new(5).is_none());
        assert!(PointNo::new(-1).is_none());
        assert_eq!(PointNo::new(1).unwrap().slot(), 0);
        assert_eq!(PointNo::new(4).unwrap().slot(), 3);
    }

    #[test]
    fn cell_index_row_col() {
        let idx = CellIndex::from_row_col(3, 7).unwrap();
        assert_eq!(idx.get(), 37);
        assert_eq!(idx.row(), 3);
        assert_eq!(idx.col(), 7);
        assert!(CellIndex::new(100).is_none());
        assert!(CellIndex::from_row_col(10, 0).is_none());
        assert!(CellIndex::from_row_col(0, 10).is_none());
    }

    #[test]
    fn boundary_state_transitions() {
        let mut boundary = Boundary::new();
        assert_eq!(boundary.state(), BoundaryState::Empty);
        assert!(boundary.corners().is_none());

        for (i, n) in (1..=4).enumerate() {
            let point_no = PointNo::new(n).unwrap();
            let prev = boundary.set(point_no, GeoPoint::new(14.0, 100.0));
            assert!(prev.is_none());
            let expected = if i == 3 {
                BoundaryState::Complete
            } else {
                BoundaryState::Partial
            };
            assert_eq!(boundary.state(), expected);
        }
        assert!(boundary.corners().is_some());

        let prev = boundary.set(PointNo::new(2).unwrap(), GeoPoint::new(15.0, 101.0));
        assert_eq!(prev, Some(GeoPoint::new(14.0, 100.0)));
        assert!(boundary.is_complete());
    }

    #[test]
    fn boundary_serializes_with_nulls() {
        let mut boundary = Boundary::new();
        boundary.set(PointNo::new(3).unwrap(), GeoPoint::new(1.5, 2.5));
        let json = serde_json::to_value(boundary).unwrap();
        assert_eq!(
            json,
            serde_json::json!([null, null, {"lat": 1.5, "lng": 2.5}, null])
        );
    }

    #[test]
    fn grid_rejects_wrong_length() {
        let json = serde_json::to_string(&vec![Cell::default(); 99]).unwrap();
        assert!(serde_json::from_str::<Grid>(&json).is_err());

        let json = serde_json::to_string(&Grid::new()).unwrap();
        let grid: Grid = serde_json::from_str(&json).unwrap();
        assert_eq!(grid.cells().len(), GRID_CELLS);
        assert_eq!(grid.set_count(), 0);
    }

    #[test]
    fn unset_cell_shape() {
        let json = serde_json::to_value(Cell::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"r": 0, "g": 0, "b": 0, "lat": null, "lng": null, "measured_at": null})
        );
    }

    #[test]
    fn geo_point_validation() {
        assert!(GeoPoint::new(14.4755, 100.118).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 100.0).is_valid());
        assert!(!GeoPoint::new(14.0, f64::INFINITY).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
    }
}
