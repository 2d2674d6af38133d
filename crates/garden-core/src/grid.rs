//! Mapping of a geo sample onto a garden's 10x10 grid.
//!
//! The grid is laid over the axis-aligned bounding box of the four boundary
//! corners, not over the quadrilateral itself. A sample inside the box but
//! outside a skewed or trapezoidal boundary still maps to a cell. Row 0 is
//! the northern edge (highest latitude), column 0 the western edge.
//!
//! Samples exactly on the southern or eastern edge of the box belong to the
//! last row or column.

use garden_types::{CellIndex, GeoPoint, BOUNDARY_POINTS, GRID_SIDE};

/// `GRID_SIDE` as a float for the scaling step.
const GRID_SIDE_F64: f64 = 10.0;

/// Largest valid row or column number.
const LAST_LINE: usize = GRID_SIDE - 1;

/// Outcome of mapping a sample onto a garden grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The sample lands in this cell.
    Cell(CellIndex),
    /// The sample lies outside the grid box, or the box has zero extent
    /// on an axis.
    OutOfBounds,
}

impl Placement {
    /// The cell index, if the sample landed on the grid.
    pub const fn cell(self) -> Option<CellIndex> {
        match self {
            Self::Cell(index) => Some(index),
            Self::OutOfBounds => None,
        }
    }
}

/// Axis-aligned bounding box of a garden boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lng: f64,
    /// Eastern edge.
    pub max_lng: f64,
}

impl GridBox {
    /// Compute the box enclosing the four corners.
    pub fn from_corners(corners: &[GeoPoint; BOUNDARY_POINTS]) -> Self {
        corners.iter().fold(
            Self {
                min_lat: f64::INFINITY,
                max_lat: f64::NEG_INFINITY,
                min_lng: f64::INFINITY,
                max_lng: f64::NEG_INFINITY,
            },
            |acc, p| Self {
                min_lat: acc.min_lat.min(p.lat),
                max_lat: acc.max_lat.max(p.lat),
                min_lng: acc.min_lng.min(p.lng),
                max_lng: acc.max_lng.max(p.lng),
            },
        )
    }

    /// Whether the box has positive extent on both axes.
    pub fn has_area(&self) -> bool {
        self.max_lat > self.min_lat && self.max_lng > self.min_lng
    }

    /// Whether `point` lies within the box, edges included.
    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }

    /// Map a sample onto the grid laid over this box.
    pub fn place(&self, sample: GeoPoint) -> Placement {
        if !self.has_area() || !self.contains(sample) {
            return Placement::OutOfBounds;
        }

        let rel_lat = (sample.lat - self.min_lat) / (self.max_lat - self.min_lat);
        let rel_lng = (sample.lng - self.min_lng) / (self.max_lng - self.min_lng);

        let row = grid_line(1.0 - rel_lat);
        let col = grid_line(rel_lng);

        CellIndex::from_row_col(row, col).map_or(Placement::OutOfBounds, Placement::Cell)
    }
}

/// Map a sample onto the grid of a complete boundary.
///
/// Returns [`Placement::OutOfBounds`] when the sample is outside the
/// corners' bounding box, when either coordinate is not finite, or when
/// the box is degenerate (all corners share a latitude or a longitude).
pub fn map_to_cell(corners: &[GeoPoint; BOUNDARY_POINTS], sample: GeoPoint) -> Placement {
    if !sample.lat.is_finite() || !sample.lng.is_finite() {
        return Placement::OutOfBounds;
    }
    GridBox::from_corners(corners).place(sample)
}

/// Scale a `[0, 1]` fraction to a row or column number, clamping the
/// closed upper edge into the last line.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn grid_line(fraction: f64) -> usize {
    let scaled = (fraction * GRID_SIDE_F64).floor();
    if scaled <= 0.0 {
        0
    } else {
        // Clamped to [0, 9] before the cast.
        (scaled as usize).min(LAST_LINE)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    /// Square field used by the field trials.
    fn square() -> [GeoPoint; 4] {
        [
            GeoPoint::new(14.4755, 100.1180),
            GeoPoint::new(14.4755, 100.1190),
            GeoPoint::new(14.4765, 100.1190),
            GeoPoint::new(14.4765, 100.1180),
        ]
    }

    fn index(placement: Placement) -> usize {
        placement.cell().unwrap().get()
    }

    #[test]
    fn northwest_interior_is_cell_zero() {
        let p = map_to_cell(&square(), GeoPoint::new(14.476_45, 100.118_05));
        assert_eq!(index(p), 0);
    }

    #[test]
    fn southeast_interior_is_cell_99() {
        let p = map_to_cell(&square(), GeoPoint::new(14.475_55, 100.118_95));
        assert_eq!(index(p), 99);
    }

    #[test]
    fn corners_clamp_into_the_grid() {
        let corners = square();
        assert_eq!(index(map_to_cell(&corners, GeoPoint::new(14.4765, 100.1180))), 0);
        assert_eq!(index(map_to_cell(&corners, GeoPoint::new(14.4765, 100.1190))), 9);
        assert_eq!(index(map_to_cell(&corners, GeoPoint::new(14.4755, 100.1180))), 90);
        assert_eq!(index(map_to_cell(&corners, GeoPoint::new(14.4755, 100.1190))), 99);
    }

    #[test]
    fn interior_rows_and_columns() {
        let corners = square();
        assert_eq!(index(map_to_cell(&corners, GeoPoint::new(14.476_03, 100.118_47))), 44);
        assert_eq!(index(map_to_cell(&corners, GeoPoint::new(14.475_65, 100.118_15))), 81);
        assert_eq!(index(map_to_cell(&corners, GeoPoint::new(14.476_35, 100.118_85))), 18);
    }

    #[test]
    fn latitude_axis_is_inverted() {
        let corners = square();
        let north = map_to_cell(&corners, GeoPoint::new(14.4764, 100.1181)).cell().unwrap();
        let south = map_to_cell(&corners, GeoPoint::new(14.4756, 100.1189)).cell().unwrap();
        assert_eq!(north.row(), 0);
        assert_eq!(south.row(), 9);
    }

    #[test]
    fn near_corner_samples_on_gridlines_land_one_column_in() {
        // 14.4764/100.1181 and 14.4756/100.1189 sit on column gridlines; the
        // f64 rounding of the relative longitude puts them in column 1 and 8.
        let corners = square();
        assert_eq!(index(map_to_cell(&corners, GeoPoint::new(14.4764, 100.1181))), 1);
        assert_eq!(index(map_to_cell(&corners, GeoPoint::new(14.4756, 100.1189))), 98);
    }

    #[test]
    fn corner_order_does_not_matter() {
        let mut corners = square();
        corners.reverse();
        let p = map_to_cell(&corners, GeoPoint::new(14.476_03, 100.118_47));
        assert_eq!(index(p), 44);
    }

    #[test]
    fn samples_outside_the_box_are_out_of_bounds() {
        let corners = square();
        for sample in [
            GeoPoint::new(14.4766, 100.1185),
            GeoPoint::new(14.4754, 100.1185),
            GeoPoint::new(14.4760, 100.1179),
            GeoPoint::new(14.4760, 100.1191),
            GeoPoint::new(0.0, 0.0),
        ] {
            assert_eq!(map_to_cell(&corners, sample), Placement::OutOfBounds, "{sample:?}");
        }
    }

    #[test]
    fn non_finite_samples_are_out_of_bounds() {
        let corners = square();
        assert_eq!(
            map_to_cell(&corners, GeoPoint::new(f64::NAN, 100.1185)),
            Placement::OutOfBounds
        );
        assert_eq!(
            map_to_cell(&corners, GeoPoint::new(14.476, f64::INFINITY)),
            Placement::OutOfBounds
        );
    }

    #[test]
    fn degenerate_boundaries_are_out_of_bounds() {
        let flat_lat = [
            GeoPoint::new(14.0, 100.0),
            GeoPoint::new(14.0, 100.1),
            GeoPoint::new(14.0, 100.2),
            GeoPoint::new(14.0, 100.3),
        ];
        assert_eq!(
            map_to_cell(&flat_lat, GeoPoint::new(14.0, 100.1)),
            Placement::OutOfBounds
        );

        let single = [GeoPoint::new(14.0, 100.0); 4];
        assert_eq!(
            map_to_cell(&single, GeoPoint::new(14.0, 100.0)),
            Placement::OutOfBounds
        );
    }

    #[test]
    fn trapezoid_uses_its_bounding_box() {
        // Narrow northern edge; the sample is outside the trapezoid but
        // inside its bounding box.
        let trapezoid = [
            GeoPoint::new(10.0, 20.0),
            GeoPoint::new(10.0, 21.0),
            GeoPoint::new(11.0, 20.6),
            GeoPoint::new(11.0, 20.4),
        ];
        let p = map_to_cell(&trapezoid, GeoPoint::new(10.95, 20.05));
        assert_eq!(index(p), 0);
    }

    #[test]
    fn every_index_is_reachable() {
        let b = GridBox {
            min_lat: 0.0,
            max_lat: 1.0,
            min_lng: 0.0,
            max_lng: 1.0,
        };
        let mut seen = [false; 100];
        for row in 0..10_u32 {
            for col in 0..10_u32 {
                let lat = 1.0 - (f64::from(row) + 0.5) / 10.0;
                let lng = (f64::from(col) + 0.5) / 10.0;
                let idx = index(b.place(GeoPoint::new(lat, lng)));
                assert_eq!(idx, (row * 10 + col) as usize);
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|s| *s));
    }
}
