//! Garden, boundary, cell, and reading tables.
//!
//! Row types mirror the schema in `migrations/`. Narrow integer columns are
//! stored as `SMALLINT` and range-checked on the way back in; a stored
//! value outside its domain surfaces as [`DbError::CorruptRow`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use garden_core::{GardenRecord, StoreWrite};
use garden_types::{Cell, CellIndex, ColorReading, GardenId, GeoPoint, PointNo};
use sqlx::PgPool;

use crate::error::DbError;

/// Operations on the garden tables.
pub struct GardenStore<'a> {
    pool: &'a PgPool,
}

impl<'a> GardenStore<'a> {
    /// Create a new garden store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Apply one write-behind mutation.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails, including a
    /// foreign-key violation when the garden does not exist.
    pub async fn apply(&self, write: &StoreWrite) -> Result<(), DbError> {
        match write {
            StoreWrite::CreateGarden {
                garden_id,
                created_at,
            } => self.create_garden(garden_id, *created_at).await,
            StoreWrite::SetBoundaryPoint {
                garden_id,
                point_no,
                point,
            } => self.set_boundary_point(garden_id, *point_no, *point).await,
            StoreWrite::SetCell {
                garden_id,
                cell_index,
                cell,
            } => self.set_cell(garden_id, *cell_index, cell).await,
            StoreWrite::AppendReading(reading) => self.append_reading(reading).await,
            StoreWrite::DeleteGarden { garden_id } => self.delete_garden(garden_id).await,
        }
    }

    /// Insert a garden row. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn create_garden(
        &self,
        garden_id: &GardenId,
        created_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO gardens (garden_id, created_at)
              VALUES ($1, $2)
              ON CONFLICT (garden_id) DO NOTHING",
        )
        .bind(garden_id.as_str())
        .bind(created_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Insert or overwrite one boundary corner.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the upsert fails.
    pub async fn set_boundary_point(
        &self,
        garden_id: &GardenId,
        point_no: PointNo,
        point: GeoPoint,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO boundary_points (garden_id, point_no, lat, lng)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (garden_id, point_no) DO UPDATE SET
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng",
        )
        .bind(garden_id.as_str())
        .bind(i16::from(point_no.get()))
        .bind(point.lat)
        .bind(point.lng)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Insert or overwrite one grid cell.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the upsert fails.
    pub async fn set_cell(
        &self,
        garden_id: &GardenId,
        cell_index: CellIndex,
        cell: &Cell,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO cells (garden_id, cell_index, r, g, b, lat, lng, measured_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
              ON CONFLICT (garden_id, cell_index) DO UPDATE SET
                r = EXCLUDED.r,
                g = EXCLUDED.g,
                b = EXCLUDED.b,
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                measured_at = EXCLUDED.measured_at",
        )
        .bind(garden_id.as_str())
        .bind(index_to_db(cell_index))
        .bind(i16::from(cell.r))
        .bind(i16::from(cell.g))
        .bind(i16::from(cell.b))
        .bind(cell.lat)
        .bind(cell.lng)
        .bind(cell.measured_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Append to the reading log.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn append_reading(&self, reading: &ColorReading) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO readings (garden_id, lat, lng, r, g, b, cell_index, measured_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(reading.garden_id.as_str())
        .bind(reading.lat)
        .bind(reading.lng)
        .bind(i16::from(reading.r))
        .bind(i16::from(reading.g))
        .bind(i16::from(reading.b))
        .bind(reading.cell_index.map(index_to_db))
        .bind(reading.measured_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Remove a garden and all of its rows in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if any delete fails; nothing is
    /// removed in that case.
    pub async fn delete_garden(&self, garden_id: &GardenId) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for statement in [
            "DELETE FROM readings WHERE garden_id = $1",
            "DELETE FROM cells WHERE garden_id = $1",
            "DELETE FROM boundary_points WHERE garden_id = $1",
            "DELETE FROM gardens WHERE garden_id = $1",
        ] {
            sqlx::query(statement)
                .bind(garden_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Load every garden with its corners and stored cells.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a query fails, or
    /// [`DbError::CorruptRow`] if a stored value is out of range.
    pub async fn load_gardens(&self) -> Result<Vec<GardenRecord>, DbError> {
        let gardens = sqlx::query_as::<_, GardenRow>(
            r"SELECT garden_id, created_at FROM gardens ORDER BY garden_id",
        )
        .fetch_all(self.pool)
        .await?;

        let mut records: BTreeMap<String, GardenRecord> = BTreeMap::new();
        for row in gardens {
            let garden_id = parse_garden_id(&row.garden_id)?;
            records.insert(row.garden_id, GardenRecord::new(garden_id, row.created_at));
        }

        let points = sqlx::query_as::<_, BoundaryPointRow>(
            r"SELECT garden_id, point_no, lat, lng FROM boundary_points",
        )
        .fetch_all(self.pool)
        .await?;
        for row in points {
            if let Some(record) = records.get_mut(&row.garden_id) {
                let (point_no, point) = row.into_domain()?;
                record.boundary.set(point_no, point);
            }
        }

        let cells = sqlx::query_as::<_, CellRow>(
            r"SELECT garden_id, cell_index, r, g, b, lat, lng, measured_at FROM cells",
        )
        .fetch_all(self.pool)
        .await?;
        for row in cells {
            if let Some(record) = records.get_mut(&row.garden_id) {
                let (index, cell) = row.into_domain()?;
                record.cells.insert(index, cell);
            }
        }

        Ok(records.into_values().collect())
    }

    /// The reading log of one garden, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::CorruptRow`] if a stored value is out of range.
    pub async fn readings(&self, garden_id: &GardenId) -> Result<Vec<ColorReading>, DbError> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            r"SELECT garden_id, lat, lng, r, g, b, cell_index, measured_at
              FROM readings
              WHERE garden_id = $1
              ORDER BY id",
        )
        .bind(garden_id.as_str())
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(ReadingRow::into_domain).collect()
    }
}

// =========================================================================
// Rows
// =========================================================================

/// A row from the `gardens` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GardenRow {
    /// Garden identifier.
    pub garden_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A row from the `boundary_points` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BoundaryPointRow {
    /// Owning garden.
    pub garden_id: String,
    /// Slot number, `1..=4`.
    pub point_no: i16,
    /// Corner latitude.
    pub lat: f64,
    /// Corner longitude.
    pub lng: f64,
}

impl BoundaryPointRow {
    /// Convert to domain values.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::CorruptRow`] if the slot number is out of range.
    pub fn into_domain(self) -> Result<(PointNo, GeoPoint), DbError> {
        let point_no = PointNo::new(i64::from(self.point_no))
            .ok_or_else(|| corrupt("boundary_points", format!("point_no {}", self.point_no)))?;
        Ok((point_no, GeoPoint::new(self.lat, self.lng)))
    }
}

/// A row from the `cells` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CellRow {
    /// Owning garden.
    pub garden_id: String,
    /// Row-major index, `0..100`.
    pub cell_index: i16,
    /// Red intensity.
    pub r: i16,
    /// Green intensity.
    pub g: i16,
    /// Blue intensity.
    pub b: i16,
    /// Latitude of the sample that last wrote this cell.
    pub lat: Option<f64>,
    /// Longitude of that sample.
    pub lng: Option<f64>,
    /// When that sample was measured.
    pub measured_at: Option<DateTime<Utc>>,
}

impl CellRow {
    /// Convert to domain values.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::CorruptRow`] if the index or a channel is out of
    /// range.
    pub fn into_domain(self) -> Result<(CellIndex, Cell), DbError> {
        let index = index_from_db("cells", self.cell_index)?;
        let cell = Cell {
            r: channel_from_db("cells", self.r)?,
            g: channel_from_db("cells", self.g)?,
            b: channel_from_db("cells", self.b)?,
            lat: self.lat,
            lng: self.lng,
            measured_at: self.measured_at,
        };
        Ok((index, cell))
    }
}

/// A row from the `readings` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReadingRow {
    /// Owning garden.
    pub garden_id: String,
    /// Sample latitude.
    pub lat: f64,
    /// Sample longitude.
    pub lng: f64,
    /// Red intensity.
    pub r: i16,
    /// Green intensity.
    pub g: i16,
    /// Blue intensity.
    pub b: i16,
    /// Cell the sample landed in, if any.
    pub cell_index: Option<i16>,
    /// Server-assigned timestamp.
    pub measured_at: DateTime<Utc>,
}

impl ReadingRow {
    /// Convert to a domain reading.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::CorruptRow`] if a value is out of range.
    pub fn into_domain(self) -> Result<ColorReading, DbError> {
        Ok(ColorReading {
            garden_id: parse_garden_id(&self.garden_id)?,
            lat: self.lat,
            lng: self.lng,
            r: channel_from_db("readings", self.r)?,
            g: channel_from_db("readings", self.g)?,
            b: channel_from_db("readings", self.b)?,
            measured_at: self.measured_at,
            cell_index: self
                .cell_index
                .map(|raw| index_from_db("readings", raw))
                .transpose()?,
        })
    }
}

fn corrupt(table: &'static str, detail: String) -> DbError {
    DbError::CorruptRow { table, detail }
}

fn parse_garden_id(raw: &str) -> Result<GardenId, DbError> {
    GardenId::parse(raw).ok_or_else(|| corrupt("gardens", format!("garden_id {raw:?}")))
}

fn index_to_db(index: CellIndex) -> i16 {
    // Always < 100.
    i16::try_from(index.get()).unwrap_or(i16::MAX)
}

fn index_from_db(table: &'static str, raw: i16) -> Result<CellIndex, DbError> {
    usize::try_from(raw)
        .ok()
        .and_then(CellIndex::new)
        .ok_or_else(|| corrupt(table, format!("cell_index {raw}")))
}

fn channel_from_db(table: &'static str, raw: i16) -> Result<u8, DbError> {
    u8::try_from(raw).map_err(|e| corrupt(table, format!("color channel {raw}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cell_row(cell_index: i16, r: i16) -> CellRow {
        CellRow {
            garden_id: "g".to_owned(),
            cell_index,
            r,
            g: 0,
            b: 255,
            lat: Some(14.0),
            lng: Some(100.0),
            measured_at: Some(Utc::now()),
        }
    }

    #[test]
    fn cell_row_converts_in_range_values() {
        let (index, cell) = cell_row(99, 12).into_domain().unwrap();
        assert_eq!(index.get(), 99);
        assert_eq!(cell.r, 12);
        assert_eq!(cell.b, 255);
        assert!(cell.is_set());
    }

    #[test]
    fn out_of_range_rows_are_corrupt() {
        assert!(matches!(
            cell_row(100, 0).into_domain(),
            Err(DbError::CorruptRow { table: "cells", .. })
        ));
        assert!(cell_row(-1, 0).into_domain().is_err());
        assert!(cell_row(0, 256).into_domain().is_err());

        let point = BoundaryPointRow {
            garden_id: "g".to_owned(),
            point_no: 5,
            lat: 0.0,
            lng: 0.0,
        };
        assert!(point.into_domain().is_err());
    }

    #[test]
    fn reading_row_keeps_missing_cell_index() {
        let row = ReadingRow {
            garden_id: "42".to_owned(),
            lat: 1.0,
            lng: 2.0,
            r: 1,
            g: 2,
            b: 3,
            cell_index: None,
            measured_at: Utc::now(),
        };
        let reading = row.into_domain().unwrap();
        assert_eq!(reading.garden_id.as_str(), "42");
        assert!(reading.cell_index.is_none());
    }

    #[test]
    fn cell_index_round_trips_through_smallint() {
        let index = CellIndex::new(57).unwrap();
        assert_eq!(index_from_db("cells", index_to_db(index)).unwrap(), index);
    }
}
