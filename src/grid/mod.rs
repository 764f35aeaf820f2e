//! Grid index for the terrain storage engine.
//!
//! Partitions a configured lon/lat rectangle into uniform square cells
//! and provides the deterministic mappings between coordinates, cell
//! ids, and storage keys. Everything here is pure; bounds enforcement
//! policy (error vs. silent absent) is the terrain engine's concern.
//!
//! # Storage key format
//!
//! `G_RRR_CCC|<lon>|<lat>` where the coordinates are rendered in fixed
//! notation with exactly seven fractional digits. Byte-lexicographic
//! ordering of these keys groups all points of one cell contiguously,
//! which is what makes per-cell range scans on the store cheap.

mod types;

pub use types::{CellId, GridError, MAX_GRID_DIM};

/// Immutable description of the engine's grid partitioning.
///
/// Derived from the configured bounds and cell size at construction,
/// after which every mapping it provides is a deterministic function of
/// its inputs.
#[derive(Debug, Clone)]
pub struct GridSpec {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
    cell_size_deg: f64,
    rows: u32,
    cols: u32,
}

impl GridSpec {
    /// Builds a grid over the given bounds with uniform square cells.
    ///
    /// # Errors
    ///
    /// Fails when the bounds are not a proper rectangle, the cell size
    /// is not positive, or the resulting grid exceeds
    /// [`MAX_GRID_DIM`]×[`MAX_GRID_DIM`] cells.
    pub fn new(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        cell_size_deg: f64,
    ) -> Result<Self, GridError> {
        if !(min_lon < max_lon && min_lat < max_lat) {
            return Err(GridError::InvalidBounds {
                min_lon,
                min_lat,
                max_lon,
                max_lat,
            });
        }
        if !(cell_size_deg.is_finite() && cell_size_deg > 0.0) {
            return Err(GridError::InvalidCellSize(cell_size_deg));
        }

        let cols = ((max_lon - min_lon) / cell_size_deg).ceil() as u32;
        let rows = ((max_lat - min_lat) / cell_size_deg).ceil() as u32;
        if rows > MAX_GRID_DIM || cols > MAX_GRID_DIM {
            return Err(GridError::TooManyCells { rows, cols });
        }

        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
            cell_size_deg,
            rows,
            cols,
        })
    }

    /// Number of rows in the grid.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of columns in the grid.
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// The configured bounds as `(min_lon, min_lat, max_lon, max_lat)`.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }

    /// Returns true when the coordinate lies within the closed bounds
    /// rectangle.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// Maps a coordinate to its grid cell.
    ///
    /// Coordinates are clamped into the bounds before flooring, and the
    /// resulting indices are clamped into `[0, rows)` / `[0, cols)`, so
    /// out-of-bounds input maps to the nearest edge cell. Callers that
    /// need strict bounds enforcement check [`contains`](Self::contains)
    /// first.
    pub fn cell_for(&self, lon: f64, lat: f64) -> CellId {
        let col = self.axis_index(lon, self.min_lon, self.max_lon, self.cols);
        let row = self.axis_index(lat, self.min_lat, self.max_lat, self.rows);
        CellId::new(row, col)
    }

    fn axis_index(&self, v: f64, min: f64, max: f64, count: u32) -> u32 {
        let clamped = v.clamp(min, max);
        let idx = ((clamped - min) / self.cell_size_deg) as u32;
        idx.min(count.saturating_sub(1))
    }

    /// Renders the storage key for a point.
    pub fn key_of(&self, lon: f64, lat: f64) -> String {
        format!("{}|{:.7}|{:.7}", self.cell_for(lon, lat), lon, lat)
    }

    /// Recovers the `(lon, lat)` encoded in a storage key.
    ///
    /// Returns `None` for keys that do not match the expected form;
    /// scans treat such entries as skippable.
    pub fn parse_key(key: &str) -> Option<(f64, f64)> {
        let mut parts = key.splitn(3, '|');
        let _cell = parts.next()?;
        let lon = parts.next()?.parse().ok()?;
        let lat = parts.next()?.parse().ok()?;
        Some((lon, lat))
    }

    /// Enumerates the cells covering a rectangle, row-major.
    ///
    /// The rectangle corners are clamped into bounds via
    /// [`cell_for`](Self::cell_for), so a query rectangle reaching
    /// outside the grid covers exactly the edge cells it touches.
    pub fn cells_covering(
        &self,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> impl Iterator<Item = CellId> {
        let start = self.cell_for(min_lon, min_lat);
        let end = self.cell_for(max_lon, max_lat);

        (start.row..=end.row)
            .flat_map(move |row| (start.col..=end.col).map(move |col| CellId::new(row, col)))
    }
}
