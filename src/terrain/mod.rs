//! Grid-partitioned terrain storage engine.
//!
//! Serves point writes, point lookups, and rectangular range queries
//! over geolocated elevation samples. The managed region is partitioned
//! into uniform cells ([`grid`](crate::grid)); each cell's points share
//! a storage key prefix, so a cell is one contiguous range in the
//! underlying store, and the engine caches whole cells ([`GridLruCache`])
//! to amortise the cost of those range scans across the spatially local
//! access patterns terrain workloads exhibit.
//!
//! # Caching behavior
//!
//! Lookups warm the cache per cell: any miss materialises the complete
//! cell, even when the requested point is absent, because neighbouring
//! points are likely to be asked for next. Writes go to the store first
//! and update a resident cell's mapping in place only after the store
//! accepted them, so the cache never runs ahead of disk.

mod cache;
mod types;

pub use cache::{GridCell, GridLruCache};
pub use types::{TerrainConfig, TerrainError, TerrainPoint, DEFAULT_CACHE_CAPACITY};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::grid::{CellId, GridSpec};
use crate::store::Store;

/// The terrain storage engine.
///
/// Construction derives the grid from the configured bounds and cell
/// size; everything but the cell cache is immutable afterwards. The
/// engine holds a non-owning [`Store`] handle: dropping the engine
/// drops its cache but leaves the store open.
pub struct TerrainEngine {
    store: Store,
    grid: GridSpec,
    cache: GridLruCache,
}

impl TerrainEngine {
    /// Creates an engine over `store` for the configured region.
    ///
    /// # Errors
    ///
    /// Fails when the bounds are not a proper rectangle, the cell size
    /// is not positive, or the grid would exceed 1000×1000 cells.
    pub fn new(store: Store, config: TerrainConfig) -> Result<Self, TerrainError> {
        let grid = GridSpec::new(
            config.min_lon,
            config.min_lat,
            config.max_lon,
            config.max_lat,
            config.cell_size_deg,
        )?;

        let capacity = if config.cache_capacity == 0 {
            DEFAULT_CACHE_CAPACITY
        } else {
            config.cache_capacity
        };

        Ok(Self {
            store,
            grid,
            cache: GridLruCache::new(capacity),
        })
    }

    /// The engine's grid partitioning.
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Maps a coordinate to its grid cell.
    ///
    /// Public so operator tooling can reason about cell placement; see
    /// [`GridSpec::cell_for`] for the clamping behavior.
    pub fn cell_for(&self, lon: f64, lat: f64) -> CellId {
        self.grid.cell_for(lon, lat)
    }

    /// Stores one terrain sample.
    ///
    /// The value reaches the store first; if the sample's cell is
    /// resident in cache, its mapping is updated in place afterwards.
    ///
    /// # Errors
    ///
    /// [`TerrainError::OutOfBounds`] when the coordinate lies outside
    /// the configured region; store failures are propagated unchanged.
    pub fn put(&self, lon: f64, lat: f64, value: &[u8], sync: bool) -> Result<(), TerrainError> {
        if !self.grid.contains(lon, lat) {
            return Err(TerrainError::OutOfBounds { lon, lat });
        }

        let id = self.grid.cell_for(lon, lat);
        let key = self.grid.key_of(lon, lat);

        self.store.put(key.as_bytes(), value, sync)?;
        if let Some(cell) = self.cache.get(&id) {
            cell.insert(key, value.to_vec());
        }
        Ok(())
    }

    /// Reads one terrain sample.
    ///
    /// Out-of-bounds coordinates read as absent without error. A cache
    /// miss materialises the whole cell before answering, whether or
    /// not the point exists.
    pub fn get(&self, lon: f64, lat: f64) -> Result<Option<Vec<u8>>, TerrainError> {
        if !self.grid.contains(lon, lat) {
            return Ok(None);
        }

        let id = self.grid.cell_for(lon, lat);
        let key = self.grid.key_of(lon, lat);

        if let Some(cell) = self.cache.get(&id) {
            // Resident cells hold the complete cell contents, so a
            // missing key means the point is absent from the store too.
            return Ok(cell.get(&key));
        }

        let cell = self.load_cell(id)?;
        Ok(cell.get(&key))
    }

    /// Stores a set of samples atomically.
    ///
    /// Every point is bounds-checked before any write is staged; one
    /// bad point aborts the whole batch. Readers observe either none or
    /// all of the batch. Resident cells are updated only after the
    /// commit succeeds.
    pub fn batch_put(&self, points: &[TerrainPoint]) -> Result<(), TerrainError> {
        for point in points {
            if !self.grid.contains(point.lon, point.lat) {
                return Err(TerrainError::OutOfBounds {
                    lon: point.lon,
                    lat: point.lat,
                });
            }
        }

        let mut batch = self.store.batch();
        let mut keyed = Vec::with_capacity(points.len());
        for point in points {
            let id = self.grid.cell_for(point.lon, point.lat);
            let key = self.grid.key_of(point.lon, point.lat);
            batch.put(key.as_bytes(), &point.value);
            keyed.push((id, key));
        }

        batch.commit(false)?;

        for ((id, key), point) in keyed.into_iter().zip(points) {
            if let Some(cell) = self.cache.get(&id) {
                cell.insert(key, point.value.clone());
            }
        }
        Ok(())
    }

    /// Invokes `cb(lon, lat, value)` for every stored point inside the
    /// closed rectangle.
    ///
    /// Covered cells are visited row-major; within a cell, cached
    /// contents are served in unspecified order and store scans in key
    /// order. Callers must not assume a global ordering. Cells the
    /// query scans from the store are not installed into the cache; use
    /// [`preload_cell`](Self::preload_cell) for scan-ahead warming.
    pub fn range_query(
        &self,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        mut cb: impl FnMut(f64, f64, &[u8]),
    ) -> Result<(), TerrainError> {
        let in_rect = |lon: f64, lat: f64| {
            lon >= min_lon && lon <= max_lon && lat >= min_lat && lat <= max_lat
        };

        for id in self.grid.cells_covering(min_lon, min_lat, max_lon, max_lat) {
            if let Some(cell) = self.cache.get(&id) {
                cell.for_each(|key, value| {
                    if let Some((lon, lat)) = GridSpec::parse_key(key) {
                        if in_rect(lon, lat) {
                            cb(lon, lat, value);
                        }
                    }
                });
            } else {
                self.store
                    .range_query(id.key_prefix(), id.key_end(), |k, v| {
                        let Some((lon, lat)) =
                            std::str::from_utf8(k).ok().and_then(GridSpec::parse_key)
                        else {
                            debug!(cell = %id, "skipping unparseable storage key");
                            return;
                        };
                        if in_rect(lon, lat) {
                            cb(lon, lat, v);
                        }
                    })?;
            }
        }
        Ok(())
    }

    /// Force-loads a cell into the cache.
    pub fn preload_cell(&self, id: CellId) -> Result<(), TerrainError> {
        self.load_cell(id)?;
        Ok(())
    }

    /// Drops a cell from the cache, if resident.
    pub fn evict_cell(&self, id: &CellId) {
        self.cache.remove(id);
    }

    /// Drops every resident cell.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of cells currently resident in the cache.
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Scans the cell's key range out of the store, installs the result
    /// as the resident cell, and returns the shared handle.
    fn load_cell(&self, id: CellId) -> Result<Arc<GridCell>, TerrainError> {
        let mut points = HashMap::new();
        self.store
            .range_query(id.key_prefix(), id.key_end(), |k, v| {
                if let Ok(key) = std::str::from_utf8(k) {
                    points.insert(key.to_string(), v.to_vec());
                } else {
                    debug!(cell = %id, "skipping non-utf8 storage key");
                }
            })?;

        debug!(cell = %id, points = points.len(), "cell materialised into cache");

        let cell = Arc::new(GridCell::with_points(id, points));
        self.cache.put(id, Arc::clone(&cell));
        Ok(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use tempfile::TempDir;

    fn test_engine(cache_capacity: usize) -> (TempDir, TerrainEngine) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("db"), StoreOptions::default()).unwrap();
        let config =
            TerrainConfig::new(116.0, 39.0, 117.5, 41.0, 0.01).with_cache_capacity(cache_capacity);
        let engine = TerrainEngine::new(store, config).unwrap();
        (dir, engine)
    }

    fn collect_range(
        engine: &TerrainEngine,
        rect: (f64, f64, f64, f64),
    ) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        engine
            .range_query(rect.0, rect.1, rect.2, rect.3, |lon, lat, value| {
                out.push((format!("{:.5},{:.5}", lon, lat), value.to_vec()));
            })
            .unwrap();
        out.sort();
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Point operations
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn put_then_get_roundtrips() {
        let (_dir, engine) = test_engine(500);

        engine.put(116.405285, 39.904989, b"43.5", false).unwrap();
        assert_eq!(
            engine.get(116.405285, 39.904989).unwrap(),
            Some(b"43.5".to_vec())
        );
        assert_eq!(engine.get(116.5, 40.0).unwrap(), None);
    }

    #[test]
    fn bounds_corners_are_writable() {
        let (_dir, engine) = test_engine(500);

        engine.put(116.0, 39.0, b"b1", false).unwrap();
        engine.put(117.5, 41.0, b"b2", false).unwrap();
        assert_eq!(engine.get(116.0, 39.0).unwrap(), Some(b"b1".to_vec()));
        assert_eq!(engine.get(117.5, 41.0).unwrap(), Some(b"b2".to_vec()));
    }

    #[test]
    fn out_of_bounds_write_fails_read_is_absent() {
        let (_dir, engine) = test_engine(500);

        for (lon, lat) in [(115.9, 38.9), (117.6, 41.1)] {
            let result = engine.put(lon, lat, b"x", false);
            assert!(matches!(result, Err(TerrainError::OutOfBounds { .. })));
            assert_eq!(engine.get(lon, lat).unwrap(), None);
        }
    }

    #[test]
    fn put_overwrites_previous_value() {
        let (_dir, engine) = test_engine(500);

        engine.put(116.41, 39.91, b"old", false).unwrap();
        engine.put(116.41, 39.91, b"new", false).unwrap();
        assert_eq!(engine.get(116.41, 39.91).unwrap(), Some(b"new".to_vec()));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cache behavior
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn miss_warms_the_whole_cell_even_for_absent_points() {
        let (_dir, engine) = test_engine(500);

        assert_eq!(engine.cache_size(), 0);
        assert_eq!(engine.get(116.5, 40.0).unwrap(), None);
        assert_eq!(engine.cache_size(), 1);
    }

    #[test]
    fn writes_update_resident_cells_in_place() {
        let (_dir, engine) = test_engine(500);

        engine.put(116.405, 39.905, b"p1", false).unwrap();
        // Warm the cell, then write a second point into it.
        engine.get(116.405, 39.905).unwrap();
        assert_eq!(engine.cache_size(), 1);

        engine.put(116.4051, 39.9051, b"p2", false).unwrap();
        assert_eq!(engine.cache_size(), 1);
        assert_eq!(engine.get(116.4051, 39.9051).unwrap(), Some(b"p2".to_vec()));
    }

    #[test]
    fn cache_operations_track_residency() {
        let (_dir, engine) = test_engine(500);

        engine.put(116.405, 39.905, b"v", false).unwrap();
        let id = engine.cell_for(116.405, 39.905);

        engine.clear_cache();
        assert_eq!(engine.cache_size(), 0);

        engine.get(116.405, 39.905).unwrap();
        assert_eq!(engine.cache_size(), 1);

        let other: CellId = "G_050_030".parse().unwrap();
        engine.preload_cell(other).unwrap();
        assert_eq!(engine.cache_size(), 2);

        engine.evict_cell(&id);
        assert_eq!(engine.cache_size(), 1);

        engine.clear_cache();
        assert_eq!(engine.cache_size(), 0);
    }

    #[test]
    fn cache_capacity_bounds_resident_cells() {
        let (_dir, engine) = test_engine(2);

        // Three distinct cells.
        engine.get(116.005, 39.005).unwrap();
        engine.get(116.105, 39.105).unwrap();
        engine.get(116.205, 39.205).unwrap();
        assert_eq!(engine.cache_size(), 2);
    }

    #[test]
    fn zero_capacity_uses_the_default() {
        let (_dir, engine) = test_engine(0);
        engine.get(116.005, 39.005).unwrap();
        assert_eq!(engine.cache_size(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Batch writes
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn batch_put_aborts_before_any_write_on_bad_point() {
        let (_dir, engine) = test_engine(500);

        let points = vec![
            TerrainPoint::new(116.402, 39.901, "p1"),
            TerrainPoint::new(115.0, 39.901, "bad"),
        ];
        let result = engine.batch_put(&points);
        assert!(matches!(result, Err(TerrainError::OutOfBounds { .. })));

        assert_eq!(engine.get(116.402, 39.901).unwrap(), None);
    }

    #[test]
    fn batch_put_updates_resident_cells() {
        let (_dir, engine) = test_engine(500);

        // Make the target cell resident first.
        engine.get(116.402, 39.901).unwrap();

        engine
            .batch_put(&[TerrainPoint::new(116.402, 39.901, "p1")])
            .unwrap();

        assert_eq!(engine.cache_size(), 1);
        assert_eq!(engine.get(116.402, 39.901).unwrap(), Some(b"p1".to_vec()));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Range queries
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn range_query_results_match_with_and_without_cache() {
        let (_dir, engine) = test_engine(500);

        let points = vec![
            TerrainPoint::new(116.402, 39.901, "p1"),
            TerrainPoint::new(116.403, 39.902, "p2"),
            TerrainPoint::new(116.404, 39.903, "p3"),
            TerrainPoint::new(116.405, 39.904, "p4"),
            TerrainPoint::new(116.500, 40.000, "p5"),
        ];
        engine.batch_put(&points).unwrap();

        let rect = (116.401, 39.9005, 116.406, 39.905);

        engine.clear_cache();
        let cold = collect_range(&engine, rect);

        // Warm every covered cell, then ask again.
        for point in &points {
            engine.get(point.lon, point.lat).unwrap();
        }
        let warm = collect_range(&engine, rect);

        assert_eq!(cold.len(), 4);
        assert_eq!(cold, warm);
    }

    #[test]
    fn range_query_does_not_install_scanned_cells() {
        let (_dir, engine) = test_engine(500);

        engine.put(116.402, 39.901, b"p1", false).unwrap();
        engine.clear_cache();

        let mut count = 0;
        engine
            .range_query(116.4, 39.9005, 116.41, 39.902, |_, _, _| count += 1)
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(engine.cache_size(), 0);
    }

    #[test]
    fn range_query_skips_unparseable_keys() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("db"), StoreOptions::default()).unwrap();
        let engine = TerrainEngine::new(
            store.clone(),
            TerrainConfig::new(116.0, 39.0, 117.5, 41.0, 0.01),
        )
        .unwrap();

        engine.put(116.405, 39.905, b"good", false).unwrap();
        // A key inside the cell's range that no engine would write.
        store.put("G_090_040|bogus", b"junk", false).unwrap();

        let mut values = Vec::new();
        engine
            .range_query(116.40, 39.90, 116.41, 39.91, |_, _, v| {
                values.push(v.to_vec())
            })
            .unwrap();
        assert_eq!(values, vec![b"good".to_vec()]);
    }
}
