//! Terrain engine configuration, point records, and errors.

use thiserror::Error;

use crate::grid::GridError;
use crate::store::StoreError;

/// Fallback cache capacity (in cells) when the configured capacity is
/// zero.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// One geolocated sample: a coordinate and an opaque value.
///
/// The engine never interprets `value`; callers store whatever encoding
/// their elevation model uses.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainPoint {
    pub lon: f64,
    pub lat: f64,
    pub value: Vec<u8>,
}

impl TerrainPoint {
    /// Creates a point record.
    pub fn new(lon: f64, lat: f64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            lon,
            lat,
            value: value.into(),
        }
    }
}

/// Engine construction parameters, immutable after construction.
#[derive(Debug, Clone)]
pub struct TerrainConfig {
    /// Western edge of the managed region, degrees.
    pub min_lon: f64,
    /// Southern edge of the managed region, degrees.
    pub min_lat: f64,
    /// Eastern edge of the managed region, degrees.
    pub max_lon: f64,
    /// Northern edge of the managed region, degrees.
    pub max_lat: f64,
    /// Uniform cell size, degrees.
    pub cell_size_deg: f64,
    /// Cell cache capacity; zero falls back to
    /// [`DEFAULT_CACHE_CAPACITY`].
    pub cache_capacity: usize,
}

impl TerrainConfig {
    /// Creates a configuration with the default cache capacity.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64, cell_size_deg: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
            cell_size_deg,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Sets the cell cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

/// Errors surfaced by the terrain engine.
#[derive(Debug, Error)]
pub enum TerrainError {
    /// A write targeted a coordinate outside the engine bounds.
    ///
    /// Reads treat out-of-bounds as a normal absent result instead.
    #[error("coordinate ({lon}, {lat}) is outside the engine bounds")]
    OutOfBounds { lon: f64, lat: f64 },

    /// The configured bounds, cell size, or grid dimensions are invalid.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
