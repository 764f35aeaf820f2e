//! Simterra - storage and execution cores for the simulation platform
//!
//! This library provides the two infrastructure cores shared by the
//! platform's services:
//!
//! - [`terrain`]: a grid-partitioned, cache-fronted storage engine for
//!   geolocated elevation samples, layered over the embedded key-value
//!   store behind the [`store`] façade.
//! - [`pool`]: a priority-driven worker pool with fixed or elastic
//!   sizing and cooperative shutdown.
//!
//! # High-Level API
//!
//! ```ignore
//! use simterra::store::{Store, StoreOptions};
//! use simterra::terrain::{TerrainConfig, TerrainEngine};
//!
//! let store = Store::open("/var/lib/simterra/terrain", StoreOptions::default())?;
//! let config = TerrainConfig::new(116.0, 39.0, 117.5, 41.0, 0.01);
//! let engine = TerrainEngine::new(store, config)?;
//!
//! engine.put(116.405285, 39.904989, b"43.5", false)?;
//! let sample = engine.get(116.405285, 39.904989)?;
//! ```

pub mod grid;
pub mod pool;
pub mod store;
pub mod terrain;

/// Version of the simterra library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
