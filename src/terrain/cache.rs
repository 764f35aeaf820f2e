//! Whole-cell LRU cache for the terrain engine.
//!
//! The cache unit is the grid cell, not the point: a resident cell
//! holds the complete mapping from storage key to value for that cell,
//! so both point lookups and range scans inside it are memory-local.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::grid::CellId;

/// Complete contents of one grid cell at the moment of load.
///
/// Cells are shared (`Arc`) between the cache and in-flight callers;
/// writes that target a resident cell mutate the mapping in place. The
/// per-cell lock guarantees a reader holding the handle never observes
/// a torn update, and a handle stays readable after the cell is evicted
/// from the cache.
pub struct GridCell {
    id: CellId,
    points: RwLock<HashMap<String, Vec<u8>>>,
}

impl GridCell {
    /// Creates a cell populated with the given key/value mapping.
    pub fn with_points(id: CellId, points: HashMap<String, Vec<u8>>) -> Self {
        Self {
            id,
            points: RwLock::new(points),
        }
    }

    /// The cell this item describes.
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Looks up a point by its full storage key.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.points.read().unwrap().get(key).cloned()
    }

    /// Inserts or replaces a point in the mapping.
    pub fn insert(&self, key: String, value: Vec<u8>) {
        self.points.write().unwrap().insert(key, value);
    }

    /// Number of points currently held.
    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    /// Returns true when the cell holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.read().unwrap().is_empty()
    }

    /// Invokes `f(key, value)` for every point in the cell.
    ///
    /// Iteration order is unspecified. The per-cell read lock is held
    /// for the duration, so `f` is expected to be quick.
    pub fn for_each(&self, mut f: impl FnMut(&str, &[u8])) {
        for (key, value) in self.points.read().unwrap().iter() {
            f(key, value);
        }
    }
}

struct LruEntry {
    cell: Arc<GridCell>,
    touched: u64,
}

struct LruInner {
    entries: HashMap<CellId, LruEntry>,
    clock: u64,
}

/// Bounded mapping from cell id to resident cell, least-recently-used
/// eviction on overflow.
///
/// All operations serialise on one mutex; recency is a monotonic touch
/// counter and eviction scans for the minimum, which is trivial at the
/// cache's bounded size. Returned `Arc` handles outlive the lock.
pub struct GridLruCache {
    capacity: usize,
    inner: Mutex<LruInner>,
}

impl GridLruCache {
    /// Creates a cache holding at most `capacity` cells (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LruInner {
                entries: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Maximum number of resident cells.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the resident cell and promotes it to most recent.
    pub fn get(&self, id: &CellId) -> Option<Arc<GridCell>> {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;

        inner.entries.get_mut(id).map(|entry| {
            entry.touched = clock;
            Arc::clone(&entry.cell)
        })
    }

    /// Installs a cell, replacing any previous resident and evicting
    /// the least recently used cell on overflow. Installation counts as
    /// a touch.
    pub fn put(&self, id: CellId, cell: Arc<GridCell>) {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;

        if !inner.entries.contains_key(&id) && inner.entries.len() >= self.capacity {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(victim, _)| *victim);
            if let Some(victim) = victim {
                inner.entries.remove(&victim);
                debug!(cell = %victim, "evicted least recently used cell");
            }
        }

        inner.entries.insert(id, LruEntry { cell, touched: clock });
    }

    /// Drops a cell from the cache, if resident.
    pub fn remove(&self, id: &CellId) {
        self.inner.lock().unwrap().entries.remove(id);
    }

    /// Drops every resident cell.
    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    /// Number of resident cells.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Returns true when no cells are resident.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    /// Ids of the currently resident cells, in no particular order.
    #[cfg(test)]
    pub fn resident(&self) -> Vec<CellId> {
        self.inner.lock().unwrap().entries.keys().copied().collect()
    }
}
