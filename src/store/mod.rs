//! KV store façade over the embedded ordered key-value engine.
//!
//! Thin, typed access to one on-disk [`sled`] database: point reads and
//! writes, atomic batches, a seekable cursor, and callback-driven range
//! and prefix scans. Every byte of interpretation above "ordered keys
//! to opaque values" (grid keys, cell ranges) lives in the layers above.
//!
//! # Lifecycle
//!
//! The process normally owns a single store, opened once through
//! [`initialize`] and retrieved anywhere via [`handle`]; re-initialising
//! a live store is an error, and [`shutdown`] flushes and releases it.
//! Components that prefer explicit wiring (and tests) use
//! [`Store::open`] directly; a process-wide path registry refuses two
//! live stores over the same directory either way.

mod batch;
mod cursor;
mod error;

pub use batch::BatchWriter;
pub use cursor::Cursor;
pub use error::StoreError;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

/// Default cache budget for the embedded engine (100 MiB).
pub const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 100 * 1024 * 1024;

/// Default background flush interval in milliseconds.
pub const DEFAULT_FLUSH_EVERY_MS: u64 = 500;

/// Tuning options for the embedded engine, fixed at open time.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// In-memory cache budget in bytes.
    pub cache_capacity_bytes: u64,
    /// Background flush interval; `None` disables periodic flushing and
    /// leaves durability to `sync` writes and [`shutdown`].
    pub flush_every_ms: Option<u64>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: DEFAULT_CACHE_CAPACITY_BYTES,
            flush_every_ms: Some(DEFAULT_FLUSH_EVERY_MS),
        }
    }
}

impl StoreOptions {
    /// Sets the in-memory cache budget in bytes.
    pub fn with_cache_capacity_bytes(mut self, bytes: u64) -> Self {
        self.cache_capacity_bytes = bytes;
        self
    }

    /// Sets the background flush interval.
    pub fn with_flush_every_ms(mut self, interval: Option<u64>) -> Self {
        self.flush_every_ms = interval;
        self
    }
}

/// The process-wide store handle, when initialised.
static CURRENT: Mutex<Option<Store>> = Mutex::new(None);

/// Paths with a live store in this process.
static OPEN_PATHS: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

/// Handle to an open store.
///
/// Cheap to clone; all clones share the same underlying database. The
/// database closes when the last handle drops.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    db: sled::Db,
    path: PathBuf,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        OPEN_PATHS.lock().unwrap().remove(&self.path);
        debug!(path = %self.path.display(), "store closed");
    }
}

impl Store {
    /// Opens the database at `path`, creating it if missing.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyInitialized`] when a live handle in this
    /// process already owns the path; [`StoreError::Backend`] on engine
    /// failures.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if !OPEN_PATHS.lock().unwrap().insert(path.clone()) {
            return Err(StoreError::AlreadyInitialized(path));
        }

        let config = sled::Config::new()
            .path(&path)
            .cache_capacity(options.cache_capacity_bytes)
            .flush_every_ms(options.flush_every_ms);

        let db = match config.open() {
            Ok(db) => db,
            Err(e) => {
                OPEN_PATHS.lock().unwrap().remove(&path);
                return Err(e.into());
            }
        };

        info!(
            path = %path.display(),
            cache_capacity = options.cache_capacity_bytes,
            recovered = db.was_recovered(),
            "store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner { db, path }),
        })
    }

    pub(crate) fn db(&self) -> &sled::Db {
        &self.inner.db
    }

    /// The on-disk path of this store.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Writes `key` to `value`.
    ///
    /// With `sync` the write is flushed to stable storage before
    /// returning.
    pub fn put(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        sync: bool,
    ) -> Result<(), StoreError> {
        self.inner.db.insert(key.as_ref(), value.as_ref())?;
        if sync {
            self.inner.db.flush()?;
        }
        Ok(())
    }

    /// Reads the value stored under `key`, `None` when absent.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.db.get(key.as_ref())?.map(|v| v.to_vec()))
    }

    /// Deletes `key`. Deleting a missing key is success.
    pub fn delete(&self, key: impl AsRef<[u8]>, sync: bool) -> Result<(), StoreError> {
        self.inner.db.remove(key.as_ref())?;
        if sync {
            self.inner.db.flush()?;
        }
        Ok(())
    }

    /// Returns true when `key` has a stored value.
    pub fn exists(&self, key: impl AsRef<[u8]>) -> Result<bool, StoreError> {
        Ok(self.inner.db.contains_key(key.as_ref())?)
    }

    /// Creates an empty batch writer against this store.
    pub fn batch(&self) -> BatchWriter {
        BatchWriter::new(self.clone())
    }

    /// Creates a cursor positioned at the first entry.
    pub fn cursor(&self) -> Result<Cursor, StoreError> {
        Cursor::new(self.inner.db.clone())
    }

    /// Invokes `cb(key, value)` for every entry with key in byte-lex
    /// `[start, end)`. An empty `end` means open-ended.
    pub fn range_query(
        &self,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
        mut cb: impl FnMut(&[u8], &[u8]),
    ) -> Result<(), StoreError> {
        let start = start.as_ref().to_vec();
        let end = end.as_ref();

        let iter = if end.is_empty() {
            self.inner.db.range(start..)
        } else {
            self.inner.db.range(start..end.to_vec())
        };

        for entry in iter {
            let (k, v) = entry?;
            cb(&k, &v);
        }
        Ok(())
    }

    /// Invokes `cb(key, value)` for every entry whose key starts with
    /// `prefix`. An empty prefix scans the whole store.
    pub fn prefix_query(
        &self,
        prefix: impl AsRef<[u8]>,
        cb: impl FnMut(&[u8], &[u8]),
    ) -> Result<(), StoreError> {
        let prefix = prefix.as_ref();
        match prefix_upper_bound(prefix) {
            Some(end) => self.range_query(prefix, end, cb),
            None => self.range_query(prefix, "", cb),
        }
    }

    /// Hints the engine to compact `[start, end)`.
    ///
    /// sled compacts in the background on its own; the hint is honoured
    /// by flushing so the range's recent writes reach stable storage.
    pub fn compact_range(
        &self,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
    ) -> Result<(), StoreError> {
        debug!(
            start = %String::from_utf8_lossy(start.as_ref()),
            end = %String::from_utf8_lossy(end.as_ref()),
            "compaction hint"
        );
        self.inner.db.flush()?;
        Ok(())
    }

    /// Flushes all buffered writes to stable storage.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.inner.db.flush()?;
        Ok(())
    }

    /// Diagnostic summary of the store's state.
    pub fn stats(&self) -> String {
        let size = self.inner.db.size_on_disk().unwrap_or(0);
        format!(
            "path={} size_on_disk={}B recovered={}",
            self.inner.path.display(),
            size,
            self.inner.db.was_recovered()
        )
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .finish()
    }
}

/// Smallest byte string strictly greater than every key starting with
/// `prefix`, or `None` when no such bound exists (empty or all-0xFF).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last < 0xff {
            *end.last_mut().unwrap() = last + 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

/// Opens the process-wide store.
///
/// # Errors
///
/// [`StoreError::AlreadyInitialized`] when a process-wide store is
/// already live.
pub fn initialize(path: impl AsRef<Path>, options: StoreOptions) -> Result<Store, StoreError> {
    let mut current = CURRENT.lock().unwrap();
    if let Some(store) = current.as_ref() {
        return Err(StoreError::AlreadyInitialized(store.path().to_path_buf()));
    }

    let store = Store::open(path, options)?;
    *current = Some(store.clone());
    Ok(store)
}

/// Clones a handle to the process-wide store.
pub fn handle() -> Result<Store, StoreError> {
    CURRENT.lock().unwrap().clone().ok_or(StoreError::NotInitialized)
}

/// Returns true while the process-wide store is live.
pub fn is_initialized() -> bool {
    CURRENT.lock().unwrap().is_some()
}

/// Flushes and releases the process-wide store.
///
/// A no-op when no store is live. The database itself closes once the
/// last outstanding handle drops.
pub fn shutdown() -> Result<(), StoreError> {
    let store = CURRENT.lock().unwrap().take();
    if let Some(store) = store {
        store.flush()?;
        info!(path = %store.path().display(), "store shut down");
    }
    Ok(())
}
