//! Atomic multi-operation batches.

use super::{Store, StoreError};

/// Staged set of writes applied atomically on commit.
///
/// Readers observe either none or all of a committed batch. The writer
/// is reusable: a successful commit clears the staged operations, as
/// does [`clear`](Self::clear).
pub struct BatchWriter {
    store: Store,
    batch: sled::Batch,
    staged: usize,
}

impl BatchWriter {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            store,
            batch: sled::Batch::default(),
            staged: 0,
        }
    }

    /// Stages a write of `key` to `value`.
    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.batch.insert(key.as_ref(), value.as_ref());
        self.staged += 1;
    }

    /// Stages a deletion of `key`.
    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.batch.remove(key.as_ref());
        self.staged += 1;
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.staged
    }

    /// Returns true when no operations are staged.
    pub fn is_empty(&self) -> bool {
        self.staged == 0
    }

    /// Discards all staged operations without applying them.
    pub fn clear(&mut self) {
        self.batch = sled::Batch::default();
        self.staged = 0;
    }

    /// Applies all staged operations atomically.
    ///
    /// With `sync` the write is flushed to stable storage before
    /// returning. On success the writer is left empty.
    pub fn commit(&mut self, sync: bool) -> Result<(), StoreError> {
        let batch = std::mem::take(&mut self.batch);
        self.staged = 0;

        self.store.db().apply_batch(batch)?;
        if sync {
            self.store.db().flush()?;
        }
        Ok(())
    }
}
