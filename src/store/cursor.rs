//! Forward, seekable cursor over the store's key space.

use sled::IVec;

use super::StoreError;

/// Seekable forward cursor over the full byte-lexicographic key order.
///
/// A new cursor is positioned at the first entry. After the last entry
/// (or on an empty store) the cursor is invalid; `key`/`value` return
/// `None` until it is re-seeked.
pub struct Cursor {
    db: sled::Db,
    iter: Option<sled::Iter>,
    current: Option<(IVec, IVec)>,
}

impl Cursor {
    pub(crate) fn new(db: sled::Db) -> Result<Self, StoreError> {
        let mut cursor = Self {
            db,
            iter: None,
            current: None,
        };
        cursor.seek_to_first()?;
        Ok(cursor)
    }

    /// Returns true while the cursor is positioned on an entry.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Key of the current entry, if valid.
    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_ref())
    }

    /// Value of the current entry, if valid.
    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_ref())
    }

    /// Advances to the next entry in key order.
    pub fn next(&mut self) -> Result<(), StoreError> {
        self.advance()
    }

    /// Positions the cursor on the first entry at or after `key`.
    pub fn seek(&mut self, key: impl AsRef<[u8]>) -> Result<(), StoreError> {
        self.iter = Some(self.db.range(key.as_ref().to_vec()..));
        self.advance()
    }

    /// Positions the cursor on the first entry of the store.
    pub fn seek_to_first(&mut self) -> Result<(), StoreError> {
        self.iter = Some(self.db.iter());
        self.advance()
    }

    /// Positions the cursor on the last entry of the store.
    ///
    /// Advancing past it invalidates the cursor; this remains a forward
    /// cursor.
    pub fn seek_to_last(&mut self) -> Result<(), StoreError> {
        self.current = self.db.last()?;
        self.iter = None;
        Ok(())
    }

    fn advance(&mut self) -> Result<(), StoreError> {
        self.current = match self.iter.as_mut().and_then(|iter| iter.next()) {
            Some(entry) => Some(entry?),
            None => None,
        };
        Ok(())
    }
}
