//! Store façade errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the KV store façade.
///
/// "Not found" is never an error: lookups report it as `Ok(None)` /
/// `Ok(false)`, and deleting a missing key is idempotent success.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A handle was requested before the process-wide store was opened.
    #[error("store is not initialized")]
    NotInitialized,

    /// The process-wide store is already live, or another handle in
    /// this process already owns the same on-disk path.
    #[error("store already open at {}", .0.display())]
    AlreadyInitialized(PathBuf),

    /// The embedded engine reported a failure.
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
}
