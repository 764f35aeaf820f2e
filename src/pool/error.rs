//! Worker pool errors.

use thiserror::Error;

/// Errors surfaced by pool submission and result handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool has been shut down; no further submissions are accepted.
    #[error("worker pool is shut down")]
    Shutdown,

    /// The task queue stayed full for the whole bounded submission wait.
    #[error("task queue full, submission timed out")]
    QueueFull,

    /// The task was dropped before it produced a result, e.g. because
    /// the pool shut down with the task still queued.
    #[error("task was cancelled before completion")]
    Cancelled,

    /// The task panicked while executing; the payload is rendered here
    /// and the panic was logged by the worker.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// A bounded wait on a result handle elapsed first.
    #[error("timed out waiting for task result")]
    WaitTimeout,

    /// The pool configuration is unusable.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}
