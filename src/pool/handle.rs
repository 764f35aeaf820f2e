//! Result handles for submitted tasks.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use super::PoolError;

/// Handle to the eventual result of one submitted task.
///
/// The worker that runs the task sends exactly one outcome through the
/// backing channel: the closure's return value, or
/// [`PoolError::TaskPanicked`] when it panicked. If the task is dropped
/// unexecuted (pool shutdown with the task still queued), the channel
/// closes instead and the handle reads [`PoolError::Cancelled`].
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, PoolError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(rx: Receiver<Result<T, PoolError>>) -> Self {
        Self { rx }
    }

    /// Blocks until the task resolves and returns its outcome.
    pub fn wait(self) -> Result<T, PoolError> {
        match self.rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(PoolError::Cancelled),
        }
    }

    /// Blocks for at most `timeout`; [`PoolError::WaitTimeout`] when
    /// the task has not resolved in time. The handle stays usable for
    /// another wait.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, PoolError> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(PoolError::WaitTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(PoolError::Cancelled),
        }
    }
}
