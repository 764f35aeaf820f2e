//! Priority-driven adaptive worker pool.
//!
//! Multiplexes prioritised closures across a set of OS worker threads.
//! In [`PoolMode::Fixed`] the set has a constant size; in
//! [`PoolMode::Cached`] it grows toward `max_threads` under queue
//! pressure and a supervisor thread reaps workers that sat idle beyond
//! the timeout, back down to `min_threads`.
//!
//! # Scheduling
//!
//! Tasks dequeue strictly by [`Priority`]; between equal priorities the
//! order is unspecified. Tasks are independent: no dependencies, no
//! barriers beyond the submitter awaiting its [`TaskHandle`]. In-flight
//! tasks are never interrupted; shutdown cancels only what is still
//! queued.
//!
//! # Example
//!
//! ```ignore
//! use simterra::pool::{PoolConfig, Priority, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::default())?;
//! let handle = pool.submit_with_priority(Priority::High, || 2 + 2);
//! assert_eq!(handle?.wait()?, 4);
//! ```

mod config;
mod error;
mod handle;
mod task;

pub use config::{
    PoolConfig, PoolMode, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_TASKS, DEFAULT_MAX_THREADS,
};
pub use error::PoolError;
pub use handle::TaskHandle;
pub use task::Priority;

use task::TaskItem;

use std::collections::{BinaryHeap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

/// How long a full-queue submission waits for space before failing.
const SUBMIT_WAIT: Duration = Duration::from_secs(1);

/// Supervisor maintenance cadence in `Cached` mode.
const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(2);

/// Everything guarded by the pool's one mutex.
struct PoolState {
    queue: BinaryHeap<TaskItem>,
    workers: Vec<JoinHandle<()>>,
    /// Ids of workers that decided to exit on idle timeout and await
    /// joining by the supervisor (or shutdown).
    expired: HashSet<ThreadId>,
}

struct PoolShared {
    config: PoolConfig,
    /// Effective ceiling; `Fixed` mode pins it to `min_threads`.
    max_threads: usize,
    running: AtomicBool,
    state: Mutex<PoolState>,
    /// Signals "task available or state change" to workers and to
    /// submitters waiting for queue space.
    task_available: Condvar,
    worker_seq: AtomicUsize,
}

impl PoolShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns one worker and records its handle. Caller holds the lock.
    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) {
        let seq = self.worker_seq.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("pool-worker-{}", seq))
            .spawn(move || shared.worker_loop())
            .expect("failed to spawn pool worker thread");
        state.workers.push(handle);
    }

    fn worker_loop(self: Arc<Self>) {
        let mut last_active = Instant::now();

        loop {
            let mut state = self.state.lock().unwrap();

            match self.config.mode {
                PoolMode::Cached => {
                    while self.is_running() && state.queue.is_empty() {
                        let deadline = last_active + self.config.idle_timeout;
                        let now = Instant::now();
                        if now >= deadline {
                            // Only live workers count toward the floor;
                            // expired-but-unreaped ones are already gone.
                            let live = state.workers.len() - state.expired.len();
                            if live > self.config.min_threads {
                                let id = thread::current().id();
                                state.expired.insert(id);
                                debug!(thread = ?id, "idle worker expired");
                                return;
                            }
                            last_active = Instant::now();
                            continue;
                        }
                        let (guard, _timeout) = self
                            .task_available
                            .wait_timeout(state, deadline - now)
                            .unwrap();
                        state = guard;
                    }
                }
                PoolMode::Fixed => {
                    state = self
                        .task_available
                        .wait_while(state, |s| s.queue.is_empty() && self.is_running())
                        .unwrap();
                }
            }

            if !self.is_running() {
                return;
            }
            let Some(item) = state.queue.pop() else {
                continue;
            };
            last_active = Instant::now();
            drop(state);

            debug!(
                thread = ?thread::current().id(),
                priority = %item.priority,
                "task started"
            );
            (item.job)();
        }
    }

    /// True when the pool should grow: `Cached`, running, work queued,
    /// and headroom below the ceiling.
    fn should_expand(&self) -> bool {
        if self.config.mode != PoolMode::Cached || !self.is_running() {
            return false;
        }
        let state = self.state.lock().unwrap();
        !state.queue.is_empty() && state.workers.len() < self.max_threads
    }

    /// Adds `min(pending_tasks, headroom)` workers in one step.
    fn expand_workers(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        if !self.is_running() {
            return;
        }

        let room = self.max_threads.saturating_sub(state.workers.len());
        let needed = state.queue.len().min(room);
        for _ in 0..needed {
            self.spawn_worker(&mut state);
        }
        if needed > 0 {
            debug!(added = needed, workers = state.workers.len(), "expanded worker pool");
        }
    }

    /// Joins and removes expired workers, never dropping below
    /// `min_threads`. Joining happens outside the lock.
    fn reap_expired(&self) {
        let mut joinable = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if state.expired.is_empty() {
                return;
            }

            let min = self.config.min_threads;
            let mut index = 0;
            while index < state.workers.len() {
                if state.workers.len() <= min {
                    break;
                }
                let id = state.workers[index].thread().id();
                if state.expired.remove(&id) {
                    joinable.push(state.workers.swap_remove(index));
                } else {
                    index += 1;
                }
            }
        }

        if joinable.is_empty() {
            return;
        }
        let reaped = joinable.len();
        for handle in joinable {
            if let Err(e) = handle.join() {
                warn!(panic = ?e, "expired worker panicked");
            }
        }
        debug!(reaped, "reaped expired workers");
    }

    fn supervisor_loop(self: Arc<Self>, stop: mpsc::Receiver<()>) {
        debug!("pool supervisor started");
        loop {
            match stop.recv_timeout(SUPERVISOR_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            self.reap_expired();
            if self.should_expand() {
                self.expand_workers();
            }
        }
        debug!("pool supervisor stopped");
    }
}

/// The worker pool.
///
/// Dropping the pool shuts it down: queued tasks are cancelled, running
/// tasks finish, and every thread is joined.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    supervisor: Mutex<Option<(mpsc::Sender<()>, JoinHandle<()>)>>,
}

impl WorkerPool {
    /// Starts a pool with `min_threads` workers (plus the supervisor in
    /// `Cached` mode).
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        if config.min_threads == 0 {
            return Err(PoolError::InvalidConfig(
                "min_threads must be at least 1".to_string(),
            ));
        }
        if config.max_tasks == 0 {
            return Err(PoolError::InvalidConfig(
                "max_tasks must be at least 1".to_string(),
            ));
        }
        let max_threads = config.effective_max_threads();
        if max_threads < config.min_threads {
            return Err(PoolError::InvalidConfig(
                "max_threads must not be below min_threads".to_string(),
            ));
        }

        let shared = Arc::new(PoolShared {
            max_threads,
            running: AtomicBool::new(true),
            state: Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                workers: Vec::new(),
                expired: HashSet::new(),
            }),
            task_available: Condvar::new(),
            worker_seq: AtomicUsize::new(0),
            config,
        });

        {
            let mut state = shared.state.lock().unwrap();
            for _ in 0..shared.config.min_threads {
                shared.spawn_worker(&mut state);
            }
        }

        let supervisor = if shared.config.mode == PoolMode::Cached {
            let (stop_tx, stop_rx) = mpsc::channel();
            let supervisor_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name("pool-supervisor".to_string())
                .spawn(move || supervisor_shared.supervisor_loop(stop_rx))
                .expect("failed to spawn pool supervisor thread");
            Some((stop_tx, handle))
        } else {
            None
        };

        info!(
            min = shared.config.min_threads,
            max = shared.max_threads,
            mode = ?shared.config.mode,
            "worker pool started"
        );

        Ok(Self {
            shared,
            supervisor: Mutex::new(supervisor),
        })
    }

    /// Submits a task at [`Priority::Normal`].
    pub fn submit<T, F>(&self, f: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with_priority(Priority::Normal, f)
    }

    /// Submits a task at the given priority.
    ///
    /// Blocks up to one second for queue space when the queue is full.
    ///
    /// # Errors
    ///
    /// [`PoolError::Shutdown`] after [`shutdown`](Self::shutdown);
    /// [`PoolError::QueueFull`] when no space freed up in time.
    pub fn submit_with_priority<T, F>(
        &self,
        priority: Priority,
        f: F,
    ) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                let _ = tx.send(Ok(value));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    thread = ?thread::current().id(),
                    panic = %message,
                    "task panicked"
                );
                let _ = tx.send(Err(PoolError::TaskPanicked(message)));
            }
        });

        self.enqueue(TaskItem::new(priority, job))?;
        Ok(TaskHandle::new(rx))
    }

    fn enqueue(&self, item: TaskItem) -> Result<(), PoolError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().unwrap();

        if !shared.is_running() {
            return Err(PoolError::Shutdown);
        }

        if state.queue.len() >= shared.config.max_tasks {
            let (guard, _result) = shared
                .task_available
                .wait_timeout_while(state, SUBMIT_WAIT, |s| {
                    s.queue.len() >= shared.config.max_tasks && shared.is_running()
                })
                .unwrap();
            state = guard;

            if !shared.is_running() {
                return Err(PoolError::Shutdown);
            }
            if state.queue.len() >= shared.config.max_tasks {
                return Err(PoolError::QueueFull);
            }
        }

        state.queue.push(item);
        drop(state);
        // Wake all waiters: a submitter blocked on queue space shares
        // this condvar and must not swallow the signal meant for an
        // idle worker.
        shared.task_available.notify_all();

        if shared.should_expand() {
            shared.expand_workers();
        }
        Ok(())
    }

    /// Current number of worker threads (including any expired workers
    /// not yet reaped).
    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().unwrap().workers.len()
    }

    /// Number of tasks waiting in the queue.
    pub fn pending_tasks(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    /// Returns true until [`shutdown`](Self::shutdown) is invoked.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Stops the pool: wakes every waiter, stops and joins the
    /// supervisor, cancels queued tasks, and joins every worker.
    /// In-flight tasks run to completion. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("worker pool shutting down");
        self.shared.task_available.notify_all();

        if let Some((stop_tx, handle)) = self.supervisor.lock().unwrap().take() {
            let _ = stop_tx.send(());
            if let Err(e) = handle.join() {
                warn!(panic = ?e, "pool supervisor panicked");
            }
        }

        let (workers, dropped) = {
            let mut state = self.shared.state.lock().unwrap();
            state.expired.clear();
            let dropped = state.queue.len();
            // Dropping a queued task drops its result sender; the
            // submitter's handle resolves as cancelled.
            state.queue.clear();
            (std::mem::take(&mut state.workers), dropped)
        };
        if dropped > 0 {
            debug!(dropped, "queued tasks cancelled at shutdown");
        }

        for handle in workers {
            if let Err(e) = handle.join() {
                warn!(panic = ?e, "worker panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender};

    /// A task that reports when it starts running and then blocks until
    /// released, so tests can hold a worker busy deterministically.
    fn blocking_task(
        pool: &WorkerPool,
    ) -> (TaskHandle<()>, Sender<()>) {
        let (started_tx, started_rx): (Sender<()>, Receiver<()>) = mpsc::channel();
        let (gate_tx, gate_rx): (Sender<()>, Receiver<()>) = mpsc::channel();

        let handle = pool
            .submit(move || {
                started_tx.send(()).unwrap();
                let _ = gate_rx.recv();
            })
            .unwrap();

        started_rx.recv().unwrap();
        (handle, gate_tx)
    }

    #[test]
    fn submit_returns_the_task_result() {
        let pool = WorkerPool::new(PoolConfig::fixed(2)).unwrap();
        let handle = pool.submit(|| 2 + 2).unwrap();
        assert_eq!(handle.wait(), Ok(4));
    }

    #[test]
    fn many_tasks_all_complete() {
        let pool = WorkerPool::new(PoolConfig::fixed(4)).unwrap();

        let handles: Vec<_> = (0..64)
            .map(|i| pool.submit(move || i * 2).unwrap())
            .collect();

        let total: i32 = handles.into_iter().map(|h| h.wait().unwrap()).sum();
        assert_eq!(total, (0..64).map(|i| i * 2).sum());
    }

    #[test]
    fn queued_tasks_run_in_priority_order() {
        let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();
        let (blocker, gate) = blocking_task(&pool);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (priority, name) in [
            (Priority::Low, "low"),
            (Priority::Normal, "normal"),
            (Priority::High, "high"),
        ] {
            let order = Arc::clone(&order);
            handles.push(
                pool.submit_with_priority(priority, move || {
                    order.lock().unwrap().push(name);
                })
                .unwrap(),
            );
        }

        gate.send(()).unwrap();
        blocker.wait().unwrap();
        for handle in handles {
            handle.wait().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
    }

    #[test]
    fn full_queue_submission_times_out() {
        let pool = WorkerPool::new(PoolConfig::fixed(1).with_max_tasks(1)).unwrap();
        let (blocker, gate) = blocking_task(&pool);

        // Fills the queue behind the busy worker.
        let queued = pool.submit(|| ()).unwrap();

        let overflow = pool.submit(|| ());
        assert!(matches!(overflow, Err(PoolError::QueueFull)));

        gate.send(()).unwrap();
        blocker.wait().unwrap();
        queued.wait().unwrap();
    }

    #[test]
    fn shutdown_cancels_queued_tasks_and_rejects_submissions() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::fixed(1)).unwrap());
        let (blocker, gate) = blocking_task(&pool);

        let queued = pool.submit(|| 42).unwrap();

        // Shutdown joins the busy worker, so it must run on a separate
        // thread while we hold the worker at the gate.
        let shutdown_pool = Arc::clone(&pool);
        let shutdown_thread = thread::spawn(move || shutdown_pool.shutdown());

        // The queued task resolves as cancelled once the queue is
        // cleared, before the blocked worker finishes.
        assert_eq!(queued.wait(), Err(PoolError::Cancelled));
        assert!(matches!(pool.submit(|| ()), Err(PoolError::Shutdown)));

        gate.send(()).unwrap();
        blocker.wait().unwrap();
        shutdown_thread.join().unwrap();
        assert!(!pool.is_running());

        // Idempotent.
        pool.shutdown();
    }

    #[test]
    fn panicking_task_resolves_its_handle_and_spares_the_worker() {
        let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();

        let handle = pool.submit(|| panic!("boom")).unwrap();
        match handle.wait() {
            Err(PoolError::TaskPanicked(message)) => assert!(message.contains("boom")),
            other => panic!("expected TaskPanicked, got {:?}", other),
        }

        // The single worker survived and keeps serving tasks.
        let after = pool.submit(|| 5).unwrap();
        assert_eq!(after.wait(), Ok(5));
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(matches!(
            WorkerPool::new(PoolConfig::fixed(0)),
            Err(PoolError::InvalidConfig(_))
        ));
        assert!(matches!(
            WorkerPool::new(PoolConfig::fixed(1).with_max_tasks(0)),
            Err(PoolError::InvalidConfig(_))
        ));
        assert!(matches!(
            WorkerPool::new(
                PoolConfig::default()
                    .with_min_threads(4)
                    .with_max_threads(2)
            ),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn fixed_pool_never_grows() {
        let pool = WorkerPool::new(PoolConfig::fixed(2)).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                pool.submit(|| thread::sleep(Duration::from_millis(20)))
                    .unwrap()
            })
            .collect();

        assert_eq!(pool.worker_count(), 2);
        for handle in handles {
            handle.wait().unwrap();
        }
        assert_eq!(pool.worker_count(), 2);
    }

    #[test]
    fn cached_pool_expands_under_load_and_reaps_idle_workers() {
        let config = PoolConfig::default()
            .with_min_threads(2)
            .with_max_threads(4)
            .with_max_tasks(16)
            .with_idle_timeout(Duration::from_millis(200))
            .with_mode(PoolMode::Cached);
        let pool = WorkerPool::new(config).unwrap();
        assert_eq!(pool.worker_count(), 2);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                pool.submit(|| thread::sleep(Duration::from_millis(300)))
                    .unwrap()
            })
            .collect();

        // Expansion is evaluated on submission; the pool grows toward
        // its ceiling while the sleepers hold workers busy.
        let mut peak = pool.worker_count();
        for _ in 0..200 {
            peak = peak.max(pool.worker_count());
            if peak == 4 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(peak > 2, "pool should have expanded, peak was {}", peak);
        assert!(peak <= 4, "pool exceeded its ceiling, peak was {}", peak);

        for handle in handles {
            handle.wait().unwrap();
        }

        // Workers idle past the timeout expire; the supervisor reaps
        // them on its next pass, back down to min_threads.
        let mut count = pool.worker_count();
        for _ in 0..80 {
            count = pool.worker_count();
            if count <= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
        assert_eq!(count, 2, "idle workers were not reaped");
    }
}
