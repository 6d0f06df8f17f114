use crate::context;
use crate::runtime::Shared;
use crate::scheduler::Scheduler;
use crate::task::Task;
use crate::worker::pool::WorkerPool;
use crate::WorkerId;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round-robin emplacement over a pool of work-stealing workers.
///
/// Emplacement is biased to the submitting worker when the submitter is
/// itself one of this pool's workers: child tasks then start out on the
/// core whose caches already hold their inputs, and stealing evens out
/// the imbalance when it matters.
pub struct PoolScheduler {
    pool: Arc<WorkerPool>,
    next: AtomicUsize,
}

impl PoolScheduler {
    pub(crate) fn new(base_id: WorkerId, n_workers: usize, shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            pool: WorkerPool::new(base_id, n_workers, shared),
            next: AtomicUsize::new(0),
        })
    }

    fn select_worker(&self) -> usize {
        if let Some(worker) = context::current_worker() {
            let range = self.worker_range();
            if range.contains(&worker.id) {
                return worker.id - range.start;
            }
        }
        self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len()
    }
}

impl Scheduler for PoolScheduler {
    fn start(&self) {
        self.pool.start();
    }

    fn stop(&self) {
        self.pool.stop();
    }

    fn worker_range(&self) -> Range<WorkerId> {
        self.pool.base_id()..self.pool.base_id() + self.pool.len()
    }

    fn emplace_task(&self, task: Arc<Task>) {
        let local = self.select_worker();
        tracing::trace!(task = task.id, worker = self.pool.base_id() + local, "emplace");
        self.pool.worker(local).dispatch(task);
        // Idle neighbors come and steal if the target is backed up.
        self.pool.wake_one_available(local);
    }

    fn activate_task(&self, task: Arc<Task>) {
        // Prefer a worker that published AVAILABLE; otherwise spread.
        let local = self
            .pool
            .find_available_worker(self.select_worker())
            .unwrap_or_else(|| self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len());
        tracing::trace!(task = task.id, worker = self.pool.base_id() + local, "activate");
        self.pool.worker(local).push_ready(task);
    }

    fn wake(&self, worker: WorkerId) -> bool {
        let range = self.worker_range();
        debug_assert!(range.contains(&worker), "wake routed to wrong scheduler");
        self.pool.worker(worker - range.start).wake()
    }

    fn wake_all(&self) {
        self.pool.wake_all();
    }
}

impl fmt::Debug for PoolScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolScheduler")
            .field("workers", &self.worker_range())
            .finish()
    }
}
