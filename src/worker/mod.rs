//! Worker threads: consume ready tasks, initialize emplaced ones, steal
//! when idle, and sleep when there is provably nothing to do.

use crate::context;
use crate::graph;
use crate::sync::CondVar;
use crate::task::queue::TaskQueue;
use crate::task::Task;
use crate::util::ScopeGuard;
use crate::worker::pool::{WorkerPool, WorkerState};
use crate::WorkerId;
use std::sync::{Arc, OnceLock, Weak};

pub(crate) mod pool;

/// Outcome of pulling one task from the emplacement queue.
enum Init {
    /// The task's pre-event hit ready during initialization; the
    /// initializing worker executes it in place.
    Ready(Arc<Task>),
    /// The task is blocked on predecessors; its followers will dispatch
    /// it later.
    Blocked,
    Empty,
}

pub(crate) struct Worker {
    /// Global id, unique across all schedulers.
    pub(crate) id: WorkerId,
    /// Freshly submitted tasks, dependencies not wired yet.
    emplacement_queue: TaskQueue,
    /// Tasks whose pre-event reached ready.
    ready_queue: TaskQueue,
    pub(crate) cv: CondVar,
    pool: OnceLock<Weak<WorkerPool>>,
}

impl Worker {
    pub(crate) fn new(id: WorkerId) -> Arc<Self> {
        Arc::new(Self {
            id,
            emplacement_queue: TaskQueue::new(),
            ready_queue: TaskQueue::new(),
            cv: CondVar::new(),
            pool: OnceLock::new(),
        })
    }

    pub(crate) fn attach(&self, pool: &Arc<WorkerPool>) {
        self.pool
            .set(Arc::downgrade(pool))
            .unwrap_or_else(|_| unreachable!("worker attached twice"));
    }

    pub(crate) fn pool(&self) -> Arc<WorkerPool> {
        self.pool
            .get()
            .and_then(Weak::upgrade)
            .expect("worker outlived its pool")
    }

    /// Hands the worker a new, uninitialized task.
    pub(crate) fn dispatch(&self, task: Arc<Task>) {
        self.emplacement_queue.push(task);
        self.wake();
    }

    /// Hands the worker a ready task.
    pub(crate) fn push_ready(&self, task: Arc<Task>) {
        self.ready_queue.push(task);
        self.wake();
    }

    pub(crate) fn wake(&self) -> bool {
        self.cv.notify()
    }

    pub(crate) fn pop_ready(&self) -> Option<Arc<Task>> {
        self.ready_queue.pop()
    }

    pub(crate) fn pop_emplaced(&self) -> Option<Arc<Task>> {
        self.emplacement_queue.pop()
    }

    /// Finds the next task to execute: ready queue first, then
    /// initialize emplaced tasks until one comes out ready, then steal.
    pub(crate) fn gather_task(&self) -> Option<Arc<Task>> {
        if let Some(task) = self.ready_queue.pop() {
            return Some(task);
        }

        loop {
            match self.init_one() {
                Init::Ready(task) => return Some(task),
                Init::Blocked => continue,
                Init::Empty => break,
            }
        }

        self.pool().steal_task(self)
    }

    fn init_one(&self) -> Init {
        let Some(task) = self.emplacement_queue.pop() else {
            return Init::Empty;
        };
        if init_dependencies(&task) {
            Init::Ready(task)
        } else {
            Init::Blocked
        }
    }

    /// The thread body: run tasks until shutdown, parking between bursts.
    pub(crate) fn work_loop(self: &Arc<Self>, pool: &Arc<WorkerPool>) {
        let _ctx = context::enter_worker(Arc::clone(self));
        tracing::debug!(worker = self.id, "worker started");

        while !pool.shared().is_shutdown() {
            if let Some(task) = self.gather_task() {
                pool.set_state(self.id, WorkerState::Busy);
                execute(&task);
            } else {
                self.idle_wait(pool);
            }
        }

        tracing::debug!(worker = self.id, "worker stopped");
    }

    /// Publishes AVAILABLE and parks. The edge-triggered condvar absorbs
    /// any wake that raced the publish, so no task is stranded.
    pub(crate) fn idle_wait(&self, pool: &Arc<WorkerPool>) {
        pool.set_state(self.id, WorkerState::Available);
        let restore = ScopeGuard::new(|| {
            pool.set_state(self.id, WorkerState::Busy);
        });
        if !pool.shared().is_shutdown() {
            self.cv.wait();
        }
        drop(restore);
    }
}

/// Wires a freshly popped emplacement-queue task into the event graph.
///
/// The extra `up()` before the walk keeps the pre-event blocked while
/// edges are installed: predecessors completing mid-walk can then never
/// drive it to zero and dispatch the task twice. The closing
/// `notify(claimed = true)` releases the claim and reports readiness.
pub(crate) fn init_dependencies(task: &Arc<Task>) -> bool {
    task.pre_event().up();
    graph::init_graph(task);
    task.pre().notify(true)
}

/// Runs a task on the current thread.
///
/// Notification order is part of the contract: the closure first, then
/// the pre-event's final transition (releasing pre-type followers once
/// the work is in flight), then the post-event, which retires the task
/// when its children and external events allow.
pub(crate) fn execute(task: &Arc<Task>) {
    tracing::trace!(task = task.id, label = task.label(), "execute");
    debug_assert!(task.pre_event().is_ready(), "executing a blocked task");
    let guard = context::enter_task(Arc::clone(task));
    task.run();
    drop(guard);

    task.pre().notify(true);
    task.post().notify(false);
}
