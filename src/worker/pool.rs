use crate::runtime::Shared;
use crate::task::Task;
use crate::util::AtomicBitfield;
use crate::worker::{self, Worker};
use crate::WorkerId;
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Busy,
    Available,
}

/// A block of workers on consecutive global ids, plus the shared state
/// probes need: one bit per worker, set while the worker considers
/// itself out of work.
pub(crate) struct WorkerPool {
    base_id: WorkerId,
    workers: Vec<Arc<Worker>>,
    /// Bit set = AVAILABLE. Probed by activation (find a free worker)
    /// and by thieves (find a busy victim).
    states: AtomicBitfield,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub(crate) fn new(base_id: WorkerId, n_workers: usize, shared: Arc<Shared>) -> Arc<Self> {
        assert!(n_workers > 0, "a worker pool needs at least one worker");
        let workers = (0..n_workers)
            .map(|i| Worker::new(base_id + i))
            .collect::<Vec<_>>();

        let pool = Arc::new(Self {
            base_id,
            workers,
            states: AtomicBitfield::new(n_workers, false),
            threads: Mutex::new(Vec::new()),
            shared,
        });

        for worker in pool.workers.iter() {
            worker.attach(&pool);
        }
        pool
    }

    pub(crate) fn base_id(&self) -> WorkerId {
        self.base_id
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn worker(&self, local: usize) -> &Arc<Worker> {
        &self.workers[local]
    }

    /// Spawns one named OS thread per worker.
    pub(crate) fn start(self: &Arc<Self>) {
        let mut threads = self.threads.lock();
        debug_assert!(threads.is_empty(), "worker pool started twice");

        for worker in self.workers.iter() {
            let worker = Arc::clone(worker);
            let pool = Arc::clone(self);

            let mut builder = thread::Builder::new().name(format!("trellis-worker-{}", worker.id));
            if let Some(stack_size) = self.shared.thread_stack_size {
                builder = builder.stack_size(stack_size);
            }

            let handle = builder
                .spawn(move || worker.work_loop(&pool))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
    }

    /// Wakes everyone and joins the threads. The shutdown flag must
    /// already be published.
    pub(crate) fn stop(&self) {
        debug_assert!(self.shared.is_shutdown());
        self.wake_all();

        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        if let Err(err) = join_all(handles) {
            tracing::error!(?err, "worker pool shutdown");
        }
    }

    pub(crate) fn wake_all(&self) {
        for worker in self.workers.iter() {
            worker.wake();
        }
    }

    /// Publishes a worker's state. Returns true when the state changed.
    pub(crate) fn set_state(&self, worker: WorkerId, state: WorkerState) -> bool {
        let available = state == WorkerState::Available;
        self.states.set(worker - self.base_id, available) != available
    }

    /// Probes for an AVAILABLE worker, starting just after `start_local`.
    pub(crate) fn find_available_worker(&self, start_local: usize) -> Option<usize> {
        self.states.probe(true, start_local, Some)
    }

    /// Nudges one AVAILABLE worker awake so it can come and steal.
    pub(crate) fn wake_one_available(&self, start_local: usize) -> bool {
        self.states
            .probe(true, start_local, |idx| self.workers[idx].wake().then_some(()))
            .is_some()
    }

    /// Two-phase steal on behalf of `thief`, probing BUSY victims
    /// starting at the thief's neighbor.
    ///
    /// Phase one takes a ready task; phase two adopts an uninitialized
    /// one, wiring its dependencies locally. An adopted task that comes
    /// out blocked stays with the thief's event graph and is dispatched
    /// by its followers later, so the steal still made progress.
    pub(crate) fn steal_task(&self, thief: &Worker) -> Option<Arc<Task>> {
        if let Some(task) = self.steal_ready(thief) {
            tracing::trace!(thief = thief.id, task = task.id, "steal ready");
            return Some(task);
        }

        if let Some(task) = self.steal_new(thief) {
            tracing::trace!(thief = thief.id, task = task.id, "steal new");
            if worker::init_dependencies(&task) {
                return Some(task);
            }
        }

        None
    }

    fn steal_ready(&self, thief: &Worker) -> Option<Arc<Task>> {
        self.states.probe(false, thief.id - self.base_id, |victim| {
            self.workers[victim]
                .pop_ready()
                // The thief's own queue may have filled while probing.
                .or_else(|| thief.pop_ready())
        })
    }

    fn steal_new(&self, thief: &Worker) -> Option<Arc<Task>> {
        self.states.probe(false, thief.id - self.base_id, |victim| {
            self.workers[victim]
                .pop_emplaced()
                .or_else(|| thief.pop_emplaced())
        })
    }
}

fn join_all(handles: Vec<thread::JoinHandle<()>>) -> Result<()> {
    let panicked = handles
        .into_iter()
        .map(|handle| handle.join())
        .filter(Result::is_err)
        .count();

    if panicked == 0 {
        Ok(())
    } else {
        Err(anyhow!("{panicked} worker thread(s) panicked"))
    }
}
