//! Runtime construction and the root-thread surface: building worker
//! pools, submitting tasks, blocking on results, and tearing everything
//! down in order.

use crate::access::AccessPolicy;
use crate::context;
use crate::event::{Event, EventPtr, EventTag, WAKER_ROOT};
use crate::resource::{FieldResource, IoResource, Resource, ResourceAccess};
use crate::scheduler::{PoolScheduler, Scheduler, SchedulerTag};
use crate::sync::CondVar;
use crate::task::space::TaskSpace;
use crate::task::TaskBuilder;
use crate::worker;
use crate::{TaskId, WorkerId};
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

#[cfg(test)]
mod tests;

/// State every component can reach: the shutdown latch, the root
/// condition variable, the scheduler table, and the id fountains.
pub(crate) struct Shared {
    shutdown: AtomicBool,
    pub(crate) root_cv: CondVar,
    pub(crate) thread_stack_size: Option<usize>,
    schedulers: OnceLock<Vec<(SchedulerTag, Arc<dyn Scheduler>)>>,
    next_task_id: AtomicU64,
}

impl Shared {
    fn new(thread_stack_size: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            shutdown: AtomicBool::new(false),
            root_cv: CondVar::new(),
            thread_stack_size,
            schedulers: OnceLock::new(),
            next_task_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Latches shutdown; returns true when this call flipped it.
    fn begin_shutdown(&self) -> bool {
        !self.shutdown.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    fn schedulers(&self) -> &[(SchedulerTag, Arc<dyn Scheduler>)] {
        self.schedulers.get().expect("schedulers not installed")
    }

    pub(crate) fn scheduler(&self, tag: SchedulerTag) -> Option<&Arc<dyn Scheduler>> {
        self.schedulers()
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, s)| s)
    }

    fn scheduler_for_worker(&self, worker: WorkerId) -> Option<&Arc<dyn Scheduler>> {
        self.schedulers()
            .iter()
            .find(|(_, s)| s.worker_range().contains(&worker))
            .map(|(_, s)| s)
    }

    /// Cross-scheduler wake: events record a single waker id, this routes
    /// it to the owning scheduler (or to the root thread).
    pub(crate) fn wake(&self, waker: i64) {
        if waker == WAKER_ROOT {
            self.root_cv.notify();
        } else if waker >= 0 {
            let worker = waker as WorkerId;
            if let Some(sched) = self.scheduler_for_worker(worker) {
                sched.wake(worker);
            }
        }
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) shared: Arc<Shared>,
    pub(crate) root_space: Arc<TaskSpace>,
}

/// Configures and builds a [`Runtime`].
///
/// The default scheduler gets `worker_threads` workers (one per CPU when
/// unset). Additional tagged pools can be registered for routing
/// specialized work, e.g. a single-threaded transport pool.
#[derive(Debug)]
pub struct Builder {
    worker_threads: Option<usize>,
    thread_stack_size: Option<usize>,
    extra_pools: Vec<(SchedulerTag, usize)>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_stack_size: None,
            extra_pools: Vec::new(),
        }
    }

    /// Worker count of the default scheduler.
    ///
    /// # Panics
    ///
    /// When `n` is zero.
    #[track_caller]
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be greater than 0");
        self.worker_threads = Some(n);
        self
    }

    /// Stack size for spawned worker threads; platform default when
    /// unset.
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Registers an additional scheduler pool under `tag`, with its own
    /// workers on the next free worker ids.
    pub fn scheduler_pool(mut self, tag: SchedulerTag, n_workers: usize) -> Self {
        self.extra_pools.push((tag, n_workers));
        self
    }

    /// Builds the runtime and starts its workers.
    pub fn try_build(self) -> Result<Runtime> {
        let default_workers = match self.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let mut pools = vec![(SchedulerTag::DEFAULT, default_workers)];
        pools.extend(self.extra_pools.iter().copied());

        for (i, (tag, n)) in pools.iter().enumerate() {
            if *n == 0 {
                return Err(anyhow!("scheduler pool {tag:?} has no workers"));
            }
            if pools[..i].iter().any(|(t, _)| t == tag) {
                return Err(anyhow!("duplicate scheduler tag {tag:?}"));
            }
        }

        let shared = Shared::new(self.thread_stack_size);

        let mut schedulers: Vec<(SchedulerTag, Arc<dyn Scheduler>)> = Vec::new();
        let mut base_id = 0;
        for (tag, n_workers) in pools {
            let sched: Arc<dyn Scheduler> =
                PoolScheduler::new(base_id, n_workers, Arc::clone(&shared));
            schedulers.push((tag, sched));
            base_id += n_workers;
        }
        shared
            .schedulers
            .set(schedulers)
            .unwrap_or_else(|_| unreachable!("schedulers installed twice"));

        let inner = Arc::new(RuntimeInner {
            root_space: TaskSpace::root(Arc::clone(&shared)),
            shared,
        });

        for (_, sched) in inner.shared.schedulers() {
            sched.start();
        }
        tracing::debug!(workers = base_id, "runtime started");

        Ok(Runtime { inner })
    }
}

/// Builds a runtime with `n_workers` default-scheduler workers.
///
/// # Panics
///
/// When construction fails (e.g. `n_workers` is zero).
pub fn init(n_workers: usize) -> Runtime {
    Builder::new()
        .worker_threads(n_workers)
        .try_build()
        .expect("runtime construction failed")
}

/// The owning handle. Dropping it drains the root space (`barrier`),
/// stops every scheduler, and joins the worker threads.
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// A cheap clonable handle for submitting from inside task closures.
    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Starts building a task around `f`. The closure runs once all
    /// declared conflicting predecessors allow it.
    pub fn emplace_task<F, R>(&self, f: F) -> TaskBuilder<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        TaskBuilder::new(Arc::clone(&self.inner), f)
    }

    /// Blocks the calling thread until every submitted task has been
    /// freed.
    pub fn barrier(&self) {
        self.inner.barrier();
    }

    /// Depth of the space a task submitted right now would land in.
    pub fn scope_depth(&self) -> u16 {
        context::scope_depth()
    }

    /// A fresh resource guarded by access mode `P`.
    pub fn create_resource<P: AccessPolicy>(&self) -> Resource<P> {
        Resource::new()
    }

    /// A fresh value-carrying resource with read/write/atomic accessors.
    pub fn create_io_resource<T: Send + 'static>(&self, value: T) -> IoResource<T> {
        IoResource::new(value)
    }

    /// A fresh shaped field with sub-region accessors.
    pub fn create_field<T, const DIM: usize>(
        &self,
        shape: [usize; DIM],
        fill: T,
    ) -> FieldResource<T, DIM>
    where
        T: Clone + Send + 'static,
    {
        FieldResource::new(shape, fill)
    }

    /// The scheduler registered under `tag`.
    pub fn scheduler(&self, tag: SchedulerTag) -> Option<Arc<dyn Scheduler>> {
        self.inner.shared.scheduler(tag).cloned()
    }

    /// Applies `patch` to the currently running task's access set.
    ///
    /// # Panics
    ///
    /// Outside a running task; when the patch removes accesses; when an
    /// added access is not covered by the initially declared set.
    pub fn update_properties(&self, patch: AccessPatch) {
        update_properties(patch)
    }

    /// An externally completed event the current task's post-event waits
    /// on, or `None` outside a task.
    pub fn create_event(&self) -> Option<EventHandle> {
        create_event()
    }

    fn shutdown(&self) {
        self.inner.barrier();
        if self.inner.shared.begin_shutdown() {
            tracing::debug!("runtime shutdown");
            for (_, sched) in self.inner.shared.schedulers() {
                sched.stop();
            }
            self.inner.root_space.clear();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Clonable submission handle; everything but shutdown.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

impl RuntimeHandle {
    pub fn emplace_task<F, R>(&self, f: F) -> TaskBuilder<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        TaskBuilder::new(Arc::clone(&self.inner), f)
    }

    pub fn scope_depth(&self) -> u16 {
        context::scope_depth()
    }

    pub fn create_resource<P: AccessPolicy>(&self) -> Resource<P> {
        Resource::new()
    }

    pub fn create_io_resource<T: Send + 'static>(&self, value: T) -> IoResource<T> {
        IoResource::new(value)
    }

    pub fn create_field<T, const DIM: usize>(
        &self,
        shape: [usize; DIM],
        fill: T,
    ) -> FieldResource<T, DIM>
    where
        T: Clone + Send + 'static,
    {
        FieldResource::new(shape, fill)
    }

    pub fn scheduler(&self, tag: SchedulerTag) -> Option<Arc<dyn Scheduler>> {
        self.inner.shared.scheduler(tag).cloned()
    }

    pub fn update_properties(&self, patch: AccessPatch) {
        update_properties(patch)
    }

    pub fn create_event(&self) -> Option<EventHandle> {
        create_event()
    }
}

impl RuntimeInner {
    pub(crate) fn barrier(&self) {
        assert!(
            context::current_task().is_none(),
            "barrier() must be called from outside tasks"
        );
        while !self.root_space.is_empty() {
            self.shared.root_cv.wait();
        }
    }
}

/// Blocks until `event` is reached.
///
/// On the root thread this parks on the root condition variable. Inside
/// a task it requires stack-switching: the task's frame stays put while
/// the worker's gather loop runs other tasks, so the worker never idles
/// while the wait is pending.
pub(crate) fn yield_on(event: EventPtr) {
    if event.event().is_reached() {
        return;
    }

    match context::current_task() {
        Some(task) => {
            assert!(
                task.stack_switching(),
                "blocking on an event inside a task requires enable_stack_switching()"
            );
            let current = context::current_worker().expect("running task outside a worker");
            event.event().set_worker_waker(current.id);
            while !event.event().is_reached() {
                match current.gather_task() {
                    Some(next) => worker::execute(&next),
                    None => current.idle_wait(&current.pool()),
                }
            }
        }
        None => {
            event.event().set_waker(WAKER_ROOT);
            let shared = Arc::clone(event.task.shared());
            while !event.event().is_reached() {
                shared.root_cv.wait();
            }
        }
    }
}

/// A set of additions (and rejected removals) to a running task's
/// declared accesses.
#[derive(Default)]
#[must_use = "a patch does nothing until passed to update_properties"]
pub struct AccessPatch {
    add: Vec<ResourceAccess>,
    remove: Vec<ResourceAccess>,
}

impl AccessPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, access: ResourceAccess) -> Self {
        self.add.push(access);
        self
    }

    pub fn remove(mut self, access: ResourceAccess) -> Self {
        self.remove.push(access);
        self
    }
}

fn update_properties(patch: AccessPatch) {
    let task = context::current_task()
        .expect("update_properties() must be called from inside a running task");

    // Dependency walks on other workers assume a task's user lists only
    // grow while it lives; narrowing mid-flight could un-order a
    // successor that already saw the wider set.
    assert!(
        patch.remove.is_empty(),
        "removing accesses from a running task is not supported"
    );

    let mut user = task.user.write();
    let before = user.snapshot();
    for access in patch.add {
        user.add_access(access);
    }
    assert!(
        before.is_superset_of(&user),
        "patched access set exceeds the initially declared accesses"
    );
}

/// Completion handle returned by `create_event`.
///
/// The owning task's post-event waits for [`reach`](Self::reach); a
/// handle that is dropped without reaching leaves the task permanently
/// unretired.
pub struct EventHandle {
    ptr: EventPtr,
}

impl EventHandle {
    /// Marks the event reached, releasing the owning task's post-event
    /// (and with it the barrier and any successors).
    pub fn reach(self) {
        self.ptr.notify(false);
    }
}

fn create_event() -> Option<EventHandle> {
    let task = context::current_task()?;
    let ptr = EventPtr {
        task: Arc::clone(&task),
        tag: EventTag::External(Arc::new(Event::new())),
    };
    ptr.add_follower(task.post());
    Some(EventHandle { ptr })
}
