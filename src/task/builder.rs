use crate::context;
use crate::resource::{ResourceAccess, ResourceUser};
use crate::runtime::RuntimeInner;
use crate::scheduler::SchedulerTag;
use crate::task::{Task, TaskFlags, TaskFuture};
use smallvec::SmallVec;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// Fluent construction of a task: declare accesses, tweak dispatch, then
/// `submit()` (or `get()` to submit and block on the result).
#[must_use = "a task builder does nothing until submitted"]
pub struct TaskBuilder<R> {
    inner: Arc<RuntimeInner>,
    tag: SchedulerTag,
    label: Option<String>,
    flags: TaskFlags,
    stream_index: Option<u32>,
    accesses: SmallVec<[ResourceAccess; 4]>,
    closure: Option<Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>>,
    _result: PhantomData<fn() -> R>,
}

impl<R: Send + 'static> TaskBuilder<R> {
    pub(crate) fn new<F>(inner: Arc<RuntimeInner>, f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        Self {
            inner,
            tag: SchedulerTag::DEFAULT,
            label: None,
            flags: TaskFlags::empty(),
            stream_index: None,
            accesses: SmallVec::new(),
            closure: Some(Box::new(move || Box::new(f()) as Box<dyn Any + Send>)),
            _result: PhantomData,
        }
    }

    /// Declares one resource access. The runtime serializes this task
    /// against every earlier task whose declared accesses conflict.
    pub fn resource(mut self, access: ResourceAccess) -> Self {
        self.accesses.push(access);
        self
    }

    /// Declares several accesses at once.
    pub fn resources(mut self, accesses: impl IntoIterator<Item = ResourceAccess>) -> Self {
        self.accesses.extend(accesses);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Routes the task to the scheduler registered under `tag`.
    pub fn scheduler_tag(mut self, tag: SchedulerTag) -> Self {
        self.tag = tag;
        self
    }

    /// Dispatch hint for stream-based sub-schedulers: which of their
    /// streams to enqueue onto.
    pub fn stream_index(mut self, index: u32) -> Self {
        self.stream_index = Some(index);
        self
    }

    /// Allows the task to block on events mid-closure. While blocked, the
    /// worker transfers to other ready work instead of sleeping.
    pub fn enable_stack_switching(mut self) -> Self {
        self.flags |= TaskFlags::STACK_SWITCHING;
        self
    }

    /// Places the task in the current task space, installs its
    /// dependencies, and hands it to its scheduler.
    ///
    /// # Panics
    ///
    /// After runtime shutdown, or when `tag` names no scheduler.
    pub fn submit(mut self) -> TaskFuture<R> {
        let inner = Arc::clone(&self.inner);
        assert!(
            !inner.shared.is_shutdown(),
            "task submitted after runtime shutdown"
        );

        let sched = inner
            .shared
            .scheduler(self.tag)
            .unwrap_or_else(|| panic!("no scheduler registered for {:?}", self.tag));

        let space = match context::current_task() {
            Some(current) => current.child_space(),
            None => Arc::clone(&inner.root_space),
        };

        let user = ResourceUser::new(self.accesses.drain(..), space.depth);
        let task = Task::new(
            inner.shared.next_task_id(),
            self.label.take(),
            self.flags,
            self.tag,
            self.stream_index,
            user,
            self.closure.take().expect("builder submitted twice"),
            Arc::clone(&space),
            Arc::clone(sched),
            Arc::clone(&inner.shared),
        );

        tracing::trace!(
            task = task.id,
            label = task.label(),
            scope = space.depth,
            "submit task"
        );

        space.submit(&task);
        sched.emplace_task(Arc::clone(&task));

        TaskFuture::new(task)
    }

    /// Submits and blocks on the result. Outside a task this parks the
    /// calling thread; inside a stack-switching task it transfers to
    /// other work.
    pub fn get(self) -> R {
        self.submit().get()
    }
}
