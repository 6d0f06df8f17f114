//! Tasks: a closure, its declared resource accesses, and the events that
//! gate its start, completion, and result hand-off.

use crate::event::{Event, EventPtr, EventTag};
use crate::resource::ResourceUser;
use crate::runtime::Shared;
use crate::scheduler::{Scheduler, SchedulerTag};
use crate::task::space::TaskSpace;
use crate::TaskId;
use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

pub(crate) mod builder;
pub use builder::TaskBuilder;

pub(crate) mod future;
pub use future::TaskFuture;

pub(crate) mod queue;
pub(crate) mod space;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct TaskFlags: u8 {
        /// The task may block on events mid-closure; the worker then
        /// transfers to other work instead of sleeping.
        const STACK_SWITCHING = 1;
    }
}

/// Result slot contents: the closure's boxed return value, or the panic
/// payload when it unwound.
pub(crate) type TaskResult = std::thread::Result<Box<dyn Any + Send>>;

type TaskClosure = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>;

/// A unit of work plus the bookkeeping that orders it.
///
/// Tasks are owned by their space's registry and dropped when the
/// destruction countdown hits zero: once for the post-event reaching and
/// once for the result being taken (or given up).
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) label: Option<String>,
    pub(crate) flags: TaskFlags,
    pub(crate) tag: SchedulerTag,
    /// Scheduler-specific dispatch hint, e.g. which stream a tagged
    /// stream-scheduler should enqueue onto.
    pub(crate) stream_index: Option<u32>,
    pub(crate) scope_depth: u16,

    pub(crate) user: RwLock<ResourceUser>,

    closure: Mutex<Option<TaskClosure>>,
    pub(crate) result: Mutex<Option<TaskResult>>,

    pre_event: Event,
    post_event: Event,
    result_set_event: Event,
    result_get_event: Event,

    /// Post-event-reach and result-get-reach must both fire before the
    /// registry lets go of the task.
    destruction: AtomicU8,

    pub(crate) space: Arc<TaskSpace>,
    children: OnceLock<Arc<TaskSpace>>,

    sched: Arc<dyn Scheduler>,
    shared: Arc<Shared>,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TaskId,
        label: Option<String>,
        flags: TaskFlags,
        tag: SchedulerTag,
        stream_index: Option<u32>,
        user: ResourceUser,
        closure: TaskClosure,
        space: Arc<TaskSpace>,
        sched: Arc<dyn Scheduler>,
        shared: Arc<Shared>,
    ) -> Arc<Self> {
        let scope_depth = user.scope_depth;
        Arc::new(Self {
            id,
            label,
            flags,
            tag,
            stream_index,
            scope_depth,
            user: RwLock::new(user),
            closure: Mutex::new(Some(closure)),
            result: Mutex::new(None),
            pre_event: Event::new(),
            post_event: Event::new(),
            result_set_event: Event::new(),
            result_get_event: Event::new(),
            destruction: AtomicU8::new(2),
            space,
            children: OnceLock::new(),
            sched,
            shared,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn scope_depth(&self) -> u16 {
        self.scope_depth
    }

    /// The tag this task was routed through.
    pub fn scheduler_tag(&self) -> SchedulerTag {
        self.tag
    }

    /// Dispatch hint for stream-based schedulers.
    pub fn stream_index(&self) -> Option<u32> {
        self.stream_index
    }

    pub(crate) fn pre_event(&self) -> &Event {
        &self.pre_event
    }

    pub(crate) fn post_event(&self) -> &Event {
        &self.post_event
    }

    pub(crate) fn result_set_event(&self) -> &Event {
        &self.result_set_event
    }

    pub(crate) fn result_get_event(&self) -> &Event {
        &self.result_get_event
    }

    pub(crate) fn pre(self: &Arc<Self>) -> EventPtr {
        self.ptr(EventTag::Pre)
    }

    pub(crate) fn post(self: &Arc<Self>) -> EventPtr {
        self.ptr(EventTag::Post)
    }

    pub(crate) fn result_set(self: &Arc<Self>) -> EventPtr {
        self.ptr(EventTag::ResultSet)
    }

    pub(crate) fn result_get(self: &Arc<Self>) -> EventPtr {
        self.ptr(EventTag::ResultGet)
    }

    fn ptr(self: &Arc<Self>, tag: EventTag) -> EventPtr {
        EventPtr {
            task: Arc::clone(self),
            tag,
        }
    }

    pub(crate) fn sched(&self) -> &Arc<dyn Scheduler> {
        &self.sched
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn stack_switching(&self) -> bool {
        self.flags.contains(TaskFlags::STACK_SWITCHING)
    }

    /// The space new tasks submitted from inside this task land in,
    /// created on first use.
    pub(crate) fn child_space(self: &Arc<Self>) -> Arc<TaskSpace> {
        Arc::clone(
            self.children
                .get_or_init(|| TaskSpace::child(self, Arc::clone(&self.shared))),
        )
    }

    /// Runs the closure and publishes the result. A panicking closure is
    /// captured into the result slot; followers proceed regardless, the
    /// payload resurfaces at `TaskFuture::get`.
    pub(crate) fn run(self: &Arc<Self>) {
        let closure = self
            .closure
            .lock()
            .take()
            .expect("task executed more than once");
        let result = panic::catch_unwind(AssertUnwindSafe(closure));
        if result.is_err() {
            tracing::warn!(task = self.id, label = self.label(), "task closure panicked");
        }
        *self.result.lock() = Some(result);
        self.result_set().notify(false);
    }

    /// Removes this task from every unique resource's user list. Called
    /// exactly once, when the post-event reaches.
    pub(crate) fn remove_from_resources(&self) {
        let user = self.user.read();
        for unique in user.unique.iter() {
            let slot = unique.slot();
            if slot != crate::resource::SLOT_UNSET {
                unique.core.users.lock().remove(slot);
            }
        }
    }

    /// One step of the destruction countdown; the last step frees the
    /// task by dropping its registry entry.
    pub(crate) fn countdown(self: &Arc<Self>) {
        if self.destruction.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::trace!(task = self.id, "task retired");
            self.space.remove_task(self.id);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("scope_depth", &self.scope_depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::detached_task;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Task: Send, Sync);
    assert_impl_all!(TaskFlags: Send, Sync, Copy);

    #[test]
    fn metadata_accessors() {
        let (_rt, tasks) = detached_task::many(1);
        let task = &tasks[0];
        assert_eq!(task.label(), None);
        assert_eq!(task.scheduler_tag(), SchedulerTag::DEFAULT);
        assert_eq!(task.stream_index(), None);
        assert_eq!(task.scope_depth(), 0);
    }
}
