use crate::runtime::Shared;
use crate::task::Task;
use crate::TaskId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// A level in the tree of nested task scopes.
///
/// The space owns its live tasks (the registry keeps the only long-lived
/// strong reference; the destruction countdown removes it, which frees
/// the task). Emptying the root space wakes anyone blocked in
/// `barrier()`.
pub(crate) struct TaskSpace {
    pub(crate) depth: u16,
    parent: Option<Weak<Task>>,
    tasks: DashMap<TaskId, Arc<Task>>,
    // DashMap::len walks every shard, so the size is tracked separately.
    size: AtomicUsize,
    shared: Arc<Shared>,
}

impl TaskSpace {
    pub(crate) fn root(shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            depth: 0,
            parent: None,
            tasks: DashMap::new(),
            size: AtomicUsize::new(0),
            shared,
        })
    }

    pub(crate) fn child(parent: &Arc<Task>, shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            depth: parent.scope_depth + 1,
            parent: Some(Arc::downgrade(parent)),
            tasks: DashMap::new(),
            size: AtomicUsize::new(0),
            shared,
        })
    }

    pub(crate) fn parent_task(&self) -> Option<Arc<Task>> {
        self.parent.as_ref()?.upgrade()
    }

    pub(crate) fn is_parent(&self, task: &Arc<Task>) -> bool {
        match self.parent_task() {
            Some(parent) => Arc::ptr_eq(&parent, task),
            None => false,
        }
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.size.load(Ordering::Acquire) == 0
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Registers a freshly built task: pushes one user-list entry per
    /// unique resource (this fixes the task's position in emplacement
    /// order), stores the task, and chains the parent's post-event after
    /// this task's.
    ///
    /// Must run on the submitting thread so that user-list order equals
    /// program order.
    pub(crate) fn submit(self: &Arc<Self>, task: &Arc<Task>) {
        {
            let user = task.user.read();
            for unique in user.unique.iter() {
                let slot = unique.core.users.lock().push(Arc::downgrade(task));
                unique.set_slot(slot);
            }
        }

        self.size.fetch_add(1, Ordering::AcqRel);
        self.tasks.insert(task.id, Arc::clone(task));

        if let Some(parent) = self.parent_task() {
            debug_assert!(
                parent.user.read().is_superset_of(&task.user.read()),
                "child task accesses resources its parent did not declare"
            );
            // The parent retires only after all of its children do.
            task.post().add_follower(parent.post());
        }
    }

    /// Drops the registry entry. The last removal from the root space
    /// wakes the barrier.
    pub(crate) fn remove_task(&self, id: TaskId) {
        if self.tasks.remove(&id).is_some()
            && self.size.fetch_sub(1, Ordering::AcqRel) == 1
            && self.is_root()
        {
            self.shared.root_cv.notify();
        }
    }

    /// Used at shutdown to drop tasks that will never run.
    pub(crate) fn clear(&self) {
        self.tasks.clear();
        self.size.store(0, Ordering::Release);
    }
}
