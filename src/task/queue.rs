use crate::task::Task;
use crossbeam_queue::{ArrayQueue, SegQueue};
use std::sync::Arc;

/// Bounded fast path of each worker queue. Sized for a comfortable burst
/// of emplacements; overflow spills into the unbounded segment queue so
/// pushes never block and never fail.
pub(crate) const QUEUE_CAPACITY: usize = 128;

/// Lock-free MPMC task queue.
///
/// Dispatch order between the fast path and the spill is not strictly
/// FIFO; ordering between conflicting tasks comes from the event graph,
/// never from queue order.
pub(crate) struct TaskQueue {
    fast: ArrayQueue<Arc<Task>>,
    spill: SegQueue<Arc<Task>>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            fast: ArrayQueue::new(QUEUE_CAPACITY),
            spill: SegQueue::new(),
        }
    }

    pub(crate) fn push(&self, task: Arc<Task>) {
        if let Err(task) = self.fast.push(task) {
            self.spill.push(task);
        }
    }

    pub(crate) fn pop(&self) -> Option<Arc<Task>> {
        self.fast.pop().or_else(|| self.spill.pop())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fast.is_empty() && self.spill.is_empty()
    }
}
