//! Thread-local execution context: which worker this thread is, and
//! which task it is currently running.
//!
//! Both slots nest. A stack-switching task that transfers to other work
//! executes nested tasks on the same thread, so entering a task saves the
//! previous one and restores it on exit.

use crate::task::Task;
use crate::worker::Worker;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT_WORKER: RefCell<Option<Arc<Worker>>> = const { RefCell::new(None) };
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

pub(crate) fn current_worker() -> Option<Arc<Worker>> {
    CURRENT_WORKER.with(|slot| slot.borrow().clone())
}

pub(crate) fn current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|slot| slot.borrow().clone())
}

/// Depth of the space a task submitted right now would land in: 0 on the
/// root thread, one below the current task otherwise.
pub(crate) fn scope_depth() -> u16 {
    match current_task() {
        Some(task) => task.scope_depth() + 1,
        None => 0,
    }
}

pub(crate) fn enter_worker(worker: Arc<Worker>) -> WorkerGuard {
    let prev = CURRENT_WORKER.with(|slot| slot.borrow_mut().replace(worker));
    WorkerGuard { prev }
}

pub(crate) fn enter_task(task: Arc<Task>) -> TaskGuard {
    let prev = CURRENT_TASK.with(|slot| slot.borrow_mut().replace(task));
    TaskGuard { prev }
}

pub(crate) struct WorkerGuard {
    prev: Option<Arc<Worker>>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_WORKER.with(|slot| *slot.borrow_mut() = prev);
    }
}

pub(crate) struct TaskGuard {
    prev: Option<Arc<Task>>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_TASK.with(|slot| *slot.borrow_mut() = prev);
    }
}
