use crate::runtime;
use crate::task::Task;
use std::marker::PhantomData;
use std::panic;
use std::sync::Arc;

/// Claim on a task's result, bound to its result-set event.
///
/// Dropping the future without calling [`get`](Self::get) is the
/// fire-and-forget mode: the claim is released (the result-get event
/// fires so the task can retire) and the task still runs.
pub struct TaskFuture<R> {
    task: Arc<Task>,
    taken: bool,
    _result: PhantomData<fn() -> R>,
}

impl<R: Send + 'static> TaskFuture<R> {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self {
            task,
            taken: false,
            _result: PhantomData,
        }
    }

    /// Whether the result is already computed.
    pub fn is_ready(&self) -> bool {
        self.task.result_set_event().is_reached()
    }

    /// Blocks until the task's result is set, then takes it.
    ///
    /// Called outside any task, this parks the calling thread on the root
    /// condition variable. Called inside a task, the task must have
    /// stack-switching enabled and the worker transfers to other work
    /// while waiting. A panic from the task's closure resurfaces here.
    pub fn get(mut self) -> R {
        runtime::yield_on(self.task.result_set());

        let result = self
            .task
            .result
            .lock()
            .take()
            .expect("task result taken twice");
        self.taken = true;
        self.task.result_get().notify(false);

        match result {
            Ok(value) => *value
                .downcast::<R>()
                .expect("task result type mismatch"),
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl<R> Drop for TaskFuture<R> {
    fn drop(&mut self) {
        if !self.taken {
            self.task.result_get().notify(false);
        }
    }
}
