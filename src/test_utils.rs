//! Shared helpers for the test suites.

use std::sync::Once;

/// Installs a subscriber printing `TRELLIS_LOG`-filtered traces to
/// stderr. Safe to call from every test; only the first call wins.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("TRELLIS_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub(crate) mod detached_task {
    use crate::resource::ResourceUser;
    use crate::runtime::{Builder, Runtime};
    use crate::scheduler::SchedulerTag;
    use crate::task::{Task, TaskFlags};
    use std::any::Any;
    use std::sync::Arc;

    /// Builds `n` inert tasks that are never submitted nor executed —
    /// queue tests need real `Arc<Task>` values, nothing more. The
    /// runtime is returned so the tasks' context outlives them.
    pub(crate) fn many(n: usize) -> (Runtime, Vec<Arc<Task>>) {
        let rt = Builder::new()
            .worker_threads(1)
            .try_build()
            .expect("test runtime");
        let inner = &rt.inner;
        let sched = inner
            .shared
            .scheduler(SchedulerTag::DEFAULT)
            .expect("default scheduler")
            .clone();

        let tasks = (0..n)
            .map(|_| {
                Task::new(
                    inner.shared.next_task_id(),
                    None,
                    TaskFlags::empty(),
                    SchedulerTag::DEFAULT,
                    None,
                    ResourceUser::new(std::iter::empty(), 0),
                    Box::new(|| Box::new(()) as Box<dyn Any + Send>),
                    Arc::clone(&inner.root_space),
                    sched.clone(),
                    Arc::clone(&inner.shared),
                )
            })
            .collect();

        (rt, tasks)
    }
}
