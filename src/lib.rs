//! A task-graph runtime that orders user closures by their declared
//! resource accesses.
//!
//! Tasks declare, at submission, which resources they touch and how
//! (read, write, atomic-add, a sub-range of a field, ...). The runtime
//! derives precedence edges from those declarations, propagates readiness
//! through a graph of counted events, and dispatches ready tasks onto a
//! pool of work-stealing worker threads. Conflicting accesses never run
//! concurrently; everything else may.
//!
//! ```no_run
//! use trellis::init;
//!
//! let rt = init(4);
//! let a = rt.create_io_resource(0u64);
//!
//! let w = a.write();
//! let write_access = w.access();
//! rt.emplace_task(move || w.with_mut(|v| *v = 42))
//!     .resource(write_access)
//!     .submit();
//!
//! let r = a.read();
//! let read_access = r.access();
//! let got = rt
//!     .emplace_task(move || r.get())
//!     .resource(read_access)
//!     .submit()
//!     .get();
//! assert_eq!(got, 42);
//! ```

pub mod access;
pub mod resource;
pub mod runtime;
pub mod scheduler;
pub mod task;

pub(crate) mod context;
pub(crate) mod event;
pub(crate) mod graph;
pub(crate) mod sync;
pub(crate) mod util;
pub(crate) mod worker;

pub use runtime::{init, AccessPatch, Builder, EventHandle, Runtime, RuntimeHandle};
pub use task::{TaskBuilder, TaskFuture};

/// Global worker index. Workers of all schedulers share one id space so
/// that events can name their waker with a single integer.
pub type WorkerId = usize;

/// Monotonically assigned resource identifier.
pub type ResourceId = u32;

/// Monotonically assigned task identifier.
pub type TaskId = u64;

#[cfg(test)]
pub(crate) mod test_utils;
