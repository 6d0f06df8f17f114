//! Resources and access handles.
//!
//! A resource is a named logical datum protected by the access algebra,
//! not necessarily the physical data. Each resource owns the list of
//! tasks currently declaring an access to it (the "user list"); the
//! dependency builder walks that list to find predecessors, and retiring
//! tasks remove themselves from it exactly once.

use crate::access::AccessPolicy;
use crate::context;
use crate::task::Task;
use crate::ResourceId;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

pub(crate) mod user;
pub use user::ResourceUser;

pub(crate) mod shared;
pub use shared::{
    FieldGuard, FieldGuardMut, FieldResource, IoGuard, IoGuardAtomic, IoGuardMut, IoResource,
};

/// Errors surfaced at access-construction time.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("axis {axis}: region {lo}..{hi} exceeds field extent {extent}")]
    OutOfRange {
        axis: usize,
        lo: usize,
        hi: usize,
        extent: usize,
    },
}

static NEXT_RESOURCE_ID: AtomicU32 = AtomicU32::new(0);

/// Sentinel for a user-list slot that has not been assigned yet.
pub(crate) const SLOT_UNSET: usize = usize::MAX;

/// The part of a resource every access handle shares: its identity, the
/// scope it was created in, and its concurrent user list.
pub(crate) struct ResourceCore {
    pub(crate) id: ResourceId,
    pub(crate) scope_level: u16,
    pub(crate) users: Mutex<UserList>,
}

impl ResourceCore {
    fn new(scope_level: u16) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
            scope_level,
            users: Mutex::new(UserList::default()),
        })
    }
}

/// Append-only bag of the tasks currently using a resource, with logical
/// erase. Slots stay stable for the lifetime of their entry so a task can
/// remove itself in O(1); trailing holes are reclaimed eagerly.
#[derive(Default)]
pub(crate) struct UserList {
    entries: Vec<Option<Weak<Task>>>,
}

impl UserList {
    pub(crate) fn push(&mut self, task: Weak<Task>) -> usize {
        self.entries.push(Some(task));
        self.entries.len() - 1
    }

    pub(crate) fn remove(&mut self, slot: usize) {
        debug_assert!(self.entries[slot].is_some(), "user removed twice");
        self.entries[slot] = None;
        while matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }
    }

    /// Iterates the users older than `slot`, newest first.
    pub(crate) fn iter_below(&self, slot: usize) -> impl Iterator<Item = Arc<Task>> + '_ {
        let upper = slot.min(self.entries.len());
        (0..upper)
            .rev()
            .filter_map(move |i| self.entries[i].as_ref()?.upgrade())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/// A typed resource handle. Copies refer to the same resource.
pub struct Resource<P: AccessPolicy> {
    core: Arc<ResourceCore>,
    _policy: std::marker::PhantomData<P>,
}

impl<P: AccessPolicy> Clone for Resource<P> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _policy: std::marker::PhantomData,
        }
    }
}

impl<P: AccessPolicy> Default for Resource<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: AccessPolicy> Resource<P> {
    /// Creates a fresh resource with an unused id. The scope level is
    /// captured from the calling context: resources made inside a running
    /// task belong to that task's scope.
    pub fn new() -> Self {
        Self::with_scope(context::scope_depth())
    }

    pub(crate) fn with_scope(scope_level: u16) -> Self {
        Self {
            core: ResourceCore::new(scope_level),
            _policy: std::marker::PhantomData,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.core.id
    }

    /// Builds the concrete access descriptor used when declaring this
    /// resource on a task.
    pub fn access(&self, policy: P) -> ResourceAccess {
        ResourceAccess {
            inner: Arc::new(TypedAccess {
                core: Arc::clone(&self.core),
                policy,
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<ResourceCore> {
        &self.core
    }
}

/// Object-safe face of a typed access descriptor. Mode-type mismatches
/// compare as not-serial and not-superset.
trait DynAccess: Send + Sync {
    fn core(&self) -> &Arc<ResourceCore>;
    fn is_serial(&self, other: &dyn DynAccess) -> bool;
    fn is_superset_of(&self, other: &dyn DynAccess) -> bool;
    fn is_synchronizing(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn fmt_mode(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

struct TypedAccess<P: AccessPolicy> {
    core: Arc<ResourceCore>,
    policy: P,
}

impl<P: AccessPolicy> DynAccess for TypedAccess<P> {
    fn core(&self) -> &Arc<ResourceCore> {
        &self.core
    }

    fn is_serial(&self, other: &dyn DynAccess) -> bool {
        match other.as_any().downcast_ref::<TypedAccess<P>>() {
            Some(o) => self.core.id == o.core.id && P::is_serial(&self.policy, &o.policy),
            None => false,
        }
    }

    fn is_superset_of(&self, other: &dyn DynAccess) -> bool {
        match other.as_any().downcast_ref::<TypedAccess<P>>() {
            Some(o) => self.core.id == o.core.id && self.policy.is_superset_of(&o.policy),
            None => false,
        }
    }

    fn is_synchronizing(&self) -> bool {
        self.policy.is_synchronizing()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn fmt_mode(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.policy)
    }
}

/// A type-erased (resource, mode) pair: what tasks actually carry.
#[derive(Clone)]
pub struct ResourceAccess {
    inner: Arc<dyn DynAccess>,
}

impl ResourceAccess {
    pub fn resource_id(&self) -> ResourceId {
        self.inner.core().id
    }

    pub fn scope_level(&self) -> u16 {
        self.inner.core().scope_level
    }

    pub fn is_serial(a: &Self, b: &Self) -> bool {
        a.inner.is_serial(&*b.inner)
    }

    pub fn is_superset_of(&self, other: &Self) -> bool {
        self.inner.is_superset_of(&*other.inner)
    }

    pub fn is_synchronizing(&self) -> bool {
        self.inner.is_synchronizing()
    }

    pub(crate) fn core(&self) -> &Arc<ResourceCore> {
        self.inner.core()
    }
}

/// Forges an access with an arbitrary policy type onto `core`, bypassing
/// the typed `Resource` surface. Lets tests exercise mode-type mismatch
/// on a single resource.
#[cfg(test)]
pub(crate) fn raw_access<P: AccessPolicy>(
    core: &Arc<ResourceCore>,
    policy: P,
) -> ResourceAccess {
    ResourceAccess {
        inner: Arc::new(TypedAccess {
            core: Arc::clone(core),
            policy,
        }),
    }
}

impl fmt::Debug for ResourceAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResourceAccess {{ resource: {}, scope: {}, mode: ",
            self.resource_id(),
            self.scope_level()
        )?;
        self.inner.fmt_mode(f)?;
        write!(f, " }}")
    }
}
