use crate::resource::{ResourceAccess, ResourceCore, SLOT_UNSET};
use crate::ResourceId;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One entry per distinct resource a task uses, remembering the slot the
/// task occupies in that resource's user list once it is submitted.
pub(crate) struct UniqueResource {
    pub(crate) core: Arc<ResourceCore>,
    slot: AtomicUsize,
}

impl UniqueResource {
    fn new(core: Arc<ResourceCore>) -> Self {
        Self {
            core,
            slot: AtomicUsize::new(SLOT_UNSET),
        }
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot.load(Ordering::Acquire)
    }

    pub(crate) fn set_slot(&self, slot: usize) {
        self.slot.store(slot, Ordering::Release);
    }
}

/// A task's bag of access handles plus its derived unique-resource list.
pub struct ResourceUser {
    pub(crate) accesses: SmallVec<[ResourceAccess; 4]>,
    pub(crate) unique: SmallVec<[UniqueResource; 4]>,
    pub(crate) scope_depth: u16,
}

impl ResourceUser {
    pub fn new(
        accesses: impl IntoIterator<Item = ResourceAccess>,
        scope_depth: u16,
    ) -> Self {
        let mut user = Self {
            accesses: SmallVec::new(),
            unique: SmallVec::new(),
            scope_depth,
        };
        for access in accesses {
            user.add_access(access);
        }
        user
    }

    /// Appends an access, extending the unique-resource list when this is
    /// the first access to its resource.
    pub(crate) fn add_access(&mut self, access: ResourceAccess) {
        let id = access.resource_id();
        if !self.unique.iter().any(|u| u.core.id == id) {
            self.unique
                .push(UniqueResource::new(Arc::clone(access.core())));
        }
        self.accesses.push(access);
    }

    /// Whether any pair of accesses forces an order between the two users.
    ///
    /// Both lists are walked newest-first: user lists accumulate
    /// write-then-reads patterns, so the conflicting write tends to sit at
    /// the near end and the loop exits early.
    pub fn is_serial(a: &Self, b: &Self) -> bool {
        a.accesses.iter().rev().any(|x| {
            b.accesses
                .iter()
                .rev()
                .any(|y| ResourceAccess::is_serial(x, y))
        })
    }

    /// Whether `self` covers every access of `other` that is visible at
    /// `self`'s scope. Accesses to resources created in deeper scopes are
    /// `other`'s own business and are ignored.
    pub fn is_superset_of(&self, other: &Self) -> bool {
        for access in other.accesses.iter() {
            let covered = self.accesses.iter().any(|own| own.is_superset_of(access));
            if !covered && access.scope_level() <= self.scope_depth {
                return false;
            }
        }
        true
    }

    /// Whether some access of this user synchronizes resource `id`.
    pub(crate) fn has_sync_access(&self, id: ResourceId) -> bool {
        self.accesses
            .iter()
            .any(|a| a.resource_id() == id && a.is_synchronizing())
    }

    /// Accesses-only copy, used to validate patches against the state
    /// before they were applied. Slots are deliberately not carried over.
    pub(crate) fn snapshot(&self) -> Self {
        Self::new(self.accesses.iter().cloned(), self.scope_depth)
    }
}
