//! Resources that carry their data with them.
//!
//! The runtime orders tasks, it does not borrow-check them: a guard hands
//! out the shared value on the promise that the holder declared a
//! matching access on the owning task. Undeclared aliasing is outside the
//! cooperative model and is not detected.

use crate::access::{field_access, FieldAccess, IoAccess};
use crate::resource::{AccessError, Resource, ResourceAccess};
use std::cell::UnsafeCell;
use std::ops::Range;
use std::sync::Arc;

/// Interior-mutable slot whose exclusion discipline is the event graph,
/// not a lock.
pub(crate) struct ResourceCell<T> {
    value: UnsafeCell<T>,
}

// The scheduler guarantees that conflicting declared accesses never run
// concurrently, which is exactly the aliasing contract &/&mut requires.
// Commutative accesses are the one exception: they may overlap each
// other, so their guard serializes through `IoCell::commute` instead of
// borrowing directly.
unsafe impl<T: Send> Send for ResourceCell<T> {}
unsafe impl<T: Send> Sync for ResourceCell<T> {}

impl<T> ResourceCell<T> {
    fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// Caller must hold a read-compatible declared access on the owning
    /// resource for the duration of the borrow.
    unsafe fn get(&self) -> &T {
        &*self.value.get()
    }

    /// Caller must hold the only live access to the owning resource for
    /// the duration of the borrow.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get_mut(&self) -> &mut T {
        &mut *self.value.get()
    }
}

/// Backing store of an [`IoResource`]: the value plus the lock that
/// serializes overlapping commutative updates.
struct IoCell<T> {
    value: ResourceCell<T>,
    commute: parking_lot::Mutex<()>,
}

/// A value protected by the read/write/atomic I/O mode.
pub struct IoResource<T> {
    res: Resource<IoAccess>,
    data: Arc<IoCell<T>>,
}

impl<T> Clone for IoResource<T> {
    fn clone(&self) -> Self {
        Self {
            res: self.res.clone(),
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Send + 'static> IoResource<T> {
    pub fn new(value: T) -> Self {
        Self {
            res: Resource::new(),
            data: Arc::new(IoCell {
                value: ResourceCell::new(value),
                commute: parking_lot::Mutex::new(()),
            }),
        }
    }

    pub fn resource(&self) -> &Resource<IoAccess> {
        &self.res
    }

    pub fn read(&self) -> IoGuard<T> {
        IoGuard {
            data: Arc::clone(&self.data),
            access: self.res.access(IoAccess::Read),
        }
    }

    pub fn write(&self) -> IoGuardMut<T> {
        IoGuardMut {
            data: Arc::clone(&self.data),
            access: self.res.access(IoAccess::Write),
        }
    }

    /// Commutative-update access: tasks holding `atomic_add` guards may
    /// run concurrently with each other, but not with readers or writers.
    pub fn atomic_add(&self) -> IoGuardAtomic<T> {
        self.guard_atomic(IoAccess::AtomicAdd)
    }

    pub fn atomic_mul(&self) -> IoGuardAtomic<T> {
        self.guard_atomic(IoAccess::AtomicMul)
    }

    fn guard_atomic(&self, mode: IoAccess) -> IoGuardAtomic<T> {
        IoGuardAtomic {
            data: Arc::clone(&self.data),
            access: self.res.access(mode),
        }
    }
}

/// Shared handle to an [`IoResource`]'s value.
pub struct IoGuard<T> {
    data: Arc<IoCell<T>>,
    access: ResourceAccess,
}

impl<T> Clone for IoGuard<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            access: self.access.clone(),
        }
    }
}

impl<T> IoGuard<T> {
    /// The descriptor to declare on the task that captures this guard.
    pub fn access(&self) -> ResourceAccess {
        self.access.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        // Ordering contract: see ResourceCell.
        f(unsafe { self.data.value.get() })
    }
}

impl<T: Copy> IoGuard<T> {
    pub fn get(&self) -> T {
        self.with(|v| *v)
    }
}

/// Exclusive handle to an [`IoResource`]'s value.
pub struct IoGuardMut<T> {
    data: Arc<IoCell<T>>,
    access: ResourceAccess,
}

impl<T> Clone for IoGuardMut<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            access: self.access.clone(),
        }
    }
}

impl<T> IoGuardMut<T> {
    pub fn access(&self) -> ResourceAccess {
        self.access.clone()
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // Ordering contract: see ResourceCell.
        f(unsafe { self.data.value.get_mut() })
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(unsafe { self.data.value.get() })
    }
}

/// Commutative-update handle (atomic-add / atomic-mul).
///
/// Holders of equal commutative accesses run concurrently, so the borrow
/// cannot be handed out raw: updates funnel through the resource's
/// commute lock. The update closure must commute with the other holders'
/// closures; it must not observe the value, only fold into it.
pub struct IoGuardAtomic<T> {
    data: Arc<IoCell<T>>,
    access: ResourceAccess,
}

impl<T> Clone for IoGuardAtomic<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            access: self.access.clone(),
        }
    }
}

impl<T> IoGuardAtomic<T> {
    pub fn access(&self) -> ResourceAccess {
        self.access.clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _serialize = self.data.commute.lock();
        f(unsafe { self.data.value.get_mut() })
    }
}

/// A `DIM`-dimensional array of `T` addressed by per-axis index ranges.
///
/// Elements live in individual cells so that tasks writing disjoint
/// regions can run concurrently without their borrows overlapping.
pub struct FieldResource<T, const DIM: usize> {
    res: Resource<FieldAccess<DIM>>,
    shape: [usize; DIM],
    cells: Arc<[ResourceCell<T>]>,
}

impl<T, const DIM: usize> Clone for FieldResource<T, DIM> {
    fn clone(&self) -> Self {
        Self {
            res: self.res.clone(),
            shape: self.shape,
            cells: Arc::clone(&self.cells),
        }
    }
}

impl<T: Send + 'static, const DIM: usize> FieldResource<T, DIM> {
    pub fn new(shape: [usize; DIM], fill: T) -> Self
    where
        T: Clone,
    {
        let len = shape.iter().product();
        let cells: Vec<ResourceCell<T>> =
            (0..len).map(|_| ResourceCell::new(fill.clone())).collect();
        Self {
            res: Resource::new(),
            shape,
            cells: cells.into(),
        }
    }

    pub fn shape(&self) -> [usize; DIM] {
        self.shape
    }

    pub fn resource(&self) -> &Resource<FieldAccess<DIM>> {
        &self.res
    }

    pub fn read(
        &self,
        region: [Range<usize>; DIM],
    ) -> Result<FieldGuard<T, DIM>, AccessError> {
        self.check(&region)?;
        Ok(FieldGuard {
            field: self.clone(),
            access: self
                .res
                .access(field_access(IoAccess::Read, region.clone())),
            region,
        })
    }

    pub fn write(
        &self,
        region: [Range<usize>; DIM],
    ) -> Result<FieldGuardMut<T, DIM>, AccessError> {
        self.check(&region)?;
        Ok(FieldGuardMut {
            field: self.clone(),
            access: self
                .res
                .access(field_access(IoAccess::Write, region.clone())),
            region,
        })
    }

    fn check(&self, region: &[Range<usize>; DIM]) -> Result<(), AccessError> {
        for (axis, (range, &extent)) in region.iter().zip(self.shape.iter()).enumerate() {
            if range.start > range.end || range.end > extent {
                return Err(AccessError::OutOfRange {
                    axis,
                    lo: range.start,
                    hi: range.end,
                    extent,
                });
            }
        }
        Ok(())
    }

    fn flat_index(&self, idx: [usize; DIM]) -> usize {
        let mut flat = 0;
        for axis in 0..DIM {
            debug_assert!(idx[axis] < self.shape[axis], "index beyond field shape");
            flat = flat * self.shape[axis] + idx[axis];
        }
        flat
    }
}

fn assert_in_region<const DIM: usize>(idx: &[usize; DIM], region: &[Range<usize>; DIM]) {
    for axis in 0..DIM {
        debug_assert!(
            region[axis].contains(&idx[axis]),
            "index outside the declared region"
        );
    }
}

/// Read handle onto a region of a [`FieldResource`].
pub struct FieldGuard<T, const DIM: usize> {
    field: FieldResource<T, DIM>,
    region: [Range<usize>; DIM],
    access: ResourceAccess,
}

impl<T: Send + 'static, const DIM: usize> FieldGuard<T, DIM> {
    pub fn access(&self) -> ResourceAccess {
        self.access.clone()
    }

    pub fn region(&self) -> &[Range<usize>; DIM] {
        &self.region
    }

    pub fn with<R>(&self, idx: [usize; DIM], f: impl FnOnce(&T) -> R) -> R {
        assert_in_region(&idx, &self.region);
        f(unsafe { self.field.cells[self.field.flat_index(idx)].get() })
    }
}

impl<T: Copy + Send + 'static, const DIM: usize> FieldGuard<T, DIM> {
    pub fn get(&self, idx: [usize; DIM]) -> T {
        self.with(idx, |v| *v)
    }
}

/// Write handle onto a region of a [`FieldResource`].
pub struct FieldGuardMut<T, const DIM: usize> {
    field: FieldResource<T, DIM>,
    region: [Range<usize>; DIM],
    access: ResourceAccess,
}

impl<T, const DIM: usize> std::fmt::Debug for FieldGuardMut<T, DIM> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldGuardMut")
            .field("region", &self.region)
            .finish()
    }
}

impl<T: Send + 'static, const DIM: usize> FieldGuardMut<T, DIM> {
    pub fn access(&self) -> ResourceAccess {
        self.access.clone()
    }

    pub fn region(&self) -> &[Range<usize>; DIM] {
        &self.region
    }

    pub fn set(&self, idx: [usize; DIM], value: T) {
        assert_in_region(&idx, &self.region);
        let cell = &self.field.cells[self.field.flat_index(idx)];
        *unsafe { cell.get_mut() } = value;
    }

    pub fn with_mut<R>(&self, idx: [usize; DIM], f: impl FnOnce(&mut T) -> R) -> R {
        assert_in_region(&idx, &self.region);
        f(unsafe { self.field.cells[self.field.flat_index(idx)].get_mut() })
    }
}

impl<T: Copy + Send + 'static, const DIM: usize> FieldGuardMut<T, DIM> {
    pub fn get(&self, idx: [usize; DIM]) -> T {
        assert_in_region(&idx, &self.region);
        *unsafe { self.field.cells[self.field.flat_index(idx)].get() }
    }
}
