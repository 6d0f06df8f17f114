//! The access algebra: value types describing *how* a task touches a
//! resource, and the three predicates the dependency builder needs.
//!
//! An access mode answers:
//!
//! - `is_serial(a, b)` — must two accesses be ordered?
//! - `a.is_superset_of(b)` — does `a` cover everything `b` touches?
//! - `a.is_synchronizing()` — does `a` cover the entire resource with a
//!   non-commutative operation? A synchronizing access shadows every
//!   earlier user during dependency building.
//!
//! Modes compose: fixed-length arrays of sub-accesses, binary combinations
//! of two mode types, and the field mode (an I/O mode times a region).

use std::fmt;

pub(crate) mod array;
pub(crate) mod field;
pub(crate) mod io;
pub(crate) mod range;

pub use array::{ArrayAccess, CombineAccess};
pub use field::{field_access, FieldAccess};
pub use io::IoAccess;
pub use range::RangeAccess;

/// An access mode over some resource type.
///
/// `is_serial` must be symmetric and `is_superset_of` reflexive; the
/// dependency builder and the access-patch validator rely on both.
pub trait AccessPolicy:
    Clone + PartialEq + Send + Sync + fmt::Debug + 'static
{
    /// Whether two accesses of this mode must execute in program order.
    fn is_serial(a: &Self, b: &Self) -> bool;

    /// Whether `self` covers every part of the resource `other` touches,
    /// at least as strongly.
    fn is_superset_of(&self, other: &Self) -> bool;

    /// Whether this access covers the whole resource with an operation
    /// that serializes against everything.
    fn is_synchronizing(&self) -> bool;
}

/// Marker for combinators whose parts must *all* conflict for the whole
/// to conflict (a task touches every axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct And;

/// Marker for combinators where *any* conflicting part conflicts the
/// whole (a task touches one of the axes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Or;

/// Folds the per-part serial verdicts of a combinator into one.
pub trait Combine:
    Clone + Copy + PartialEq + Send + Sync + fmt::Debug + 'static
{
    fn fold(verdicts: impl Iterator<Item = bool>) -> bool;
}

impl Combine for And {
    fn fold(mut verdicts: impl Iterator<Item = bool>) -> bool {
        verdicts.all(|v| v)
    }
}

impl Combine for Or {
    fn fold(mut verdicts: impl Iterator<Item = bool>) -> bool {
        verdicts.any(|v| v)
    }
}
