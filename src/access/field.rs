use crate::access::{And, ArrayAccess, CombineAccess, IoAccess, RangeAccess};
use std::ops::Range;

/// Access to a rectangular region of a `DIM`-dimensional field: an I/O
/// mode combined with one range per axis. Serial only when the modes
/// conflict *and* the regions overlap on every axis.
pub type FieldAccess<const DIM: usize> =
    CombineAccess<IoAccess, ArrayAccess<RangeAccess, And, DIM>, And>;

/// Builds a [`FieldAccess`] from an I/O mode and a per-axis region.
pub fn field_access<const DIM: usize>(
    io: IoAccess,
    region: [Range<usize>; DIM],
) -> FieldAccess<DIM> {
    CombineAccess::new(io, ArrayAccess::new(region.map(RangeAccess::new)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessPolicy;

    #[test]
    fn same_region_reads_commute() {
        let a = field_access(IoAccess::Read, [0..10, 0..10, 0..10]);
        let b = field_access(IoAccess::Read, [0..10, 0..10, 0..10]);
        assert!(!FieldAccess::is_serial(&a, &b));
    }

    #[test]
    fn overlapping_write_serializes() {
        let w = field_access(IoAccess::Write, [0..10, 0..10, 0..10]);
        let r = field_access(IoAccess::Read, [0..10, 0..10, 0..10]);
        assert!(FieldAccess::is_serial(&w, &r));
    }

    #[test]
    fn disjoint_on_one_axis_is_enough_to_commute() {
        let a = field_access(IoAccess::Write, [0..10, 0..5]);
        let b = field_access(IoAccess::Write, [0..10, 5..10]);
        assert!(!FieldAccess::is_serial(&a, &b));
    }

    #[test]
    fn containing_write_is_a_superset() {
        let whole = field_access(IoAccess::Write, [0..20]);
        let part = field_access(IoAccess::Read, [5..15]);
        assert!(whole.is_superset_of(&part));
        assert!(!part.is_superset_of(&whole));
    }
}
