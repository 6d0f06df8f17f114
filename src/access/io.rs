use crate::access::AccessPolicy;

/// Whole-resource input/output mode.
///
/// The two atomic modes commute with themselves: any interleaving of
/// additions (or of multiplications) produces the same value, so equal
/// atomic accesses run in parallel while mixed ones serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoAccess {
    Read,
    Write,
    AtomicAdd,
    AtomicMul,
}

impl AccessPolicy for IoAccess {
    fn is_serial(a: &Self, b: &Self) -> bool {
        use IoAccess::*;
        !matches!(
            (a, b),
            (Read, Read) | (AtomicAdd, AtomicAdd) | (AtomicMul, AtomicMul)
        )
    }

    fn is_superset_of(&self, other: &Self) -> bool {
        matches!(self, IoAccess::Write) || self == other
    }

    fn is_synchronizing(&self) -> bool {
        matches!(self, IoAccess::Write)
    }
}
