use crate::access::{AccessPolicy, Combine};
use std::marker::PhantomData;

/// Fixed-length tuple of sub-accesses, one per axis.
///
/// With [`And`](crate::access::And) semantics the whole access conflicts
/// only when every axis conflicts (two region accesses collide only if
/// they overlap on every dimension). With [`Or`](crate::access::Or)
/// semantics a single conflicting axis is enough.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayAccess<P, K, const N: usize> {
    parts: [P; N],
    _semantics: PhantomData<K>,
}

impl<P, K, const N: usize> ArrayAccess<P, K, N> {
    pub fn new(parts: [P; N]) -> Self {
        Self {
            parts,
            _semantics: PhantomData,
        }
    }

    pub fn parts(&self) -> &[P; N] {
        &self.parts
    }
}

impl<P, K, const N: usize> AccessPolicy for ArrayAccess<P, K, N>
where
    P: AccessPolicy,
    K: Combine,
{
    fn is_serial(a: &Self, b: &Self) -> bool {
        K::fold(
            a.parts
                .iter()
                .zip(b.parts.iter())
                .map(|(x, y)| P::is_serial(x, y)),
        )
    }

    fn is_superset_of(&self, other: &Self) -> bool {
        self.parts
            .iter()
            .zip(other.parts.iter())
            .all(|(x, y)| x.is_superset_of(y))
    }

    fn is_synchronizing(&self) -> bool {
        self.parts.iter().all(|p| p.is_synchronizing())
    }
}

/// Binary composition of two (possibly distinct) access types.
#[derive(Debug, Clone, PartialEq)]
pub struct CombineAccess<A, B, K> {
    first: A,
    second: B,
    _semantics: PhantomData<K>,
}

impl<A, B, K> CombineAccess<A, B, K> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _semantics: PhantomData,
        }
    }

    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }
}

impl<A, B, K> AccessPolicy for CombineAccess<A, B, K>
where
    A: AccessPolicy,
    B: AccessPolicy,
    K: Combine,
{
    fn is_serial(a: &Self, b: &Self) -> bool {
        K::fold(
            [
                A::is_serial(&a.first, &b.first),
                B::is_serial(&a.second, &b.second),
            ]
            .into_iter(),
        )
    }

    fn is_superset_of(&self, other: &Self) -> bool {
        self.first.is_superset_of(&other.first) && self.second.is_superset_of(&other.second)
    }

    fn is_synchronizing(&self) -> bool {
        self.first.is_synchronizing() && self.second.is_synchronizing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::IoAccess::{Read, Write};
    use crate::access::{And, IoAccess, Or, RangeAccess};

    fn r(lo: usize, hi: usize) -> RangeAccess {
        RangeAccess { lo, hi }
    }

    type AndPair = CombineAccess<IoAccess, RangeAccess, And>;
    type OrPair = CombineAccess<IoAccess, RangeAccess, Or>;

    #[test]
    fn and_combine_needs_both_conflicts() {
        let a = AndPair::new(Read, r(10, 20));
        assert!(!AndPair::is_serial(&a, &AndPair::new(Read, r(15, 25))));
        assert!(AndPair::is_serial(&a, &AndPair::new(Write, r(15, 25))));
        assert!(!AndPair::is_serial(&a, &AndPair::new(Write, r(30, 40))));
    }

    #[test]
    fn and_combine_superset() {
        let narrow_read = AndPair::new(Read, r(15, 25));
        assert!(!AndPair::new(Read, r(10, 20)).is_superset_of(&narrow_read));
        assert!(AndPair::new(Write, r(10, 30)).is_superset_of(&narrow_read));
    }

    #[test]
    fn or_combine_conflicts_on_any_axis() {
        let a = OrPair::new(Read, r(10, 20));
        assert!(!OrPair::is_serial(&a, &OrPair::new(Read, r(30, 40))));
        assert!(OrPair::is_serial(&a, &OrPair::new(Read, r(15, 25))));
        assert!(OrPair::is_serial(&a, &OrPair::new(Write, r(15, 25))));
        assert!(OrPair::is_serial(&a, &OrPair::new(Write, r(30, 40))));
    }

    type AndArr = ArrayAccess<IoAccess, And, 2>;
    type OrArr = ArrayAccess<IoAccess, Or, 2>;

    #[test]
    fn and_array_serial() {
        assert!(!AndArr::is_serial(
            &AndArr::new([Read, Read]),
            &AndArr::new([Read, Read]),
        ));
        assert!(!AndArr::is_serial(
            &AndArr::new([Read, Write]),
            &AndArr::new([Read, Read]),
        ));
        assert!(AndArr::is_serial(
            &AndArr::new([Write, Write]),
            &AndArr::new([Read, Read]),
        ));
    }

    #[test]
    fn and_array_superset() {
        assert!(AndArr::new([Read, Write]).is_superset_of(&AndArr::new([Read, Read])));
        assert!(!AndArr::new([Read, Write]).is_superset_of(&AndArr::new([Write, Read])));
    }

    #[test]
    fn or_array_serial() {
        assert!(!OrArr::is_serial(
            &OrArr::new([Read, Read]),
            &OrArr::new([Read, Read]),
        ));
        assert!(OrArr::is_serial(
            &OrArr::new([Read, Write]),
            &OrArr::new([Read, Read]),
        ));
        assert!(OrArr::is_serial(
            &OrArr::new([Write, Write]),
            &OrArr::new([Read, Read]),
        ));
    }

    #[test]
    fn array_synchronizes_only_when_all_axes_do() {
        type Ranges = ArrayAccess<RangeAccess, And, 2>;
        assert!(Ranges::new([RangeAccess::FULL, RangeAccess::FULL]).is_synchronizing());
        assert!(!Ranges::new([RangeAccess::FULL, r(0, 10)]).is_synchronizing());
    }
}
