use std::sync::atomic::{AtomicU64, Ordering};

const BITS: usize = u64::BITS as usize;

/// Fixed-size array of atomically updated bits.
///
/// Used by the worker pool to publish per-worker BUSY/AVAILABLE states so
/// that emplacement and stealing can probe all workers with a handful of
/// loads instead of touching per-worker structures.
pub(crate) struct AtomicBitfield {
    words: Vec<AtomicU64>,
    len: usize,
}

impl AtomicBitfield {
    pub(crate) fn new(len: usize, initial: bool) -> Self {
        let fill = if initial { u64::MAX } else { 0 };
        let words = (0..len.div_ceil(BITS)).map(|_| AtomicU64::new(fill)).collect();
        Self { words, len }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        let word = self.words[idx / BITS].load(Ordering::Acquire);
        word & (1 << (idx % BITS)) != 0
    }

    /// Sets bit `idx` to `value` and returns the previous value.
    pub(crate) fn set(&self, idx: usize, value: bool) -> bool {
        debug_assert!(idx < self.len);
        let mask = 1 << (idx % BITS);
        let word = &self.words[idx / BITS];
        let prev = if value {
            word.fetch_or(mask, Ordering::AcqRel)
        } else {
            word.fetch_and(!mask, Ordering::AcqRel)
        };
        prev & mask != 0
    }

    /// Probes all indices whose bit equals `expected`, starting just after
    /// `start` and wrapping around, until `f` returns `Some`.
    ///
    /// The states may change concurrently; `expected` is a hint, not a
    /// guarantee, so `f` must tolerate stale candidates.
    pub(crate) fn probe<T>(
        &self,
        expected: bool,
        start: usize,
        mut f: impl FnMut(usize) -> Option<T>,
    ) -> Option<T> {
        for off in 1..=self.len {
            let idx = (start + off) % self.len;
            if self.get(idx) == expected {
                if let Some(out) = f(idx) {
                    return Some(out);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let field = AtomicBitfield::new(70, false);
        assert!(!field.get(0));
        assert!(!field.set(69, true));
        assert!(field.get(69));
        assert!(field.set(69, false));
        assert!(!field.get(69));
    }

    #[test]
    fn initial_fill() {
        let field = AtomicBitfield::new(3, true);
        assert!(field.get(0) && field.get(1) && field.get(2));
    }

    #[test]
    fn probe_wraps_and_excludes_start() {
        let field = AtomicBitfield::new(4, false);
        field.set(1, true);

        // Starting at 2, the first matching index reached by wrapping is 1.
        let hit = field.probe(true, 2, Some);
        assert_eq!(hit, Some(1));

        // The start index itself is probed last.
        field.set(2, true);
        let order = {
            let mut seen = Vec::new();
            field.probe::<()>(true, 2, |idx| {
                seen.push(idx);
                None
            });
            seen
        };
        assert_eq!(order, vec![1, 2]);
    }
}
