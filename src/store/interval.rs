//! Sorted, merging interval index over a one-dimensional byte range
//!
//! Each interval carries the bytes written to its range. Adding an
//! interval that overlaps existing ones merges them write-wins: the
//! newest data owns the overlap, older intervals contribute only their
//! non-overlapping prefix and suffix.

use crate::error::{Error, Result};

/// A single write: a half-open range `[offset, offset + data.len())`
/// and the bytes that were written there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    offset: i64,
    data: Vec<u8>,
}

impl Modification {
    /// Create a modification covering `[offset, offset + data.len())`.
    pub fn new(offset: i64, data: Vec<u8>) -> Self {
        Modification { offset, data }
    }

    /// The covered range; minimum inclusive, maximum exclusive.
    /// Wrapping keeps the end comparable when an offset sits at the
    /// edge of the domain; `IntervalIndex::add` rejects such ranges.
    pub fn range(&self) -> (i64, i64) {
        (self.offset, self.offset.wrapping_add(self.data.len() as i64))
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Merge `other` into this interval. Overlapping bytes are kept
    /// from `self`; `other` contributes only the parts outside our
    /// range. `other` is consumed, releasing its payload.
    pub fn merge(&mut self, other: Modification) {
        let (o_lo, o_hi) = other.range();
        let (s_lo, s_hi) = self.range();

        if s_lo > o_hi || o_lo > s_hi {
            return;
        }

        let mut merged = Vec::with_capacity((s_hi.max(o_hi) - s_lo.min(o_lo)) as usize);
        if o_lo < s_lo {
            merged.extend_from_slice(&other.data[..(s_lo - o_lo) as usize]);
        }
        merged.extend_from_slice(&self.data);
        if o_hi > s_hi {
            merged.extend_from_slice(&other.data[(s_hi - o_lo) as usize..]);
        }

        self.offset = s_lo.min(o_lo);
        self.data = merged;
    }
}

/// A continuous array of sorted, disjoint intervals.
/// Holes between the intervals are allowed.
#[derive(Debug, Default)]
pub struct IntervalIndex {
    ranges: Vec<Modification>,

    /// Largest interval end ever added
    max: i64,
}

impl IntervalIndex {
    pub fn new() -> Self {
        IntervalIndex::default()
    }

    /// Insert a single interval. Overlapping existing intervals are
    /// folded in; the new data takes priority on the overlap.
    pub fn add(&mut self, n: Modification) -> Result<()> {
        let (lo, hi) = n.range();
        if hi < lo {
            return Err(Error::Precondition(format!(
                "interval end before start: [{}, {})",
                lo, hi
            )));
        }

        if hi > self.max {
            self.max = hi;
        }

        // Lowest interval our start still reaches, and the first
        // interval entirely past our end.
        let lo_idx = self.ranges.partition_point(|m| m.range().1 < lo);
        let hi_idx = self.ranges.partition_point(|m| m.range().0 < hi);

        if lo_idx >= self.ranges.len() {
            self.ranges.push(n);
            return Ok(());
        }

        if lo_idx == hi_idx {
            self.ranges.insert(lo_idx, n);
            return Ok(());
        }

        let mut merged = n;
        for old in self.ranges.drain(lo_idx..hi_idx) {
            merged.merge(old);
        }
        self.ranges.insert(lo_idx, merged);
        Ok(())
    }

    /// All intervals intersecting `[start, end)`, in index order.
    pub fn overlays(&self, start: i64, end: i64) -> &[Modification] {
        let lo = self.ranges.partition_point(|m| m.range().1 < start);
        let hi = self.ranges.partition_point(|m| m.range().0 < end);
        &self.ranges[lo..hi]
    }

    /// Largest interval end ever added.
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Number of stored intervals.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn modification(offset: i64, data: &[u8]) -> Modification {
        Modification::new(offset, data.to_vec())
    }

    fn assert_invariants(index: &IntervalIndex) {
        let ranges = index.overlays(i64::MIN / 2, i64::MAX / 2);
        for pair in ranges.windows(2) {
            let (_, a_hi) = pair[0].range();
            let (b_lo, _) = pair[1].range();
            assert!(a_hi <= b_lo, "intervals must be sorted and disjoint");
        }
        for m in ranges {
            assert!(m.range().1 <= index.max());
        }
    }

    #[test]
    fn test_merge_overlap_takes_new_data() {
        let mut index = IntervalIndex::new();
        index.add(modification(0, b"AAAAAAAAAA")).unwrap();
        index.add(modification(5, b"BBBBBBBBBB")).unwrap();

        assert_eq!(index.len(), 1);
        let merged = &index.overlays(0, 15)[0];
        assert_eq!(merged.range(), (0, 15));
        assert_eq!(merged.data(), b"AAAAABBBBBBBBBB");
        assert_eq!(index.max(), 15);
    }

    #[test]
    fn test_merge_keeps_old_suffix() {
        let mut index = IntervalIndex::new();
        index.add(modification(0, b"0123456789")).unwrap();
        index.add(modification(2, b"xx")).unwrap();

        assert_eq!(index.len(), 1);
        let merged = &index.overlays(0, 10)[0];
        assert_eq!(merged.data(), b"01xx456789");
    }

    #[test]
    fn test_disjoint_intervals_stay_separate() {
        let mut index = IntervalIndex::new();
        index.add(modification(0, b"aa")).unwrap();
        index.add(modification(10, b"bb")).unwrap();
        index.add(modification(5, b"cc")).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.max(), 12);
        assert_invariants(&index);
    }

    #[test]
    fn test_touching_intervals_merge() {
        let mut index = IntervalIndex::new();
        index.add(modification(0, b"aaaaa")).unwrap();
        index.add(modification(5, b"bbbbb")).unwrap();

        assert_eq!(index.len(), 1);
        let merged = &index.overlays(0, 10)[0];
        assert_eq!(merged.range(), (0, 10));
        assert_eq!(merged.data(), b"aaaaabbbbb");
    }

    #[test]
    fn test_new_interval_spans_several_old_ones() {
        let mut index = IntervalIndex::new();
        index.add(modification(0, b"aa")).unwrap();
        index.add(modification(4, b"bb")).unwrap();
        index.add(modification(8, b"cc")).unwrap();
        index.add(modification(1, b"XXXXXXXX")).unwrap();

        assert_eq!(index.len(), 1);
        let merged = &index.overlays(0, 10)[0];
        assert_eq!(merged.range(), (0, 10));
        assert_eq!(merged.data(), b"aXXXXXXXXc");
    }

    #[test]
    fn test_add_rejects_reversed_range() {
        // A reversed range can only be expressed through a negative
        // length, which Vec cannot hold; the precondition still guards
        // the arithmetic on offsets near overflow.
        let mut index = IntervalIndex::new();
        let bad = Modification {
            offset: i64::MAX - 2,
            data: vec![0u8; 8],
        };
        assert!(matches!(index.add(bad), Err(Error::Precondition(_))));
    }

    #[test]
    fn test_overlays_selects_intersecting_only() {
        let mut index = IntervalIndex::new();
        index.add(modification(0, b"aa")).unwrap();
        index.add(modification(10, b"bb")).unwrap();
        index.add(modification(20, b"cc")).unwrap();

        assert_eq!(index.overlays(10, 12).len(), 1);
        assert_eq!(index.overlays(3, 9).len(), 0);
        assert_eq!(index.overlays(0, 25).len(), 3);
        assert_eq!(index.overlays(11, 21).len(), 2);
    }

    #[test]
    fn test_latest_write_wins_per_byte() {
        let mut index = IntervalIndex::new();
        let mut model = vec![None::<u8>; 64];
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let lo = rng.gen_range(0..48) as i64;
            let len = rng.gen_range(1..16usize);
            let byte: u8 = rng.gen();
            let data = vec![byte; len];

            for i in 0..len {
                model[lo as usize + i] = Some(byte);
            }
            index.add(Modification::new(lo, data)).unwrap();
            assert_invariants(&index);
        }

        for m in index.overlays(0, 64) {
            let (lo, hi) = m.range();
            for off in lo..hi {
                assert_eq!(
                    Some(m.data()[(off - lo) as usize]),
                    model[off as usize],
                    "byte at offset {} must come from the latest write",
                    off
                );
            }
        }
        // Every byte the model knows about is covered by some interval.
        for (off, byte) in model.iter().enumerate() {
            if byte.is_some() {
                assert_eq!(index.overlays(off as i64, off as i64 + 1).len(), 1);
            }
        }
    }
}
