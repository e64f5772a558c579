//! A compact set of disjoint, sorted, half-open byte ranges `[s, e)`.
//!
//! Used to track which regions of a destination file are known to mirror
//! the source file exactly. Touching or overlapping ranges are merged on
//! insertion so the set never grows beyond the number of genuinely
//! disjoint gaps in coverage.

/// Sorted, disjoint set of half-open `[s, e)` ranges over byte offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<(u64, u64)>,
}

impl IntervalSet {
    /// An empty interval set.
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Merge `[s, e)` into the set, coalescing any overlapping or
    /// touching ranges. A no-op if `s >= e`.
    pub fn add(&mut self, s: u64, e: u64) {
        if s >= e {
            return;
        }

        let mut new_s = s;
        let mut new_e = e;
        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        let mut inserted = false;

        for &(rs, re) in &self.ranges {
            if re < new_s {
                merged.push((rs, re));
            } else if re == new_s {
                new_s = rs.min(new_s);
            } else if new_e < rs {
                if !inserted {
                    merged.push((new_s, new_e));
                    inserted = true;
                }
                merged.push((rs, re));
            } else if new_e == rs {
                new_e = re.max(new_e);
            } else {
                // Overlap: absorb into the pending new range.
                new_s = new_s.min(rs);
                new_e = new_e.max(re);
            }
        }

        if !inserted {
            merged.push((new_s, new_e));
        }

        self.ranges = merged;
    }

    /// Subtract `[s, e)` from the set. A no-op if `s >= e`.
    pub fn del(&mut self, s: u64, e: u64) {
        if s >= e {
            return;
        }

        let mut result = Vec::with_capacity(self.ranges.len() + 1);
        for &(rs, re) in &self.ranges {
            if re <= s || rs >= e {
                // Disjoint from the deleted range.
                result.push((rs, re));
                continue;
            }
            if rs < s {
                result.push((rs, s));
            }
            if re > e {
                result.push((e, re));
            }
            // Fully covered by [s, e): dropped entirely.
        }
        self.ranges = result;
    }

    /// True iff a single stored interval fully contains `[s, e)`.
    /// Empty query ranges (`s == e`) are vacuously covered.
    pub fn covers(&self, s: u64, e: u64) -> bool {
        if s >= e {
            return true;
        }
        self.ranges.iter().any(|&(rs, re)| rs <= s && e <= re)
    }

    /// The stored ranges, in ascending order.
    #[cfg(test)]
    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_merges_touching_ranges() {
        let mut set = IntervalSet::new();
        set.add(0, 5);
        set.add(5, 10);
        assert_eq!(set.ranges(), &[(0, 10)]);
    }

    #[test]
    fn add_merges_overlapping_ranges() {
        let mut set = IntervalSet::new();
        set.add(0, 5);
        set.add(3, 8);
        assert_eq!(set.ranges(), &[(0, 8)]);
    }

    #[test]
    fn add_keeps_disjoint_ranges_separate() {
        let mut set = IntervalSet::new();
        set.add(0, 5);
        set.add(10, 15);
        assert_eq!(set.ranges(), &[(0, 5), (10, 15)]);
    }

    #[test]
    fn add_bridges_a_gap() {
        let mut set = IntervalSet::new();
        set.add(0, 5);
        set.add(10, 15);
        set.add(5, 10);
        assert_eq!(set.ranges(), &[(0, 15)]);
    }

    #[test]
    fn add_empty_range_is_noop() {
        let mut set = IntervalSet::new();
        set.add(5, 5);
        assert!(set.ranges().is_empty());
    }

    #[test]
    fn covers_exact_and_subset() {
        let mut set = IntervalSet::new();
        set.add(0, 10);
        assert!(set.covers(0, 10));
        assert!(set.covers(2, 8));
        assert!(!set.covers(0, 11));
        assert!(!set.covers(9, 11));
    }

    #[test]
    fn covers_empty_range_is_vacuously_true() {
        let set = IntervalSet::new();
        assert!(set.covers(3, 3));
    }

    #[test]
    fn del_splits_an_interval() {
        let mut set = IntervalSet::new();
        set.add(0, 10);
        set.del(3, 6);
        assert_eq!(set.ranges(), &[(0, 3), (6, 10)]);
    }

    #[test]
    fn del_shrinks_right_tail() {
        let mut set = IntervalSet::new();
        set.add(0, 10);
        set.del(7, 20);
        assert_eq!(set.ranges(), &[(0, 7)]);
    }

    #[test]
    fn del_shrinks_left_head() {
        let mut set = IntervalSet::new();
        set.add(5, 10);
        set.del(0, 7);
        assert_eq!(set.ranges(), &[(7, 10)]);
    }

    #[test]
    fn del_removes_a_fully_covered_interval() {
        let mut set = IntervalSet::new();
        set.add(0, 10);
        set.del(0, 10);
        assert!(set.ranges().is_empty());
    }

    #[test]
    fn del_all_clamps_tail_for_truncate() {
        let mut set = IntervalSet::new();
        set.add(0, 100);
        set.del(40, u64::MAX);
        assert_eq!(set.ranges(), &[(0, 40)]);
        assert!(!set.covers(0, 100));
        assert!(set.covers(0, 40));
    }

    #[test]
    fn del_empty_range_is_noop() {
        let mut set = IntervalSet::new();
        set.add(0, 10);
        set.del(5, 5);
        assert_eq!(set.ranges(), &[(0, 10)]);
    }

    #[test]
    fn add_then_del_restores_prior_state() {
        let mut set = IntervalSet::new();
        set.add(0, 5);
        set.add(20, 25);
        set.del(10, 15);
        assert_eq!(set.ranges(), &[(0, 5), (20, 25)]);
    }
}
