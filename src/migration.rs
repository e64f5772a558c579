//! Per-path migration state shared by every open handle on that path.

use crate::interval::IntervalSet;

/// Tracks how much of SRC has been mirrored into DST for one relative path.
///
/// Shared via `Arc<tokio::sync::Mutex<MigrationState>>` across every
/// [`crate::handle::SplicingHandle`] open on the same path. The `completed`
/// flag is the single point every handle consults to decide whether it is
/// still dual-backed: the handle that drives coverage to completion sets
/// it and unlinks SRC; every other handle notices on its own next
/// operation and drops its own SRC descriptor instead of racing to unlink
/// a second time.
#[derive(Debug)]
pub struct MigrationState {
    /// Destination-authoritative byte ranges.
    pub covered: IntervalSet,
    /// Size of SRC sampled when the first handle on this path was opened.
    /// Fixed for the lifetime of the migration; completion is measured
    /// against this value even if the file is later extended or
    /// truncated.
    pub size_at_open: u64,
    /// Set once SRC has been unlinked. Checked by every handle before each
    /// read/write to decide whether to drop its own SRC descriptor.
    pub completed: bool,
}

impl MigrationState {
    /// A fresh migration state for a file of the given SRC size.
    pub fn new(size_at_open: u64) -> Self {
        Self { covered: IntervalSet::new(), size_at_open, completed: false }
    }

    /// True once the tracked coverage spans the whole of SRC as observed
    /// at open. Does not itself set `completed` -- the caller performs
    /// the SRC unlink first and only then marks the state completed.
    pub fn is_fully_covered(&self) -> bool {
        self.covered.covers(0, self.size_at_open)
    }

    /// Clamp tracked coverage to `[0, new_size)`, used by `setattr(size)`
    /// so a shrinking truncate can never leave stale coverage claiming
    /// bytes that no longer exist in SRC.
    pub fn clamp_to(&mut self, new_size: u64) {
        self.covered.del(new_size, u64::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_not_covered() {
        let state = MigrationState::new(10);
        assert!(!state.is_fully_covered());
    }

    #[test]
    fn full_coverage_is_detected() {
        let mut state = MigrationState::new(10);
        state.covered.add(0, 10);
        assert!(state.is_fully_covered());
    }

    #[test]
    fn clamp_prevents_false_completion_after_truncate() {
        let mut state = MigrationState::new(10);
        state.covered.add(0, 10);
        state.clamp_to(4);
        assert!(!state.is_fully_covered());
        assert!(state.covered.covers(0, 4));
    }
}
