#![forbid(unsafe_code)]

//! In-memory buffer of committed, not-yet-flushed writes.
//!
//! The overlay is applied on top of the paged indexes at read time: adds are
//! unioned in, removes are subtracted. Commits swap fresh `Arc`s rather than
//! mutating in place, so epoch-pinned snapshots keep reading the overlay they
//! captured while the live store moves on.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::types::{Criteria, Triple};

/// Immutable view of the committed staging state at one point in time.
#[derive(Clone, Debug, Default)]
pub struct Overlay {
    /// Committed triples not yet flushed to pages.
    pub adds: Arc<BTreeSet<Triple>>,
    /// Committed deletions not yet folded into manifest tombstones.
    pub removes: Arc<BTreeSet<Triple>>,
}

impl Overlay {
    /// Returns `true` when neither adds nor removes are pending.
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }

    /// Applies the overlay to a base result set: removes are subtracted,
    /// matching adds are unioned in.
    pub fn apply(&self, base: &mut BTreeSet<Triple>, criteria: &Criteria) {
        for removed in self.removes.iter() {
            base.remove(removed);
        }
        for added in self.adds.iter() {
            if criteria.matches(added) {
                base.insert(*added);
            }
        }
    }
}

/// Mutable staging store owned by the write path.
#[derive(Debug, Default)]
pub struct StagingStore {
    overlay: Overlay,
}

impl StagingStore {
    /// Creates an empty staging store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a staging store seeded from a persisted overlay.
    pub fn from_overlay(overlay: Overlay) -> Self {
        Self { overlay }
    }

    /// Cheap snapshot of the current overlay (clones the `Arc`s).
    pub fn snapshot(&self) -> Overlay {
        self.overlay.clone()
    }

    /// Merges one committed batch. A put cancels a pending remove of the same
    /// triple; a delete cancels a pending add. Later operations win.
    pub fn merge(&mut self, puts: &[Triple], deletes: &[Triple]) {
        if puts.is_empty() && deletes.is_empty() {
            return;
        }
        let mut adds = BTreeSet::clone(&self.overlay.adds);
        let mut removes = BTreeSet::clone(&self.overlay.removes);
        for t in puts {
            removes.remove(t);
            adds.insert(*t);
        }
        for t in deletes {
            adds.remove(t);
            removes.insert(*t);
        }
        self.overlay = Overlay {
            adds: Arc::new(adds),
            removes: Arc::new(removes),
        };
    }

    /// Takes the current overlay and resets the store to empty; called by
    /// flush once the overlay has been drained into the paged indexes.
    pub fn drain(&mut self) -> Overlay {
        std::mem::take(&mut self.overlay)
    }

    /// Number of pending adds.
    pub fn pending_adds(&self) -> usize {
        self.overlay.adds.len()
    }

    /// Number of pending removes.
    pub fn pending_removes(&self) -> usize {
        self.overlay.removes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TermId;

    fn t(s: u64, p: u64, o: u64) -> Triple {
        Triple::new(TermId(s), TermId(p), TermId(o))
    }

    #[test]
    fn merge_applies_last_op_wins() {
        let mut staging = StagingStore::new();
        staging.merge(&[t(1, 2, 3)], &[]);
        staging.merge(&[], &[t(1, 2, 3)]);
        let overlay = staging.snapshot();
        assert!(overlay.adds.is_empty());
        assert!(overlay.removes.contains(&t(1, 2, 3)));

        staging.merge(&[t(1, 2, 3)], &[]);
        let overlay = staging.snapshot();
        assert!(overlay.adds.contains(&t(1, 2, 3)));
        assert!(overlay.removes.is_empty());
    }

    #[test]
    fn snapshots_are_isolated_from_later_merges() {
        let mut staging = StagingStore::new();
        staging.merge(&[t(1, 1, 1)], &[]);
        let before = staging.snapshot();
        staging.merge(&[t(2, 2, 2)], &[]);
        assert_eq!(before.adds.len(), 1);
        assert_eq!(staging.snapshot().adds.len(), 2);
    }

    #[test]
    fn apply_subtracts_removes_and_filters_adds() {
        let mut staging = StagingStore::new();
        staging.merge(&[t(1, 5, 2), t(3, 6, 4)], &[t(9, 5, 9)]);
        let overlay = staging.snapshot();

        let mut base: BTreeSet<Triple> = [t(9, 5, 9), t(8, 5, 8)].into_iter().collect();
        let criteria = Criteria::any().with_p(TermId(5));
        overlay.apply(&mut base, &criteria);
        assert!(base.contains(&t(8, 5, 8)));
        assert!(base.contains(&t(1, 5, 2)));
        assert!(!base.contains(&t(9, 5, 9)));
        assert!(!base.contains(&t(3, 6, 4)));
    }

    #[test]
    fn drain_resets_to_empty() {
        let mut staging = StagingStore::new();
        staging.merge(&[t(1, 2, 3)], &[t(4, 5, 6)]);
        let drained = staging.drain();
        assert_eq!(drained.adds.len(), 1);
        assert_eq!(drained.removes.len(), 1);
        assert!(staging.snapshot().is_empty());
    }
}
