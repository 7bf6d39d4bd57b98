//! Persistent storage for triples: dictionary, staging overlay, paged
//! indexes, manifest, and write-ahead log.

/// Bidirectional string/id interning dictionary.
pub mod dict;

/// Sorted, page-structured disk indexes (one per ordering).
pub mod index;

/// Versioned on-disk layout metadata.
pub mod manifest;

/// Page frame encoding and compression.
pub mod page;

/// In-memory committed-write overlay.
pub mod staging;

/// Append-only durability log.
pub mod wal;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::types::{TermId, Triple, TripleOrder};

/// Read/write traffic counters for one `(ordering, primary)` pair, feeding
/// compaction candidate selection.
#[derive(Clone, Copy, Debug, Default)]
pub struct HotnessCounters {
    /// Pages of this primary touched by queries.
    pub reads: u64,
    /// Triples of this primary written by flushes.
    pub writes: u64,
}

/// Per-primary traffic accounting shared by the read path, the flush path,
/// and the compaction engine.
#[derive(Default)]
pub struct HotnessMetrics {
    inner: Mutex<FxHashMap<(TripleOrder, TermId), HotnessCounters>>,
}

impl HotnessMetrics {
    /// Records one read of `primary` under `order`.
    pub fn record_read(&self, order: TripleOrder, primary: TermId) {
        let mut map = self.inner.lock();
        map.entry((order, primary)).or_default().reads += 1;
    }

    /// Records one written triple, counted against all three orderings.
    pub fn record_write(&self, t: &Triple) {
        let mut map = self.inner.lock();
        for order in TripleOrder::ALL {
            map.entry((order, order.primary(t))).or_default().writes += 1;
        }
    }

    /// Returns the counters for one `(ordering, primary)` pair.
    pub fn counters(&self, order: TripleOrder, primary: TermId) -> HotnessCounters {
        self.inner
            .lock()
            .get(&(order, primary))
            .copied()
            .unwrap_or_default()
    }

    /// Number of tracked `(ordering, primary)` pairs.
    pub fn tracked(&self) -> usize {
        self.inner.lock().len()
    }
}
