#![allow(missing_docs)]

//! Lease-gated reclamation: a generation file referenced by an open lease is
//! never deleted; once the lease closes, garbage collection reclaims it. An
//! unreachable registry degrades GC to conservative mode.

#![cfg(unix)]

use terna::storage::manifest::ordering_file_name;
use terna::{Criteria, Options, TermId, Triple, TripleOrder, TripleStore};

fn registry_options() -> Options {
    Options {
        durable_commits: false,
        page_size: 8,
        ..Options::default()
    }
}

fn t(s: u64, p: u64, o: u64) -> Triple {
    Triple::new(TermId(s), TermId(p), TermId(o))
}

#[test]
fn open_lease_blocks_reclamation_until_released() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), registry_options()).unwrap();
    for i in 0..50u64 {
        store.add_fact(t(i % 5 + 1, 3, i + 1)).unwrap();
    }
    store.flush().unwrap();

    let old_generation = store.manifest().lookup(TripleOrder::Spo).generation;
    let old_file = store
        .paths()
        .pages_dir
        .join(ordering_file_name(TripleOrder::Spo, old_generation));
    assert!(old_file.exists());

    // Pin the pre-compaction epoch with a cursor lease, then supersede the
    // generation.
    let mut cursor = store
        .stream_query(&Criteria::any().with_s(TermId(1)), 4)
        .unwrap();
    store.compact_full(TripleOrder::Spo).unwrap();
    assert_eq!(store.manifest().orphans.len(), 1);

    let report = store.collect_garbage().unwrap();
    assert!(!report.conservative);
    assert_eq!(report.files_removed, 0, "open lease must block reclamation");
    assert!(old_file.exists());

    // The cursor still reads its pinned view while the lease is open.
    let mut seen = 0;
    while let Some(batch) = cursor.next() {
        seen += batch.len();
    }
    assert_eq!(seen, 10);

    // Cursor exhaustion released the lease; now the orphan is reclaimable.
    let report = store.collect_garbage().unwrap();
    assert_eq!(report.files_removed, 1);
    assert!(!old_file.exists());
    assert!(store.manifest().orphans.is_empty());

    // The live generation still answers queries.
    assert_eq!(
        store
            .query(&Criteria::any().with_s(TermId(1)))
            .unwrap()
            .len(),
        10
    );
    store.close().unwrap();
}

#[test]
fn unreachable_registry_means_conservative_gc() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = registry_options();
    options.start_registry = false;
    options.registry_retries = 1;
    options.registry_backoff = std::time::Duration::from_millis(1);
    let store = TripleStore::open(dir.path().join("db"), options).unwrap();
    for i in 0..20u64 {
        store.add_fact(t(1, 1, i + 1)).unwrap();
    }
    store.flush().unwrap();
    store.compact_full(TripleOrder::Osp).unwrap();
    assert_eq!(store.manifest().orphans.len(), 1);

    let report = store.collect_garbage().unwrap();
    assert!(report.conservative);
    assert_eq!(report.files_removed, 0);
    assert_eq!(report.orphans_remaining, 1);
    store.close().unwrap();
}

#[test]
fn gc_with_no_leases_reclaims_everything() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), registry_options()).unwrap();
    for i in 0..20u64 {
        store.add_fact(t(i + 1, 2, 2)).unwrap();
    }
    store.flush().unwrap();
    store.compact_full(TripleOrder::Spo).unwrap();
    store.compact_full(TripleOrder::Pos).unwrap();
    assert_eq!(store.manifest().orphans.len(), 2);

    let report = store.collect_garbage().unwrap();
    assert_eq!(report.files_removed, 2);
    assert!(store.manifest().orphans.is_empty());
    store.close().unwrap();
}
