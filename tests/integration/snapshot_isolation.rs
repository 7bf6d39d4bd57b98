#![allow(missing_docs)]

//! Snapshot isolation: a `with_snapshot` view is unaffected by writes,
//! flushes, and compactions that start and finish while the closure runs,
//! and its lease is released on every exit path.

#![cfg(unix)]

use std::collections::BTreeSet;

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
fn snapshot_ignores_concurrent_writes_and_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), registry_options()).unwrap();
    for i in 0..40u64 {
        store.add_fact(t(i % 4 + 1, 7, i + 1)).unwrap();
    }
    store.flush().unwrap();
    let before: BTreeSet<Triple> = store
        .query(&Criteria::any().with_p(TermId(7)))
        .unwrap()
        .into_iter()
        .collect();

    let (inside_before, inside_after) = store
        .with_snapshot(|view| {
            let inside_before: BTreeSet<Triple> = view
                .query(&Criteria::any().with_p(TermId(7)))
                .unwrap()
                .into_iter()
                .collect();

            // Advance the live epoch under the snapshot's feet.
            store.add_fact(t(9, 7, 999)).unwrap();
            store.delete_fact(t(1, 7, 1)).unwrap();
            store.flush().unwrap();
            store.compact_full(TripleOrder::Pos).unwrap();
            store.compact_incremental(8).unwrap();

            let inside_after: BTreeSet<Triple> = view
                .query(&Criteria::any().with_p(TermId(7)))
                .unwrap()
                .into_iter()
                .collect();
            (inside_before, inside_after)
        })
        .unwrap();

    assert_eq!(inside_before, before, "snapshot must match acquisition state");
    assert_eq!(
        inside_after, before,
        "concurrent writes and compaction leaked into the snapshot"
    );

    // The live view moved on.
    let live: BTreeSet<Triple> = store
        .query(&Criteria::any().with_p(TermId(7)))
        .unwrap()
        .into_iter()
        .collect();
    assert!(live.contains(&t(9, 7, 999)));
    assert!(!live.contains(&t(1, 7, 1)));
    store.close().unwrap();
}

#[test]
fn lease_is_released_on_all_exit_paths() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), registry_options()).unwrap();
    store.add_fact(t(1, 1, 1)).unwrap();
    let registry = store.registry();

    store
        .with_snapshot(|view| {
            assert_eq!(registry.leases().unwrap().len(), 1);
            assert_eq!(view.epoch(), store.epoch());
        })
        .unwrap();
    assert!(registry.leases().unwrap().is_empty());

    // A closure that fails still releases the lease.
    let inner = store.with_snapshot(|_| Err::<(), ()>(())).unwrap();
    assert!(inner.is_err());
    assert!(registry.leases().unwrap().is_empty());
    store.close().unwrap();
}

#[test]
fn cursor_pins_its_epoch_until_closed() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), registry_options()).unwrap();
    for i in 0..30u64 {
        store.add_fact(t(1, 2, i + 1)).unwrap();
    }
    store.flush().unwrap();
    let registry = store.registry();

    let mut cursor = store
        .stream_query(&Criteria::any().with_p(TermId(2)), 7)
        .unwrap();
    assert_eq!(registry.leases().unwrap().len(), 1);

    // The stream is finite, forward-only, and bounded by the batch size.
    let mut total = 0;
    let mut batches = 0;
    while let Some(batch) = cursor.next() {
        assert!(batch.len() <= 7);
        total += batch.len();
        batches += 1;
        // Writes between batches do not extend the stream.
        store.add_fact(t(1, 2, 1000 + total as u64)).unwrap();
    }
    assert_eq!(total, 30);
    assert_eq!(batches, 5);
    assert!(cursor.is_closed());
    assert!(registry.leases().unwrap().is_empty());
    store.close().unwrap();
}
