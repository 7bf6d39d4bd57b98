#![allow(missing_docs)]

//! Idempotent commits: committing the same transaction id twice produces the
//! same triple set as committing it once, within a session and across
//! reopen.

use std::collections::BTreeSet;

use terna::db::CommitOutcome;
use terna::{Criteria, Options, SessionId, TermId, Triple, TripleStore, TxId};

fn test_options() -> Options {
    Options {
        durable_commits: true,
        start_registry: false,
        page_size: 8,
        ..Options::default()
    }
}

fn t(s: u64, p: u64, o: u64) -> Triple {
    Triple::new(TermId(s), TermId(p), TermId(o))
}

fn all_triples(store: &TripleStore) -> BTreeSet<Triple> {
    store.query(&Criteria::any()).unwrap().into_iter().collect()
}

#[test]
fn same_txid_twice_equals_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), test_options()).unwrap();

    store
        .begin_batch(Some(TxId(100)), Some(SessionId(7)))
        .unwrap();
    store.add_fact(t(1, 2, 3)).unwrap();
    store.add_fact(t(4, 5, 6)).unwrap();
    let first = store.commit_batch(true).unwrap();
    assert!(matches!(first, CommitOutcome::Committed { .. }));
    let after_first = all_triples(&store);

    store
        .begin_batch(Some(TxId(100)), Some(SessionId(7)))
        .unwrap();
    store.add_fact(t(1, 2, 3)).unwrap();
    store.add_fact(t(4, 5, 6)).unwrap();
    let second = store.commit_batch(true).unwrap();
    assert!(matches!(second, CommitOutcome::AlreadyCommitted));
    assert_eq!(all_triples(&store), after_first);
    store.close().unwrap();
}

#[test]
fn retry_after_reopen_is_still_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let expected;
    {
        let store = TripleStore::open(&path, test_options()).unwrap();
        store.begin_batch(Some(TxId(55)), None).unwrap();
        store.add_fact(t(1, 1, 1)).unwrap();
        store.commit_batch(true).unwrap();
        expected = all_triples(&store);
        store.close().unwrap();
    }
    let store = TripleStore::open(&path, test_options()).unwrap();
    // The flushed remembered set still knows the id.
    store.begin_batch(Some(TxId(55)), None).unwrap();
    store.add_fact(t(9, 9, 9)).unwrap();
    assert!(matches!(
        store.commit_batch(true).unwrap(),
        CommitOutcome::AlreadyCommitted
    ));
    assert_eq!(all_triples(&store), expected);
    store.close().unwrap();
}

#[test]
fn distinct_txids_apply_normally() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), test_options()).unwrap();
    for id in 1..=5u64 {
        store.begin_batch(Some(TxId(id)), None).unwrap();
        store.add_fact(t(id, 1, 1)).unwrap();
        assert!(matches!(
            store.commit_batch(true).unwrap(),
            CommitOutcome::Committed { .. }
        ));
    }
    assert_eq!(all_triples(&store).len(), 5);
    store.close().unwrap();
}

#[test]
fn duplicate_delete_batch_is_also_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), test_options()).unwrap();
    store.add_fact(t(1, 2, 3)).unwrap();
    store.add_fact(t(4, 5, 6)).unwrap();
    store.flush().unwrap();

    store.begin_batch(Some(TxId(200)), None).unwrap();
    store.delete_fact(t(1, 2, 3)).unwrap();
    store.commit_batch(true).unwrap();
    let after_delete = all_triples(&store);

    // A retried delete re-added nothing and re-deleted nothing.
    store.begin_batch(Some(TxId(200)), None).unwrap();
    store.delete_fact(t(1, 2, 3)).unwrap();
    store.delete_fact(t(4, 5, 6)).unwrap();
    assert!(matches!(
        store.commit_batch(true).unwrap(),
        CommitOutcome::AlreadyCommitted
    ));
    assert_eq!(all_triples(&store), after_delete);
    assert!(store.contains_fact(&t(4, 5, 6)).unwrap());
    store.close().unwrap();
}
