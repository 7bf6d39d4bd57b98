#![allow(missing_docs)]

//! Crash recovery: reopen-and-replay restores exactly the set as of the last
//! successful commit, and a torn trailing record is truncated away rather
//! than failing the open.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;

use terna::{Criteria, Options, TermId, Triple, TripleStore};

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

#[test]
fn unflushed_commits_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let mut expected = BTreeSet::new();
    {
        let store = TripleStore::open(&path, test_options()).unwrap();
        for i in 0..40u64 {
            let triple = t(i % 5 + 1, 1, i + 1);
            store.add_fact(triple).unwrap();
            expected.insert(triple);
        }
        // Dropping without flush simulates a crash after commit: the data
        // lives only in the WAL. Forget the store's own cleanup by leaking
        // is unnecessary; close() flushes, so instead reopen from a copy of
        // the pre-close state.
        let wal_bytes = std::fs::read(store.paths().wal.clone()).unwrap();
        let data_bytes = std::fs::read(store.paths().data.clone()).unwrap();
        store.close().unwrap();
        // Restore the pre-flush WAL and data file, as a crash would have
        // left them.
        std::fs::write(store.paths().wal.clone(), wal_bytes).unwrap();
        std::fs::write(store.paths().data.clone(), data_bytes).unwrap();
        // The manifest now references flushed pages from close(); remove the
        // pages directory to reproduce the crashed layout exactly.
        std::fs::remove_dir_all(&store.paths().pages_dir).unwrap();
    }
    let store = TripleStore::open(&path, test_options()).unwrap();
    let all: BTreeSet<Triple> = store.query(&Criteria::any()).unwrap().into_iter().collect();
    assert_eq!(all, expected);
    store.close().unwrap();
}

#[test]
fn torn_tail_record_is_truncated_and_earlier_commits_survive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let wal_path;
    let mut expected = BTreeSet::new();
    {
        let store = TripleStore::open(&path, test_options()).unwrap();
        wal_path = store.paths().wal.clone();
        for i in 0..10u64 {
            let triple = t(i + 1, 2, 3);
            store.add_fact(triple).unwrap();
            expected.insert(triple);
        }
        // Keep the WAL: snapshot it, let close() flush, then restore.
        let wal_bytes = std::fs::read(&wal_path).unwrap();
        let data_bytes = std::fs::read(&store.paths().data).unwrap();
        let pages_dir = store.paths().pages_dir.clone();
        store.close().unwrap();
        std::fs::write(&wal_path, wal_bytes).unwrap();
        std::fs::write(&store.paths().data, data_bytes).unwrap();
        std::fs::remove_dir_all(&pages_dir).unwrap();
    }

    // Simulate a crash mid-append: half a record frame at the tail.
    {
        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&[0x00, 0x00, 0x00, 0x21, 0xAA, 0xBB]).unwrap();
        file.sync_all().unwrap();
    }
    let torn_len = std::fs::metadata(&wal_path).unwrap().len();

    let store = TripleStore::open(&path, test_options()).unwrap();
    let all: BTreeSet<Triple> = store.query(&Criteria::any()).unwrap().into_iter().collect();
    assert_eq!(all, expected, "torn tail must not change the committed set");
    assert!(
        std::fs::metadata(&wal_path).unwrap().len() < torn_len,
        "tail-safe truncation should have removed the torn bytes"
    );
    store.close().unwrap();
}

#[test]
fn reopen_after_clean_close_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let mut expected = BTreeSet::new();
    {
        let store = TripleStore::open(&path, test_options()).unwrap();
        for i in 0..25u64 {
            let triple = t(i % 3 + 1, i % 4 + 1, i + 1);
            store.add_fact(triple).unwrap();
            expected.insert(triple);
        }
        store.close().unwrap();
    }
    let store = TripleStore::open(&path, test_options()).unwrap();
    let all: BTreeSet<Triple> = store.query(&Criteria::any()).unwrap().into_iter().collect();
    assert_eq!(all, expected);
    // A clean close flushed everything; the WAL holds no records.
    let wal_len = std::fs::metadata(&store.paths().wal).unwrap().len();
    assert!(wal_len <= 32, "clean close should leave an empty WAL");
    store.close().unwrap();
}
