#![allow(missing_docs)]

//! Corruption detection and minimal-blast-radius repair: a single flipped
//! byte is detected and named exactly, fast repair rebuilds only the
//! affected primary, and pages of unrelated primaries stay byte-identical.

use std::collections::{BTreeMap, BTreeSet};

use terna::admin::{self, AdminOpenOptions};
use terna::storage::manifest::Manifest;
use terna::{Criteria, Options, TermId, Triple, TripleOrder, TripleStore};

fn test_options() -> Options {
    Options {
        durable_commits: false,
        start_registry: false,
        page_size: 64,
        ..Options::default()
    }
}

fn t(s: u64, p: u64, o: u64) -> Triple {
    Triple::new(TermId(s), TermId(p), TermId(o))
}

#[test]
fn clean_database_checks_ok() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let store = TripleStore::open(&path, test_options()).unwrap();
        for i in 0..200u64 {
            store.add_fact(t(i % 10 + 1, i % 4 + 1, i + 1)).unwrap();
        }
        store.close().unwrap();
    }
    let report = admin::check(&path, &AdminOpenOptions::default(), true).unwrap();
    assert!(report.ok);
    assert!(report.findings.is_empty());
    assert!(report.pages_scanned > 0);
}

#[test]
fn single_byte_corruption_detected_repaired_and_blast_radius_minimal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let opts = AdminOpenOptions::default();

    // 10,000 triples with subjects cycling over 100 distinct values.
    let mut expected_p1: BTreeSet<Triple> = BTreeSet::new();
    {
        let store = TripleStore::open(&path, test_options()).unwrap();
        store.begin_batch(None, None).unwrap();
        for i in 0..10_000u64 {
            let triple = t(i % 100 + 1, i % 10 + 1, i + 1);
            store.add_fact(triple).unwrap();
            if triple.p == TermId(1) {
                expected_p1.insert(triple);
            }
        }
        store.commit_batch(false).unwrap();
        store.flush().unwrap();

        let by_p1: BTreeSet<Triple> = store
            .query(&Criteria::any().with_p(TermId(1)))
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(by_p1.len(), 1000);
        assert_eq!(by_p1, expected_p1);
        store.close().unwrap();
    }

    let pages_dir = terna::db::DbPaths::for_db(&path).pages_dir;
    let manifest = Manifest::load(&pages_dir).unwrap();
    let spo = manifest.lookup(TripleOrder::Spo);
    let spo_file = pages_dir.join(spo.file_name());
    let victim = spo.pages[spo.pages.len() / 2];

    // Remember the exact bytes of every other page in the subject-led file.
    let file_before = std::fs::read(&spo_file).unwrap();
    let mut untouched: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
    for desc in &spo.pages {
        if desc.primary != victim.primary {
            let start = desc.offset as usize;
            untouched.insert(desc.offset, file_before[start..start + desc.length as usize].to_vec());
        }
    }

    // Corrupt exactly one byte inside the victim page.
    let mut bytes = file_before.clone();
    let flip = victim.offset as usize + victim.length as usize - 1;
    bytes[flip] ^= 0x01;
    std::fs::write(&spo_file, &bytes).unwrap();

    let report = admin::check(&path, &opts, true).unwrap();
    assert!(!report.ok);
    assert_eq!(report.findings.len(), 1, "exactly one pair must be named");
    assert_eq!(report.findings[0].order, TripleOrder::Spo);
    assert_eq!(report.findings[0].primary, victim.primary);

    let repair = admin::repair_corrupted_pages_fast(&path, &opts).unwrap();
    assert!(repair.ok_after);
    assert_eq!(repair.findings_before, 1);
    assert!(repair
        .rebuilt
        .iter()
        .any(|r| r.order == TripleOrder::Spo && r.primary == victim.primary));

    let report = admin::check(&path, &opts, true).unwrap();
    assert!(report.ok, "post-repair strict check must pass");

    // Pages of unrelated primaries are byte-identical to before the repair.
    let file_after = std::fs::read(&spo_file).unwrap();
    for (offset, before) in &untouched {
        let start = *offset as usize;
        assert_eq!(
            &file_after[start..start + before.len()],
            before.as_slice(),
            "unrelated page at offset {offset} changed"
        );
    }

    // The same predicate query returns the identical result set.
    let store = TripleStore::open(&path, test_options()).unwrap();
    let by_p1: BTreeSet<Triple> = store
        .query(&Criteria::any().with_p(TermId(1)))
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(by_p1, expected_p1);
    store.close().unwrap();
}

#[test]
fn repair_whole_orders_rebuilds_into_new_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let opts = AdminOpenOptions::default();
    {
        let store = TripleStore::open(&path, test_options()).unwrap();
        for i in 0..500u64 {
            store.add_fact(t(i % 20 + 1, i % 5 + 1, i + 1)).unwrap();
        }
        store.close().unwrap();
    }

    let pages_dir = terna::db::DbPaths::for_db(&path).pages_dir;
    let manifest = Manifest::load(&pages_dir).unwrap();
    let pos = manifest.lookup(TripleOrder::Pos);
    let pos_file = pages_dir.join(pos.file_name());
    let old_generation = pos.generation;
    let victim = pos.pages[0];

    let mut bytes = std::fs::read(&pos_file).unwrap();
    bytes[victim.offset as usize + 50] ^= 0xFF;
    std::fs::write(&pos_file, &bytes).unwrap();

    let report = admin::repair_corrupted_orders(&path, &opts).unwrap();
    assert!(report.ok_after);
    assert_eq!(report.mode, "orders");

    let manifest = Manifest::load(&pages_dir).unwrap();
    let pos = manifest.lookup(TripleOrder::Pos);
    assert_eq!(pos.generation, old_generation + 1);
    assert!(manifest
        .orphans
        .iter()
        .any(|o| o.order == TripleOrder::Pos && o.generation == old_generation));

    let check = admin::check(&path, &opts, true).unwrap();
    assert!(check.ok);

    let store = TripleStore::open(&path, test_options()).unwrap();
    assert_eq!(store.query(&Criteria::any()).unwrap().len(), 500);
    store.close().unwrap();
}
