#![allow(missing_docs)]

//! Cross-index consistency: committed triples are reachable with identical
//! results through all three orderings, whatever key subset drives the
//! query.

use std::collections::BTreeSet;

use proptest::prelude::*;
use terna::{Criteria, Options, TermId, Triple, TripleStore};

fn test_options() -> Options {
    Options {
        durable_commits: false,
        start_registry: false,
        page_size: 16,
        ..Options::default()
    }
}

fn t(s: u64, p: u64, o: u64) -> Triple {
    Triple::new(TermId(s), TermId(p), TermId(o))
}

#[test]
fn every_key_subset_sees_the_same_facts() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), test_options()).unwrap();

    let mut expected = BTreeSet::new();
    for i in 0..500u64 {
        let triple = t(i % 25 + 1, i % 7 + 1, i % 50 + 1);
        store.add_fact(triple).unwrap();
        expected.insert(triple);
    }
    store.flush().unwrap();

    // Full scan is served by the subject-led ordering.
    let all: BTreeSet<Triple> = store.query(&Criteria::any()).unwrap().into_iter().collect();
    assert_eq!(all, expected);

    // Rebuild the full set through each single-key access path.
    for (build, count_key) in [
        (
            (1..=25u64)
                .flat_map(|s| {
                    store
                        .query(&Criteria::any().with_s(TermId(s)))
                        .unwrap()
                })
                .collect::<BTreeSet<Triple>>(),
            "subject",
        ),
        (
            (1..=7u64)
                .flat_map(|p| {
                    store
                        .query(&Criteria::any().with_p(TermId(p)))
                        .unwrap()
                })
                .collect::<BTreeSet<Triple>>(),
            "predicate",
        ),
        (
            (1..=50u64)
                .flat_map(|o| {
                    store
                        .query(&Criteria::any().with_o(TermId(o)))
                        .unwrap()
                })
                .collect::<BTreeSet<Triple>>(),
            "object",
        ),
    ] {
        assert_eq!(build, expected, "{count_key}-led rebuild diverged");
    }

    // Two-key and exact lookups agree with a filtered full scan.
    for triple in expected.iter().take(40) {
        let sp = store
            .query(&Criteria::any().with_s(triple.s).with_p(triple.p))
            .unwrap();
        let filtered: Vec<Triple> = expected
            .iter()
            .filter(|t| t.s == triple.s && t.p == triple.p)
            .copied()
            .collect();
        assert_eq!(sp, filtered);
        assert!(store.contains_fact(triple).unwrap());
    }
    store.close().unwrap();
}

#[test]
fn deletes_are_consistent_across_orderings() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path().join("db"), test_options()).unwrap();
    for i in 0..60u64 {
        store.add_fact(t(i % 6 + 1, i % 3 + 1, i + 1)).unwrap();
    }
    store.flush().unwrap();

    let victim = t(1, 1, 1);
    assert!(store.contains_fact(&victim).unwrap());
    store.delete_fact(victim).unwrap();
    store.flush().unwrap();

    assert!(store
        .query(&Criteria::any().with_s(victim.s))
        .unwrap()
        .iter()
        .all(|found| *found != victim));
    assert!(store
        .query(&Criteria::any().with_p(victim.p))
        .unwrap()
        .iter()
        .all(|found| *found != victim));
    assert!(store
        .query(&Criteria::any().with_o(victim.o))
        .unwrap()
        .iter()
        .all(|found| *found != victim));
    store.close().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn random_write_sets_stay_consistent(
        ops in prop::collection::vec(
            ((1u64..20, 1u64..6, 1u64..20), prop::bool::weighted(0.8)),
            1..120,
        )
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = TripleStore::open(dir.path().join("db"), test_options()).unwrap();
        let mut model: BTreeSet<Triple> = BTreeSet::new();
        for ((s, p, o), is_put) in ops {
            let triple = t(s, p, o);
            if is_put {
                store.add_fact(triple).unwrap();
                model.insert(triple);
            } else {
                store.delete_fact(triple).unwrap();
                model.remove(&triple);
            }
        }
        store.flush().unwrap();

        let all: BTreeSet<Triple> =
            store.query(&Criteria::any()).unwrap().into_iter().collect();
        prop_assert_eq!(&all, &model);

        let by_p: BTreeSet<Triple> = (1u64..6)
            .flat_map(|p| store.query(&Criteria::any().with_p(TermId(p))).unwrap())
            .collect();
        prop_assert_eq!(&by_p, &model);

        let by_o: BTreeSet<Triple> = (1u64..20)
            .flat_map(|o| store.query(&Criteria::any().with_o(TermId(o))).unwrap())
            .collect();
        prop_assert_eq!(&by_o, &model);
        store.close().unwrap();
    }
}
