#![allow(missing_docs)]

//! The operational CLI is a thin wrapper: every subcommand invokes the
//! corresponding admin operation and prints its JSON report.

use assert_cmd::Command;
use terna::{Options, TermId, Triple, TripleStore, TxId};

fn seeded_db(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("db");
    let store = TripleStore::open(
        &path,
        Options {
            durable_commits: false,
            start_registry: false,
            page_size: 8,
            ..Options::default()
        },
    )
    .unwrap();
    store.begin_batch(Some(TxId(77)), None).unwrap();
    for i in 0..32u64 {
        store
            .add_fact(Triple::new(TermId(i % 4 + 1), TermId(2), TermId(i + 1)))
            .unwrap();
    }
    store.commit_batch(false).unwrap();
    store.close().unwrap();
    path
}

fn terna_cmd() -> Command {
    Command::cargo_bin("terna").unwrap()
}

#[test]
fn check_reports_ok_on_clean_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(dir.path());
    let assert = terna_cmd()
        .arg("check")
        .arg("--strict")
        .arg(&db)
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("\"ok\": true"));
    assert!(stdout.contains("\"strict\": true"));
}

#[test]
fn stats_prints_manifest_and_filesystem_sections() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(dir.path());
    let assert = terna_cmd().arg("stats").arg(&db).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(report["manifest"]["epoch"].as_u64().unwrap() > 0);
    assert_eq!(report["manifest"]["orders"].as_array().unwrap().len(), 3);
    assert!(report["filesystem"]["db_size_bytes"].as_u64().unwrap() > 0);
}

#[test]
fn txids_lists_flushed_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(dir.path());
    let assert = terna_cmd().arg("txids").arg(&db).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let flushed: Vec<u64> = report["flushed"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap())
        .collect();
    assert!(flushed.contains(&77));
}

#[test]
fn auto_compact_runs_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(dir.path());
    let assert = terna_cmd()
        .arg("auto-compact")
        .arg(&db)
        .arg("--limit")
        .arg("4")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["compaction"]["mode"], "incremental");
}

#[test]
fn missing_database_fails_with_error() {
    let dir = tempfile::tempdir().unwrap();
    terna_cmd()
        .arg("stats")
        .arg(dir.path().join("nope"))
        .assert()
        .failure();
}
