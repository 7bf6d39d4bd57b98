//! Terna is an embedded persistent storage engine for triple-based graph
//! databases: three disk-backed orderings over `(subject, predicate, object)`
//! facts, a write-ahead log for durability, epoch-based snapshot isolation,
//! hotness-driven compaction, and crash-repair tooling.
//!
//! The library surface consumed by query engines is [`db::TripleStore`]:
//! `add_fact`/`delete_fact`, batch transactions, `query`/`stream_query`, and
//! `with_snapshot`. Everything else (WAL, paged indexes, manifest, reader
//! registry) sits below that facade.

#![warn(missing_docs)]

pub mod admin;
pub mod db;
pub mod primitives;
pub mod registry;
pub mod storage;
pub mod types;

pub use db::{Options, QueryCursor, SnapshotView, TripleStore};
pub use types::{
    Criteria, Epoch, Result, SessionId, TermId, TernaError, Triple, TripleOrder, TxId,
};
