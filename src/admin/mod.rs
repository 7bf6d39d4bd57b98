#![forbid(unsafe_code)]

//! Database administration and maintenance utilities.
//!
//! Each operation is a thin, self-contained entry point invoked by the CLI:
//! integrity checking, selective repair, auto-compaction, statistics, and
//! remembered-transaction reporting. Every operation returns a `Serialize`
//! report struct.

mod check;
mod compact;
mod error;
mod options;
mod repair;
mod stats;
mod txids;

pub use check::{check, CheckFinding, CheckReport};
pub use compact::{auto_compact, AutoCompactReport};
pub use error::{AdminError, Result};
pub use options::AdminOpenOptions;
pub use repair::{
    repair_corrupted_orders, repair_corrupted_pages_fast, RebuiltPrimary, RepairReport,
};
pub use stats::{
    stats, DictSection, FilesystemStats, ManifestSection, OrderStats, StagingSection, StatsReport,
};
pub use txids::{txids, TxIdsReport};
