use std::path::Path;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::{AdminError, Result};
use crate::db::{CompactReport, GcReport, TripleStore};
use crate::types::TernaError;

/// Report of one `auto-compact` invocation: the compaction cycle plus the
/// garbage-collection pass that follows it.
#[derive(Clone, Debug, Serialize)]
pub struct AutoCompactReport {
    /// Incremental compaction results.
    pub compaction: CompactReport,
    /// Orphan reclamation results.
    pub gc: GcReport,
}

/// Runs one hotness-driven incremental compaction cycle followed by a
/// garbage-collection pass. Without a reachable reader registry the GC pass
/// stays conservative and reclaims nothing.
pub fn auto_compact(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    limit: usize,
) -> Result<AutoCompactReport> {
    let store = match TripleStore::open(path.as_ref(), opts.store.clone()) {
        Ok(store) => store,
        Err(TernaError::NotFound) => {
            return Err(AdminError::missing_database(path.as_ref()));
        }
        Err(err) => return Err(AdminError::Core(err)),
    };
    let compaction = store.compact_incremental(limit).map_err(AdminError::Core)?;
    let gc = store.collect_garbage().map_err(AdminError::Core)?;
    store.close().map_err(AdminError::Core)?;
    Ok(AutoCompactReport { compaction, gc })
}
