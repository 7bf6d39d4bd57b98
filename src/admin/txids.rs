use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::{AdminError, Result};
use crate::db::{datafile, DbPaths};
use crate::primitives::io::StdFileIo;
use crate::storage::manifest::Manifest;
use crate::storage::wal::{Wal, WalRecord, WAL_HEADER_LEN};

/// Remembered transaction ids, split by where they currently live.
#[derive(Debug, Clone, Serialize)]
pub struct TxIdsReport {
    /// Ids whose effects reached the paged indexes; committing them again is
    /// an idempotent no-op.
    pub flushed: Vec<u64>,
    /// Ids committed in the WAL but not yet flushed.
    pub pending: Vec<u64>,
}

/// Reports the bounded remembered set from the manifest plus commits still
/// sitting in the WAL.
pub fn txids(path: impl AsRef<Path>, _opts: &AdminOpenOptions) -> Result<TxIdsReport> {
    let paths = DbPaths::for_db(path.as_ref());
    if !paths.data.exists() {
        return Err(AdminError::missing_database(&paths.data));
    }
    let salt = datafile::read_salt(&paths.data).map_err(AdminError::Core)?;
    let manifest = Manifest::load(&paths.pages_dir).map_err(AdminError::Core)?;
    let flushed: Vec<u64> = manifest.tx_ids.iter().map(|tx| tx.0).collect();
    let flushed_set: BTreeSet<u64> = flushed.iter().copied().collect();

    let mut pending = BTreeSet::new();
    if let Ok(meta) = fs::metadata(&paths.wal) {
        if meta.len() >= WAL_HEADER_LEN as u64 {
            let io = StdFileIo::open_readonly(&paths.wal).map_err(AdminError::Core)?;
            let wal = Wal::open(Arc::new(io), salt).map_err(AdminError::Core)?;
            for record in wal.replay().map_err(AdminError::Core)?.records {
                if let WalRecord::Commit { tx, .. } = record {
                    if !flushed_set.contains(&tx.0) {
                        pending.insert(tx.0);
                    }
                }
            }
        }
    }

    Ok(TxIdsReport {
        flushed,
        pending: pending.into_iter().collect(),
    })
}
