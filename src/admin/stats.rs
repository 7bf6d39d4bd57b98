use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::{AdminError, Result};
use crate::db::{datafile, DbPaths};
use crate::primitives::io::StdFileIo;
use crate::storage::manifest::Manifest;
use crate::storage::wal::{Wal, WAL_HEADER_LEN};
use crate::types::TripleOrder;

/// Full statistics report for one database.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// On-disk footprint.
    pub filesystem: FilesystemStats,
    /// Manifest-level layout statistics.
    pub manifest: ManifestSection,
    /// Staged-but-unflushed write statistics.
    pub staging: StagingSection,
    /// Dictionary statistics.
    pub dict: DictSection,
}

/// File sizes of the database's on-disk pieces.
#[derive(Debug, Clone, Serialize)]
pub struct FilesystemStats {
    /// Primary data file path.
    pub db_path: String,
    /// Primary data file size in bytes.
    pub db_size_bytes: u64,
    /// WAL path.
    pub wal_path: String,
    /// WAL size in bytes.
    pub wal_size_bytes: u64,
    /// Pages directory path.
    pub pages_dir: String,
    /// Total bytes under the pages directory.
    pub pages_size_bytes: u64,
}

/// Layout statistics from the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestSection {
    /// Current epoch.
    pub epoch: u64,
    /// Page capacity in triples.
    pub page_size: u32,
    /// Configured page codec.
    pub codec: String,
    /// Logically deleted triples awaiting compaction.
    pub tombstones: usize,
    /// Remembered flushed transaction ids.
    pub remembered_tx: usize,
    /// Superseded generation files awaiting reclamation.
    pub orphans: usize,
    /// Per-ordering statistics.
    pub orders: Vec<OrderStats>,
}

/// Statistics for one ordering.
#[derive(Debug, Clone, Serialize)]
pub struct OrderStats {
    /// Ordering name.
    pub order: TripleOrder,
    /// Live generation.
    pub generation: u64,
    /// Live page count.
    pub pages: usize,
    /// Distinct primaries with pages.
    pub primaries: usize,
    /// Bytes referenced by live descriptors.
    pub live_bytes: u64,
    /// Size of the generation file (dead bytes included).
    pub file_bytes: u64,
}

/// Staged write statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StagingSection {
    /// Adds persisted in the data file's staged section.
    pub persisted_adds: usize,
    /// Removes persisted in the data file's staged section.
    pub persisted_removes: usize,
    /// Records currently in the WAL.
    pub wal_records: usize,
}

/// Dictionary statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DictSection {
    /// Interned terms.
    pub terms: usize,
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// Gathers filesystem, manifest, staging, and dictionary statistics without
/// taking the writer lock.
pub fn stats(path: impl AsRef<Path>, _opts: &AdminOpenOptions) -> Result<StatsReport> {
    let paths = DbPaths::for_db(path.as_ref());
    if !paths.data.exists() {
        return Err(AdminError::missing_database(&paths.data));
    }
    let data = datafile::read_data_file(&paths.data).map_err(AdminError::Core)?;
    let manifest = Manifest::load(&paths.pages_dir).map_err(AdminError::Core)?;

    let wal_records = match fs::metadata(&paths.wal) {
        Ok(meta) if meta.len() >= WAL_HEADER_LEN as u64 => {
            let io = StdFileIo::open_readonly(&paths.wal).map_err(AdminError::Core)?;
            let wal = Wal::open(Arc::new(io), data.salt).map_err(AdminError::Core)?;
            wal.replay().map_err(AdminError::Core)?.records.len()
        }
        _ => 0,
    };

    let orders = TripleOrder::ALL
        .iter()
        .map(|&order| {
            let lookup = manifest.lookup(order);
            let file_bytes = fs::metadata(paths.pages_dir.join(lookup.file_name()))
                .map(|m| m.len())
                .unwrap_or(0);
            OrderStats {
                order,
                generation: lookup.generation,
                pages: lookup.pages.len(),
                primaries: lookup.primaries().len(),
                live_bytes: lookup.live_bytes(),
                file_bytes,
            }
        })
        .collect();

    Ok(StatsReport {
        filesystem: FilesystemStats {
            db_path: paths.data.display().to_string(),
            db_size_bytes: fs::metadata(&paths.data).map(|m| m.len()).unwrap_or(0),
            wal_path: paths.wal.display().to_string(),
            wal_size_bytes: fs::metadata(&paths.wal).map(|m| m.len()).unwrap_or(0),
            pages_dir: paths.pages_dir.display().to_string(),
            pages_size_bytes: dir_size(&paths.pages_dir),
        },
        manifest: ManifestSection {
            epoch: manifest.epoch.0,
            page_size: manifest.page_size,
            codec: format!("{:?}", manifest.compression.codec).to_lowercase(),
            tombstones: manifest.tombstones.len(),
            remembered_tx: manifest.tx_ids.len(),
            orphans: manifest.orphans.len(),
            orders,
        },
        staging: StagingSection {
            persisted_adds: data.overlay.adds.len(),
            persisted_removes: data.overlay.removes.len(),
            wal_records,
        },
        dict: DictSection {
            terms: data.dict.len(),
        },
    })
}
