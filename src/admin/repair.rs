use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::admin::check::scan_pages;
use crate::admin::options::AdminOpenOptions;
use crate::admin::{AdminError, Result};
use crate::db::{datafile, DbPaths};
use crate::primitives::io::{sync_dir, FileIo, StdFileIo};
use crate::primitives::lock::LockFile;
use crate::storage::index::PagedIndexWriter;
use crate::storage::manifest::{ordering_file_name, Manifest, OrphanFile};
use crate::types::{TermId, TernaError, Triple, TripleOrder};

/// One `(ordering, primary)` pair rebuilt by a repair run.
#[derive(Clone, Debug, Serialize)]
pub struct RebuiltPrimary {
    /// Ordering that was repaired.
    pub order: TripleOrder,
    /// Primary whose pages were rebuilt.
    pub primary: TermId,
}

/// Report of a repair run.
#[derive(Clone, Debug, Serialize)]
pub struct RepairReport {
    /// `pages-fast` or `orders`.
    pub mode: &'static str,
    /// Inconsistencies found before repairing.
    pub findings_before: usize,
    /// Pairs rebuilt from the authoritative triple set.
    pub rebuilt: Vec<RebuiltPrimary>,
    /// Fresh pages written.
    pub pages_written: usize,
    /// Whether a post-repair scan came back clean.
    pub ok_after: bool,
    /// Epoch after the repair.
    pub epoch: u64,
}

fn authoritative_union(intact: &[BTreeSet<Triple>; 3]) -> BTreeSet<Triple> {
    // Every committed triple is present in all three orderings, so any
    // intact copy is ground truth. Corruption is rebuilt from these copies,
    // never guessed at.
    intact.iter().flatten().copied().collect()
}

/// Reconstructs only the corrupted `(ordering, primary)` pairs from the
/// authoritative triple set, splices the fresh descriptors into the
/// manifest, and bumps the epoch. Pages of unaffected primaries are left
/// byte-identical.
pub fn repair_corrupted_pages_fast(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
) -> Result<RepairReport> {
    let _ = opts;
    let paths = DbPaths::for_db(path.as_ref());
    if !paths.data.exists() {
        return Err(AdminError::missing_database(&paths.data));
    }
    let _lock = LockFile::acquire(&paths.lock).map_err(AdminError::Core)?;
    let salt = datafile::read_salt(&paths.data).map_err(AdminError::Core)?;
    let mut manifest = Manifest::load(&paths.pages_dir).map_err(AdminError::Core)?;
    let scan = scan_pages(&paths.pages_dir, salt, &manifest)?;
    if scan.corrupt.is_empty() {
        return Ok(RepairReport {
            mode: "pages-fast",
            findings_before: 0,
            rebuilt: Vec::new(),
            pages_written: 0,
            ok_after: true,
            epoch: manifest.epoch.0,
        });
    }

    let authoritative = authoritative_union(&scan.intact_triples);
    let codec = manifest.compression.codec.page_codec();
    let mut rebuilt = Vec::new();
    let mut pages_written = 0usize;
    for &(slot, primary) in &scan.corrupt {
        let order = TripleOrder::ALL[slot];
        let replacement: Vec<Triple> = authoritative
            .iter()
            .filter(|t| order.primary(t) == primary)
            .copied()
            .collect();
        let descriptors = if replacement.is_empty() {
            Vec::new()
        } else {
            let lookup = manifest.lookup(order);
            let io = StdFileIo::open(paths.pages_dir.join(lookup.file_name()))
                .map_err(AdminError::Core)?;
            let mut writer = PagedIndexWriter::new(order, manifest.page_size, codec, salt);
            for t in &replacement {
                writer.push(*t);
            }
            let descriptors = writer.finalize(&io).map_err(AdminError::Core)?;
            io.sync_all().map_err(AdminError::Core)?;
            descriptors
        };
        pages_written += descriptors.len();
        manifest.lookup_mut(order).replace_primary(primary, descriptors);
        rebuilt.push(RebuiltPrimary { order, primary });
    }

    manifest.bump_epoch();
    manifest.store(&paths.pages_dir).map_err(AdminError::Core)?;

    let rescan = scan_pages(&paths.pages_dir, salt, &manifest)?;
    let report = RepairReport {
        mode: "pages-fast",
        findings_before: scan.findings.len(),
        rebuilt,
        pages_written,
        ok_after: rescan.findings.is_empty(),
        epoch: manifest.epoch.0,
    };
    info!(
        findings = report.findings_before,
        rebuilt = report.rebuilt.len(),
        pages = report.pages_written,
        ok_after = report.ok_after,
        "admin.repair.pages_fast.completed"
    );
    Ok(report)
}

/// Rebuilds every ordering that holds corruption wholesale, into a fresh
/// generation file, from the authoritative triple set. Orderings without
/// findings are left untouched.
pub fn repair_corrupted_orders(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
) -> Result<RepairReport> {
    let _ = opts;
    let paths = DbPaths::for_db(path.as_ref());
    if !paths.data.exists() {
        return Err(AdminError::missing_database(&paths.data));
    }
    let _lock = LockFile::acquire(&paths.lock).map_err(AdminError::Core)?;
    let salt = datafile::read_salt(&paths.data).map_err(AdminError::Core)?;
    let mut manifest = Manifest::load(&paths.pages_dir).map_err(AdminError::Core)?;
    let scan = scan_pages(&paths.pages_dir, salt, &manifest)?;
    if scan.corrupt.is_empty() {
        return Ok(RepairReport {
            mode: "orders",
            findings_before: 0,
            rebuilt: Vec::new(),
            pages_written: 0,
            ok_after: true,
            epoch: manifest.epoch.0,
        });
    }

    let authoritative = authoritative_union(&scan.intact_triples);
    let affected: BTreeSet<usize> = scan.corrupt.iter().map(|&(slot, _)| slot).collect();
    let codec = manifest.compression.codec.page_codec();
    let mut rebuilt = Vec::new();
    let mut pages_written = 0usize;
    for &slot in &affected {
        let order = TripleOrder::ALL[slot];
        let old_generation = manifest.lookup(order).generation;
        let old_path = paths
            .pages_dir
            .join(ordering_file_name(order, old_generation));
        let old_bytes = std::fs::metadata(&old_path).map(|m| m.len()).unwrap_or(0);

        let new_generation = old_generation + 1;
        let final_name = ordering_file_name(order, new_generation);
        let tmp_path = paths.pages_dir.join(format!("{final_name}.tmp"));
        match std::fs::remove_file(&tmp_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(AdminError::Io(err)),
        }
        let io = StdFileIo::open(&tmp_path).map_err(AdminError::Core)?;
        let mut writer = PagedIndexWriter::new(order, manifest.page_size, codec, salt);
        for t in &authoritative {
            writer.push(*t);
        }
        let descriptors = writer.finalize(&io).map_err(AdminError::Core)?;
        io.sync_all().map_err(AdminError::Core)?;
        pages_written += descriptors.len();
        std::fs::rename(&tmp_path, paths.pages_dir.join(&final_name))
            .map_err(|err| AdminError::Core(TernaError::Io(err)))?;
        sync_dir(&paths.pages_dir).map_err(AdminError::Core)?;

        let lookup = manifest.lookup_mut(order);
        lookup.generation = new_generation;
        lookup.pages = descriptors;
        manifest.orphans.push(OrphanFile {
            order,
            generation: old_generation,
            superseded_at: manifest.epoch,
            bytes: old_bytes,
        });
        for primary in scan
            .corrupt
            .iter()
            .filter(|&&(s, _)| s == slot)
            .map(|&(_, primary)| primary)
        {
            rebuilt.push(RebuiltPrimary { order, primary });
        }
    }

    manifest.bump_epoch();
    manifest.store(&paths.pages_dir).map_err(AdminError::Core)?;

    let rescan = scan_pages(&paths.pages_dir, salt, &manifest)?;
    let report = RepairReport {
        mode: "orders",
        findings_before: scan.findings.len(),
        rebuilt,
        pages_written,
        ok_after: rescan.findings.is_empty(),
        epoch: manifest.epoch.0,
    };
    info!(
        findings = report.findings_before,
        orders = affected.len(),
        pages = report.pages_written,
        ok_after = report.ok_after,
        "admin.repair.orders.completed"
    );
    Ok(report)
}
