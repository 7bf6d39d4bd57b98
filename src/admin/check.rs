use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::{AdminError, Result};
use crate::db::{datafile, DbPaths};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::storage::manifest::Manifest;
use crate::storage::page::decode_page;
use crate::types::{TermId, Triple, TripleOrder};

/// One page-level inconsistency, keyed by the ordering and primary it
/// affects.
#[derive(Clone, Debug, Serialize)]
pub struct CheckFinding {
    /// Ordering the damaged page belongs to.
    pub order: TripleOrder,
    /// Primary value of the damaged page.
    pub primary: TermId,
    /// Human-readable description of the inconsistency.
    pub message: String,
}

/// Report of an integrity check.
#[derive(Clone, Debug, Serialize)]
pub struct CheckReport {
    /// Whether the strict cross-ordering comparison ran.
    pub strict: bool,
    /// `true` iff no inconsistency was found.
    pub ok: bool,
    /// Inconsistencies, one per affected `(ordering, primary)`.
    pub findings: Vec<CheckFinding>,
    /// Pages visited.
    pub pages_scanned: u64,
    /// Triples read from intact pages.
    pub triples_scanned: u64,
    /// Manifest epoch the check ran against.
    pub epoch: u64,
}

pub(crate) struct PageScan {
    pub findings: Vec<CheckFinding>,
    pub intact_triples: [BTreeSet<Triple>; 3],
    pub corrupt: BTreeSet<(usize, TermId)>,
    pub pages_scanned: u64,
    pub triples_scanned: u64,
}

pub(crate) fn scan_pages(
    pages_dir: &Path,
    salt: u64,
    manifest: &Manifest,
) -> Result<PageScan> {
    let mut scan = PageScan {
        findings: Vec::new(),
        intact_triples: [BTreeSet::new(), BTreeSet::new(), BTreeSet::new()],
        corrupt: BTreeSet::new(),
        pages_scanned: 0,
        triples_scanned: 0,
    };
    for order in TripleOrder::ALL {
        let lookup = manifest.lookup(order);
        if lookup.pages.is_empty() {
            continue;
        }
        let io = match StdFileIo::open_readonly(pages_dir.join(lookup.file_name())) {
            Ok(io) => io,
            Err(err) => {
                for desc in &lookup.pages {
                    push_finding(
                        &mut scan,
                        order,
                        desc.primary,
                        format!("ordering file unreadable: {err}"),
                    );
                }
                continue;
            }
        };
        for desc in &lookup.pages {
            scan.pages_scanned += 1;
            let mut buf = vec![0u8; desc.length as usize];
            if let Err(err) = io.read_at(desc.offset, &mut buf) {
                push_finding(&mut scan, order, desc.primary, format!("page unreadable: {err}"));
                continue;
            }
            let frame = match decode_page(&buf, salt) {
                Ok(frame) => frame,
                Err(err) => {
                    push_finding(&mut scan, order, desc.primary, err.to_string());
                    continue;
                }
            };
            if frame.order != order {
                push_finding(
                    &mut scan,
                    order,
                    desc.primary,
                    "page carries the wrong ordering tag".to_string(),
                );
                continue;
            }
            if frame.primary != desc.primary {
                push_finding(
                    &mut scan,
                    order,
                    desc.primary,
                    format!(
                        "page primary {} does not match descriptor {}",
                        frame.primary, desc.primary
                    ),
                );
                continue;
            }
            if frame.triples.len() > manifest.page_size as usize {
                push_finding(
                    &mut scan,
                    order,
                    desc.primary,
                    format!(
                        "page holds {} triples, capacity is {}",
                        frame.triples.len(),
                        manifest.page_size
                    ),
                );
                continue;
            }
            scan.triples_scanned += frame.triples.len() as u64;
            scan.intact_triples[order.slot()].extend(frame.triples);
        }
    }
    Ok(scan)
}

fn push_finding(scan: &mut PageScan, order: TripleOrder, primary: TermId, message: String) {
    if scan.corrupt.insert((order.slot(), primary)) {
        scan.findings.push(CheckFinding {
            order,
            primary,
            message,
        });
    }
}

/// Walks every page of every ordering, verifying frame checksums, sort
/// order, primary homogeneity, and descriptor agreement. In strict mode the
/// per-ordering triple sets (net of tombstones) are additionally compared
/// against each other. Corruption is reported, never repaired: repair is a
/// separate, explicit invocation.
pub fn check(
    path: impl AsRef<Path>,
    _opts: &AdminOpenOptions,
    strict: bool,
) -> Result<CheckReport> {
    let paths = DbPaths::for_db(path.as_ref());
    if !paths.data.exists() {
        return Err(AdminError::missing_database(&paths.data));
    }
    let salt = datafile::read_salt(&paths.data).map_err(AdminError::Core)?;
    let manifest = Manifest::load(&paths.pages_dir).map_err(AdminError::Core)?;
    let mut scan = scan_pages(&paths.pages_dir, salt, &manifest)?;

    if strict {
        let mut net = [BTreeSet::new(), BTreeSet::new(), BTreeSet::new()];
        for order in TripleOrder::ALL {
            let mut set = scan.intact_triples[order.slot()].clone();
            for t in &manifest.tombstones {
                set.remove(t);
            }
            net[order.slot()] = set;
        }
        let union: BTreeSet<Triple> = net.iter().flatten().copied().collect();
        for order in TripleOrder::ALL {
            for t in union.difference(&net[order.slot()]) {
                let primary = order.primary(t);
                if scan.corrupt.insert((order.slot(), primary)) {
                    scan.findings.push(CheckFinding {
                        order,
                        primary,
                        message: format!(
                            "triple {t} reachable from other orderings is missing here"
                        ),
                    });
                }
            }
        }
    }

    Ok(CheckReport {
        strict,
        ok: scan.findings.is_empty(),
        findings: scan.findings,
        pages_scanned: scan.pages_scanned,
        triples_scanned: scan.triples_scanned,
        epoch: manifest.epoch.0,
    })
}
