#![forbid(unsafe_code)]

//! Hotness-driven compaction, full-ordering rewrites, and reclamation of
//! orphaned generation files.
//!
//! Candidate selection favors high-traffic, fragmented primaries first; the
//! exact weighting is a tunable policy, not a fixed formula. Compaction
//! writes fresh pages, then atomically swaps manifest entries; a manifest
//! write failure is fatal to that cycle only, because the prior manifest
//! stays valid. Superseded generations are deleted only once no live lease
//! pins an epoch that could still read them.

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::storage::index::{PagedIndexReader, PagedIndexWriter};
use crate::storage::manifest::{ordering_file_name, Manifest, OrphanFile};
use crate::storage::HotnessMetrics;
use crate::types::{Result, TermId, TernaError, Triple, TripleOrder};

use super::{open_readers, Shared};

/// Tunable weights for compaction candidate scoring. Only the qualitative
/// goal is contractual: hot, fragmented primaries come first.
#[derive(Clone, Copy, Debug)]
pub struct CompactionPolicy {
    /// Weight of read traffic.
    pub read_weight: f64,
    /// Weight of write traffic.
    pub write_weight: f64,
    /// Weight of fragmentation (extra pages plus tombstone hits).
    pub frag_weight: f64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            read_weight: 1.0,
            write_weight: 2.0,
            frag_weight: 4.0,
        }
    }
}

impl CompactionPolicy {
    fn score(&self, reads: u64, writes: u64, fragmentation: u64) -> f64 {
        self.read_weight * reads as f64
            + self.write_weight * writes as f64
            + self.frag_weight * fragmentation as f64
    }
}

/// Background auto-compaction configuration.
#[derive(Clone, Copy, Debug)]
pub struct AutoCompactConfig {
    /// Pause between cycles when nothing triggers one explicitly.
    pub interval: Duration,
    /// Candidate budget per cycle.
    pub limit: usize,
}

impl Default for AutoCompactConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            limit: 8,
        }
    }
}

/// Report of one compaction run.
#[derive(Clone, Debug, Serialize)]
pub struct CompactReport {
    /// `incremental` or `full`.
    pub mode: &'static str,
    /// Candidates considered.
    pub candidates: usize,
    /// Primaries whose pages were rewritten.
    pub primaries_rewritten: usize,
    /// Fresh pages written.
    pub pages_written: usize,
    /// Tombstoned triples physically dropped from rewritten pages.
    pub triples_dropped: u64,
    /// Tombstone entries retired because no ordering holds them anymore.
    pub tombstones_retired: usize,
    /// Epoch after the run.
    pub epoch: u64,
}

/// Report of one garbage-collection pass.
#[derive(Clone, Debug, Serialize)]
pub struct GcReport {
    /// True when the registry was unreachable and nothing was reclaimed.
    pub conservative: bool,
    /// Orphan files deleted.
    pub files_removed: usize,
    /// Bytes those files held.
    pub bytes_reclaimed: u64,
    /// Orphans still waiting on leases.
    pub orphans_remaining: usize,
    /// Smallest pinned epoch observed, when the registry answered.
    pub min_pinned_epoch: Option<u64>,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    order: TripleOrder,
    primary: TermId,
    score: f64,
}

fn select_candidates(
    manifest: &Manifest,
    metrics: &HotnessMetrics,
    policy: &CompactionPolicy,
    limit: usize,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for order in TripleOrder::ALL {
        let lookup = manifest.lookup(order);
        let mut tombstone_hits: rustc_hash::FxHashMap<TermId, u64> =
            rustc_hash::FxHashMap::default();
        for t in &manifest.tombstones {
            *tombstone_hits.entry(order.primary(t)).or_default() += 1;
        }
        let mut footprints: Vec<(TermId, u64, u64)> = Vec::new();
        for desc in &lookup.pages {
            match footprints.last_mut() {
                Some((primary, pages, triples)) if *primary == desc.primary => {
                    *pages += 1;
                    *triples += u64::from(desc.triples);
                }
                _ => footprints.push((desc.primary, 1, u64::from(desc.triples))),
            }
        }
        for (primary, pages, triples) in footprints {
            let hits = tombstone_hits.get(&primary).copied().unwrap_or(0);
            // Pages beyond what the triple count needs, plus pending
            // tombstones, is what a rewrite can actually fix.
            let ideal = triples.div_ceil(u64::from(manifest.page_size)).max(1);
            let fragmentation = pages.saturating_sub(ideal) + hits;
            if fragmentation == 0 {
                continue;
            }
            let counters = metrics.counters(order, primary);
            out.push(Candidate {
                order,
                primary,
                score: policy.score(counters.reads, counters.writes, fragmentation),
            });
        }
    }
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out.truncate(limit);
    out
}

fn retire_tombstones(
    manifest: &mut Manifest,
    readers: &[Arc<PagedIndexReader>; 3],
) -> Result<usize> {
    let mut retired = 0usize;
    let tombstones: Vec<Triple> = manifest.tombstones.iter().copied().collect();
    for t in tombstones {
        let mut still_held = false;
        for reader in readers {
            if reader.contains(&t)? {
                still_held = true;
                break;
            }
        }
        if !still_held {
            manifest.tombstones.remove(&t);
            retired += 1;
        }
    }
    Ok(retired)
}

impl Shared {
    pub(crate) fn compact_incremental(&self, limit: usize) -> Result<CompactReport> {
        let mut state = self.state.write();
        let mut manifest = (*state.manifest).clone();
        let candidates =
            select_candidates(&manifest, &self.metrics, &self.options.compaction, limit);
        if candidates.is_empty() {
            return Ok(CompactReport {
                mode: "incremental",
                candidates: 0,
                primaries_rewritten: 0,
                pages_written: 0,
                triples_dropped: 0,
                tombstones_retired: 0,
                epoch: manifest.epoch.0,
            });
        }

        let codec = manifest.compression.codec.page_codec();
        let mut pages_written = 0usize;
        let mut triples_dropped = 0u64;
        let mut rewritten = 0usize;
        for candidate in &candidates {
            let reader = &state.readers[candidate.order.slot()];
            let mut triples = reader.scan_primary(candidate.primary)?;
            triples.sort_by_key(|t| candidate.order.key(t));
            triples.dedup();
            let before = triples.len();
            triples.retain(|t| !manifest.tombstones.contains(t));
            triples_dropped += (before - triples.len()) as u64;

            let lookup = manifest.lookup(candidate.order).clone();
            if triples.is_empty() {
                manifest
                    .lookup_mut(candidate.order)
                    .replace_primary(candidate.primary, Vec::new());
            } else {
                let io =
                    StdFileIo::open(self.paths.pages_dir.join(lookup.file_name()))?;
                let mut writer = PagedIndexWriter::new(
                    candidate.order,
                    manifest.page_size,
                    codec,
                    self.salt,
                );
                for t in &triples {
                    writer.push(*t);
                }
                let descriptors = writer.finalize(&io)?;
                io.sync_all()?;
                pages_written += descriptors.len();
                manifest
                    .lookup_mut(candidate.order)
                    .replace_primary(candidate.primary, descriptors);
            }
            rewritten += 1;
            debug!(
                order = %candidate.order,
                primary = candidate.primary.0,
                score = candidate.score,
                "compact.incremental.primary"
            );
        }

        let new_readers = open_readers(
            &self.paths.pages_dir,
            &manifest,
            self.salt,
            self.options.cache_pages,
        )?;
        let tombstones_retired = retire_tombstones(&mut manifest, &new_readers)?;
        manifest.bump_epoch();
        manifest.store(&self.paths.pages_dir)?;
        state.readers = new_readers;
        let epoch = manifest.epoch;
        state.manifest = Arc::new(manifest);

        let report = CompactReport {
            mode: "incremental",
            candidates: candidates.len(),
            primaries_rewritten: rewritten,
            pages_written,
            triples_dropped,
            tombstones_retired,
            epoch: epoch.0,
        };
        info!(
            candidates = report.candidates,
            primaries = report.primaries_rewritten,
            pages = report.pages_written,
            dropped = report.triples_dropped,
            epoch = report.epoch,
            "compact.incremental.completed"
        );
        Ok(report)
    }

    pub(crate) fn compact_full(&self, order: TripleOrder) -> Result<CompactReport> {
        let mut state = self.state.write();
        let mut manifest = (*state.manifest).clone();
        let reader = &state.readers[order.slot()];

        let mut survivors: BTreeSet<Triple> = reader.collect_all()?;
        let before = survivors.len();
        for t in &manifest.tombstones {
            survivors.remove(t);
        }
        let triples_dropped = (before - survivors.len()) as u64;

        let old_generation = manifest.lookup(order).generation;
        let old_path = self
            .paths
            .pages_dir
            .join(ordering_file_name(order, old_generation));
        let old_bytes = std::fs::metadata(&old_path).map(|m| m.len()).unwrap_or(0);

        let new_generation = old_generation + 1;
        let final_name = ordering_file_name(order, new_generation);
        let tmp_path = self
            .paths
            .pages_dir
            .join(format!("{final_name}.tmp"));
        match std::fs::remove_file(&tmp_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(TernaError::Io(err)),
        }
        let io = StdFileIo::open(&tmp_path)?;
        let mut writer = PagedIndexWriter::new(
            order,
            manifest.page_size,
            manifest.compression.codec.page_codec(),
            self.salt,
        );
        for t in &survivors {
            writer.push(*t);
        }
        let descriptors = writer.finalize(&io)?;
        io.sync_all()?;
        let pages_written = descriptors.len();
        std::fs::rename(&tmp_path, self.paths.pages_dir.join(&final_name))
            .map_err(TernaError::from)?;
        crate::primitives::io::sync_dir(&self.paths.pages_dir)?;

        {
            let lookup = manifest.lookup_mut(order);
            lookup.generation = new_generation;
            lookup.pages = descriptors;
        }
        manifest.orphans.push(OrphanFile {
            order,
            generation: old_generation,
            // Readers pinned at or below the current epoch may still hold
            // descriptors into the old generation.
            superseded_at: manifest.epoch,
            bytes: old_bytes,
        });

        let new_readers = open_readers(
            &self.paths.pages_dir,
            &manifest,
            self.salt,
            self.options.cache_pages,
        )?;
        let tombstones_retired = retire_tombstones(&mut manifest, &new_readers)?;
        manifest.bump_epoch();
        manifest.store(&self.paths.pages_dir)?;
        state.readers = new_readers;
        let epoch = manifest.epoch;
        state.manifest = Arc::new(manifest);

        let report = CompactReport {
            mode: "full",
            candidates: 1,
            primaries_rewritten: state.readers[order.slot()]
                .descriptors()
                .iter()
                .map(|d| d.primary)
                .collect::<BTreeSet<_>>()
                .len(),
            pages_written,
            triples_dropped,
            tombstones_retired,
            epoch: epoch.0,
        };
        info!(
            order = %order,
            generation = new_generation,
            pages = report.pages_written,
            dropped = report.triples_dropped,
            epoch = report.epoch,
            "compact.full.completed"
        );
        Ok(report)
    }

    pub(crate) fn collect_garbage(&self) -> Result<GcReport> {
        let min_pinned = match self.registry.min_epoch() {
            Ok(min) => min,
            Err(TernaError::ServiceUnavailable) => {
                let orphans = self.state.read().manifest.orphans.len();
                warn!("gc.registry_unreachable.conservative");
                return Ok(GcReport {
                    conservative: true,
                    files_removed: 0,
                    bytes_reclaimed: 0,
                    orphans_remaining: orphans,
                    min_pinned_epoch: None,
                });
            }
            Err(err) => return Err(err),
        };

        let mut state = self.state.write();
        let mut manifest = (*state.manifest).clone();
        let mut removed = 0usize;
        let mut reclaimed = 0u64;
        let mut keep = Vec::new();
        for orphan in manifest.orphans.drain(..) {
            let reclaimable = match min_pinned {
                // No live leases at all: nothing can reach the orphan.
                None => true,
                Some(pinned) => pinned > orphan.superseded_at,
            };
            if !reclaimable {
                keep.push(orphan);
                continue;
            }
            let path = self.paths.pages_dir.join(orphan.file_name());
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    reclaimed += orphan.bytes;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    removed += 1;
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "gc.remove_failed");
                    keep.push(orphan);
                }
            }
        }
        manifest.orphans = keep;
        let report = GcReport {
            conservative: false,
            files_removed: removed,
            bytes_reclaimed: reclaimed,
            orphans_remaining: manifest.orphans.len(),
            min_pinned_epoch: min_pinned.map(|e| e.0),
        };
        if removed > 0 {
            manifest.bump_epoch();
            manifest.store(&self.paths.pages_dir)?;
            state.manifest = Arc::new(manifest);
        }
        info!(
            files_removed = report.files_removed,
            bytes_reclaimed = report.bytes_reclaimed,
            remaining = report.orphans_remaining,
            "gc.completed"
        );
        Ok(report)
    }
}

pub(crate) enum WorkerMsg {
    Trigger,
    Shutdown,
}

/// Background worker running incremental compaction on an interval.
pub(crate) struct CompactionWorker {
    sender: Sender<WorkerMsg>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    pub(crate) fn spawn(shared: Weak<Shared>, config: AutoCompactConfig) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::spawn(move || Self::run(shared, receiver, config));
        Self {
            sender,
            handle: Some(handle),
        }
    }

    fn run(shared: Weak<Shared>, receiver: Receiver<WorkerMsg>, config: AutoCompactConfig) {
        loop {
            let cycle = match receiver.recv_timeout(config.interval) {
                Ok(WorkerMsg::Trigger) | Err(RecvTimeoutError::Timeout) => true,
                Ok(WorkerMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => false,
            };
            if !cycle {
                break;
            }
            let Some(shared) = shared.upgrade() else {
                break;
            };
            match shared.compact_incremental(config.limit) {
                Ok(report) if report.primaries_rewritten > 0 => {
                    debug!(
                        primaries = report.primaries_rewritten,
                        "compact.auto.cycle"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "compact.auto.failed"),
            }
            if let Err(err) = shared.collect_garbage() {
                warn!(error = %err, "compact.auto.gc_failed");
            }
        }
    }

    pub(crate) fn trigger(&self) {
        let _ = self.sender.send(WorkerMsg::Trigger);
    }

    pub(crate) fn shutdown(mut self) {
        let _ = self.sender.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
