#![forbid(unsafe_code)]

//! Versioned manifest: the single authoritative description of the on-disk
//! page layout.
//!
//! The manifest is replaced atomically (write to a temp file, fsync, rename
//! over `manifest.json`, fsync the directory) on every epoch bump. The epoch
//! strictly increases; no two manifests ever share an epoch with different
//! content.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::primitives::io::sync_dir;
use crate::storage::page::PageCodec;
use crate::types::{Epoch, Result, TermId, TernaError, Triple, TripleOrder, TxId};

/// File name of the manifest inside the pages directory.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;
/// Upper bound on the remembered committed-transaction set.
pub const REMEMBERED_TX_CAP: usize = 1024;

/// Page compression codec recorded in the manifest.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// No compression.
    None,
    /// Snappy block compression.
    Snappy,
}

impl CodecKind {
    /// Maps the manifest codec onto the page-frame codec.
    pub fn page_codec(self) -> PageCodec {
        match self {
            CodecKind::None => PageCodec::None,
            CodecKind::Snappy => PageCodec::Snappy,
        }
    }
}

/// Compression configuration. `level` is carried for codecs that support one;
/// Snappy ignores it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Compression {
    /// Selected codec.
    pub codec: CodecKind,
    /// Codec-specific level, zero when not applicable.
    pub level: u32,
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            codec: CodecKind::Snappy,
            level: 0,
        }
    }
}

/// Location of one page inside an ordering's generation file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// Primary value shared by the page's triples.
    pub primary: TermId,
    /// Byte offset of the frame.
    pub offset: u64,
    /// Frame length in bytes.
    pub length: u32,
    /// Triples stored in the page; lets compaction judge fragmentation
    /// without reading the frame.
    pub triples: u32,
}

/// The set of pages for one ordering.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Lookup {
    /// Ordering these pages belong to.
    pub order: TripleOrder,
    /// Generation of the physical file the offsets refer to.
    pub generation: u64,
    /// Descriptors sorted by `(primary, offset)`.
    pub pages: Vec<PageDescriptor>,
}

impl Lookup {
    fn new(order: TripleOrder) -> Self {
        Self {
            order,
            generation: 1,
            pages: Vec::new(),
        }
    }

    /// File name of this lookup's generation file.
    pub fn file_name(&self) -> String {
        ordering_file_name(self.order, self.generation)
    }

    /// Returns the contiguous descriptor run for `primary`.
    pub fn pages_for(&self, primary: TermId) -> &[PageDescriptor] {
        let start = self.pages.partition_point(|d| d.primary < primary);
        let end = self.pages.partition_point(|d| d.primary <= primary);
        &self.pages[start..end]
    }

    /// Distinct primaries and their page counts, in ascending primary order.
    pub fn primaries(&self) -> Vec<(TermId, usize)> {
        let mut out: Vec<(TermId, usize)> = Vec::new();
        for desc in &self.pages {
            match out.last_mut() {
                Some((primary, count)) if *primary == desc.primary => *count += 1,
                _ => out.push((desc.primary, 1)),
            }
        }
        out
    }

    /// Merges freshly written descriptors, keeping the sorted invariant.
    pub fn insert_pages(&mut self, descriptors: Vec<PageDescriptor>) {
        self.pages.extend(descriptors);
        self.pages.sort_by_key(|d| (d.primary, d.offset));
    }

    /// Replaces every descriptor of `primary` with `descriptors`.
    pub fn replace_primary(&mut self, primary: TermId, descriptors: Vec<PageDescriptor>) {
        self.pages.retain(|d| d.primary != primary);
        self.insert_pages(descriptors);
    }

    /// Total bytes referenced by live descriptors.
    pub fn live_bytes(&self) -> u64 {
        self.pages.iter().map(|d| u64::from(d.length)).sum()
    }
}

/// A superseded generation file awaiting reclamation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OrphanFile {
    /// Ordering the file belonged to.
    pub order: TripleOrder,
    /// Generation that was replaced.
    pub generation: u64,
    /// Epoch at which the generation stopped being referenced; readers
    /// pinning this epoch or older may still need the file.
    pub superseded_at: Epoch,
    /// File size at the time it was superseded.
    pub bytes: u64,
}

impl OrphanFile {
    /// File name of the orphaned generation.
    pub fn file_name(&self) -> String {
        ordering_file_name(self.order, self.generation)
    }
}

/// Builds the generation file name for an ordering (`spo.g4.idx`).
pub fn ordering_file_name(order: TripleOrder, generation: u64) -> String {
    format!("{}.g{}.idx", order.base_name(), generation)
}

/// Authoritative, versioned description of the on-disk layout.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version of this manifest document.
    pub version: u32,
    /// Page capacity in triples.
    pub page_size: u32,
    /// Page compression configuration.
    pub compression: Compression,
    /// One lookup per ordering, in `TripleOrder::slot` order.
    pub lookups: Vec<Lookup>,
    /// Logically deleted triples not yet compacted out of every ordering.
    pub tombstones: BTreeSet<Triple>,
    /// Epoch of this manifest.
    pub epoch: Epoch,
    /// Bounded remembered set of flushed transaction ids, oldest first.
    #[serde(default)]
    pub tx_ids: Vec<TxId>,
    /// Superseded generation files awaiting garbage collection.
    #[serde(default)]
    pub orphans: Vec<OrphanFile>,
}

impl Manifest {
    /// Creates an empty manifest at epoch zero.
    pub fn new(page_size: u32, compression: Compression) -> Self {
        Self {
            version: MANIFEST_VERSION,
            page_size,
            compression,
            lookups: TripleOrder::ALL.iter().map(|&o| Lookup::new(o)).collect(),
            tombstones: BTreeSet::new(),
            epoch: Epoch(0),
            tx_ids: Vec::new(),
            orphans: Vec::new(),
        }
    }

    /// Lookup for `order`.
    pub fn lookup(&self, order: TripleOrder) -> &Lookup {
        &self.lookups[order.slot()]
    }

    /// Mutable lookup for `order`.
    pub fn lookup_mut(&mut self, order: TripleOrder) -> &mut Lookup {
        &mut self.lookups[order.slot()]
    }

    /// Advances the epoch. The only mutation path for it.
    pub fn bump_epoch(&mut self) {
        self.epoch = self.epoch.next();
    }

    /// Returns `true` when `tx` is in the remembered set.
    pub fn knows_tx(&self, tx: TxId) -> bool {
        self.tx_ids.contains(&tx)
    }

    /// Records a flushed transaction id, evicting the oldest beyond the cap.
    pub fn remember_tx(&mut self, tx: TxId) {
        if self.knows_tx(tx) {
            return;
        }
        self.tx_ids.push(tx);
        if self.tx_ids.len() > REMEMBERED_TX_CAP {
            let excess = self.tx_ids.len() - REMEMBERED_TX_CAP;
            self.tx_ids.drain(..excess);
        }
    }

    /// Total number of live pages across all orderings.
    pub fn page_count(&self) -> u64 {
        self.lookups.iter().map(|l| l.pages.len() as u64).sum()
    }

    /// Path of the manifest document inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Loads and validates the manifest from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let bytes = std::fs::read(Self::path_in(dir)).map_err(TernaError::from)?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|_| TernaError::Corruption("manifest failed to parse"))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(TernaError::Corruption("unsupported manifest version"));
        }
        if manifest.lookups.len() != TripleOrder::ALL.len() {
            return Err(TernaError::Corruption("manifest lookup count invalid"));
        }
        for (slot, lookup) in manifest.lookups.iter().enumerate() {
            if lookup.order.slot() != slot {
                return Err(TernaError::Corruption("manifest lookups out of order"));
            }
        }
        Ok(manifest)
    }

    /// Atomically replaces the manifest in `dir`: temp file, fsync, rename,
    /// directory fsync. On failure the previous manifest remains valid.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|_| TernaError::Invalid("manifest failed to serialize"))?;
        let mut tmp = tempfile::Builder::new()
            .prefix("manifest.")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(TernaError::from)?;
        tmp.write_all(&bytes).map_err(TernaError::from)?;
        tmp.as_file().sync_all().map_err(TernaError::from)?;
        tmp.persist(Self::path_in(dir))
            .map_err(|e| TernaError::Io(e.error))?;
        sync_dir(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn descriptor(primary: u64, offset: u64, length: u32) -> PageDescriptor {
        PageDescriptor {
            primary: TermId(primary),
            offset,
            length,
            triples: 1,
        }
    }

    #[test]
    fn store_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::new(512, Compression::default());
        manifest
            .lookup_mut(TripleOrder::Pos)
            .insert_pages(vec![descriptor(4, 0, 100), descriptor(2, 100, 80)]);
        manifest.tombstones.insert(Triple::new(TermId(1), TermId(2), TermId(3)));
        manifest.remember_tx(TxId(77));
        manifest.bump_epoch();
        manifest.store(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.epoch, Epoch(1));
        assert_eq!(
            loaded.lookup(TripleOrder::Pos).pages,
            vec![descriptor(2, 100, 80), descriptor(4, 0, 100)]
        );
    }

    #[test]
    fn store_replaces_atomically() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::new(256, Compression::default());
        manifest.bump_epoch();
        manifest.store(dir.path()).unwrap();
        manifest.bump_epoch();
        manifest.store(dir.path()).unwrap();
        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded.epoch, Epoch(2));
        let stray: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != MANIFEST_FILE)
            .collect();
        assert!(stray.is_empty(), "temp files left behind: {stray:?}");
    }

    #[test]
    fn pages_for_returns_contiguous_run() {
        let mut lookup = Lookup::new(TripleOrder::Spo);
        lookup.insert_pages(vec![
            descriptor(5, 0, 10),
            descriptor(5, 10, 10),
            descriptor(9, 20, 10),
        ]);
        assert_eq!(lookup.pages_for(TermId(5)).len(), 2);
        assert_eq!(lookup.pages_for(TermId(9)).len(), 1);
        assert!(lookup.pages_for(TermId(7)).is_empty());
        assert_eq!(lookup.primaries(), vec![(TermId(5), 2), (TermId(9), 1)]);
    }

    #[test]
    fn replace_primary_keeps_other_descriptors() {
        let mut lookup = Lookup::new(TripleOrder::Osp);
        lookup.insert_pages(vec![descriptor(1, 0, 10), descriptor(2, 10, 10)]);
        lookup.replace_primary(TermId(1), vec![descriptor(1, 20, 30)]);
        assert_eq!(
            lookup.pages,
            vec![descriptor(1, 20, 30), descriptor(2, 10, 10)]
        );
    }

    #[test]
    fn remembered_set_is_bounded() {
        let mut manifest = Manifest::new(512, Compression::default());
        for i in 0..(REMEMBERED_TX_CAP as u64 + 10) {
            manifest.remember_tx(TxId(i));
        }
        assert_eq!(manifest.tx_ids.len(), REMEMBERED_TX_CAP);
        assert!(!manifest.knows_tx(TxId(0)));
        assert!(manifest.knows_tx(TxId(REMEMBERED_TX_CAP as u64 + 9)));
    }

    #[test]
    fn corrupt_manifest_fails_to_load() {
        let dir = tempdir().unwrap();
        std::fs::write(Manifest::path_in(dir.path()), b"{not json").unwrap();
        assert!(matches!(
            Manifest::load(dir.path()),
            Err(TernaError::Corruption(_))
        ));
    }
}
