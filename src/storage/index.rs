#![forbid(unsafe_code)]

//! Disk-resident, sorted, page-structured index: one per ordering.
//!
//! The writer buffers triples by primary key and, on finalize, sorts each
//! primary by the remaining two keys and appends fixed-capacity page frames
//! at the file tail. The reader binary-searches the descriptor list for
//! candidate pages and scans within them. The read path is a pure function
//! of `(criteria, descriptors, page file)`: it never mutates shared state,
//! which is what makes concurrent lock-free reads safe.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::storage::manifest::{Lookup, PageDescriptor};
use crate::storage::page::{decode_page, encode_page, PageCodec};
use crate::types::{Criteria, Result, TermId, TernaError, Triple, TripleOrder};

/// Buffers triples for one ordering and serializes them into pages.
pub struct PagedIndexWriter {
    order: TripleOrder,
    page_size: usize,
    codec: PageCodec,
    salt: u64,
    buckets: BTreeMap<u64, Vec<Triple>>,
}

impl PagedIndexWriter {
    /// Creates a writer for `order` with the given page capacity.
    pub fn new(order: TripleOrder, page_size: u32, codec: PageCodec, salt: u64) -> Self {
        Self {
            order,
            page_size: page_size.max(1) as usize,
            codec,
            salt,
            buckets: BTreeMap::new(),
        }
    }

    /// Buffers one triple under its primary key.
    pub fn push(&mut self, t: Triple) {
        self.buckets
            .entry(self.order.primary(&t).0)
            .or_default()
            .push(t);
    }

    /// Sorts, deduplicates, and appends page frames at the file tail,
    /// returning their descriptors. The caller fsyncs the file afterwards.
    pub fn finalize(self, io: &dyn FileIo) -> Result<Vec<PageDescriptor>> {
        let mut offset = io.len()?;
        let mut descriptors = Vec::new();
        for (primary_raw, mut triples) in self.buckets {
            let primary = TermId(primary_raw);
            triples.sort_by_key(|t| self.order.key(t));
            triples.dedup();
            for chunk in triples.chunks(self.page_size) {
                let frame = encode_page(self.order, primary, chunk, self.codec, self.salt)?;
                io.write_at(offset, &frame)?;
                descriptors.push(PageDescriptor {
                    primary,
                    offset,
                    length: frame.len() as u32,
                    triples: chunk.len() as u32,
                });
                offset += frame.len() as u64;
            }
        }
        Ok(descriptors)
    }
}

/// Read-only view over the pages of one ordering at one generation.
///
/// Holds its own file handle, so the view stays valid even after a full
/// compaction supersedes the generation.
pub struct PagedIndexReader {
    order: TripleOrder,
    generation: u64,
    io: Arc<dyn FileIo>,
    pages: Arc<Vec<PageDescriptor>>,
    salt: u64,
    cache: Mutex<LruCache<u64, Arc<Vec<Triple>>>>,
}

impl PagedIndexReader {
    /// Opens the lookup's generation file inside `pages_dir`.
    pub fn open(
        pages_dir: &Path,
        lookup: &Lookup,
        salt: u64,
        cache_pages: usize,
    ) -> Result<Self> {
        let path = pages_dir.join(lookup.file_name());
        let io: Arc<dyn FileIo> = match StdFileIo::open_readonly(&path) {
            Ok(io) => Arc::new(io),
            // A brand-new ordering has no file yet; an empty lookup reads
            // nothing, so create the file lazily.
            Err(TernaError::Io(err))
                if err.kind() == std::io::ErrorKind::NotFound && lookup.pages.is_empty() =>
            {
                Arc::new(StdFileIo::open(&path)?)
            }
            Err(err) => return Err(err),
        };
        Ok(Self::from_io(io, lookup, salt, cache_pages))
    }

    /// Builds a reader over an already-open file handle.
    pub fn from_io(
        io: Arc<dyn FileIo>,
        lookup: &Lookup,
        salt: u64,
        cache_pages: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_pages.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            order: lookup.order,
            generation: lookup.generation,
            io,
            pages: Arc::new(lookup.pages.clone()),
            salt,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Ordering served by this reader.
    pub fn order(&self) -> TripleOrder {
        self.order
    }

    /// Generation of the underlying file.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Descriptors visible to this reader.
    pub fn descriptors(&self) -> &[PageDescriptor] {
        &self.pages
    }

    /// Candidate pages for one primary value.
    pub fn pages_for(&self, primary: TermId) -> SmallVec<[PageDescriptor; 8]> {
        let start = self.pages.partition_point(|d| d.primary < primary);
        let end = self.pages.partition_point(|d| d.primary <= primary);
        self.pages[start..end].iter().copied().collect()
    }

    /// Reads and validates one page, through the decoded-page cache.
    pub fn read_page(&self, desc: &PageDescriptor) -> Result<Arc<Vec<Triple>>> {
        if let Some(hit) = self.cache.lock().get(&desc.offset) {
            return Ok(Arc::clone(hit));
        }
        let mut buf = vec![0u8; desc.length as usize];
        self.io.read_at(desc.offset, &mut buf)?;
        let frame = decode_page(&buf, self.salt)?;
        if frame.order != self.order {
            return Err(TernaError::Corruption("page ordering tag mismatch"));
        }
        if frame.primary != desc.primary {
            return Err(TernaError::Corruption("page primary does not match descriptor"));
        }
        let triples = Arc::new(frame.triples);
        self.cache.lock().put(desc.offset, Arc::clone(&triples));
        Ok(triples)
    }

    /// All triples of one primary, in ordering-key order.
    pub fn scan_primary(&self, primary: TermId) -> Result<Vec<Triple>> {
        let mut out = Vec::new();
        for desc in self.pages_for(primary) {
            out.extend(self.read_page(&desc)?.iter().copied());
        }
        Ok(out)
    }

    /// Whether the pages contain `t`.
    pub fn contains(&self, t: &Triple) -> Result<bool> {
        let key = self.order.key(t);
        for desc in self.pages_for(self.order.primary(t)) {
            let triples = self.read_page(&desc)?;
            if triples
                .binary_search_by_key(&key, |x| self.order.key(x))
                .is_ok()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// All triples matching `criteria`. When the criteria binds this
    /// ordering's primary only the candidate pages are read; otherwise every
    /// page is scanned.
    pub fn search(&self, criteria: &Criteria) -> Result<Vec<Triple>> {
        let mut out = Vec::new();
        match criteria.primary_for(self.order) {
            Some(primary) => {
                for desc in self.pages_for(primary) {
                    for t in self.read_page(&desc)?.iter() {
                        if criteria.matches(t) {
                            out.push(*t);
                        }
                    }
                }
            }
            None => {
                for desc in self.pages.iter() {
                    for t in self.read_page(desc)?.iter() {
                        if criteria.matches(t) {
                            out.push(*t);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Collects every triple reachable from the descriptors.
    pub fn collect_all(&self) -> Result<BTreeSet<Triple>> {
        let mut out = BTreeSet::new();
        for desc in self.pages.iter() {
            out.extend(self.read_page(desc)?.iter().copied());
        }
        Ok(out)
    }
}
