#![forbid(unsafe_code)]

//! Bidirectional string/id interning dictionary.
//!
//! Ids are handed out once, monotonically, starting at 1, and are never
//! reused; entries are immutable after creation. The dictionary is persisted
//! as one section of the primary snapshot file.

use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::types::{Result, TermId, TernaError};

const MAX_TERM_LEN: usize = u32::MAX as usize;

/// Counters describing dictionary traffic.
#[derive(Default, Debug)]
pub struct DictMetrics {
    intern_hits: AtomicU64,
    intern_misses: AtomicU64,
    resolve_calls: AtomicU64,
    resolve_misses: AtomicU64,
}

/// Point-in-time copy of [`DictMetrics`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DictMetricsSnapshot {
    /// Intern calls that found an existing id.
    pub intern_hits: u64,
    /// Intern calls that allocated a new id.
    pub intern_misses: u64,
    /// Total resolve calls.
    pub resolve_calls: u64,
    /// Resolve calls for unknown ids.
    pub resolve_misses: u64,
}

impl DictMetrics {
    fn snapshot(&self) -> DictMetricsSnapshot {
        DictMetricsSnapshot {
            intern_hits: self.intern_hits.load(Ordering::Relaxed),
            intern_misses: self.intern_misses.load(Ordering::Relaxed),
            resolve_calls: self.resolve_calls.load(Ordering::Relaxed),
            resolve_misses: self.resolve_misses.load(Ordering::Relaxed),
        }
    }
}

/// Bidirectional string interner backing all term ids in the store.
#[derive(Debug)]
pub struct Dict {
    by_name: FxHashMap<String, TermId>,
    by_id: Vec<String>,
    metrics: DictMetrics,
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

impl Dict {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self {
            by_name: FxHashMap::default(),
            by_id: Vec::new(),
            metrics: DictMetrics::default(),
        }
    }

    /// Returns the id for `term`, allocating the next id on first use.
    pub fn intern(&mut self, term: &str) -> Result<TermId> {
        if term.len() > MAX_TERM_LEN {
            return Err(TernaError::Invalid("term exceeds maximum length"));
        }
        if let Some(&id) = self.by_name.get(term) {
            self.metrics.intern_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(id);
        }
        self.metrics.intern_misses.fetch_add(1, Ordering::Relaxed);
        let id = TermId(self.by_id.len() as u64 + 1);
        self.by_id.push(term.to_string());
        self.by_name.insert(term.to_string(), id);
        Ok(id)
    }

    /// Looks up an existing id without allocating.
    pub fn lookup(&self, term: &str) -> Option<TermId> {
        self.by_name.get(term).copied()
    }

    /// Resolves an id back to its term string.
    pub fn resolve(&self, id: TermId) -> Option<&str> {
        self.metrics.resolve_calls.fetch_add(1, Ordering::Relaxed);
        if id.0 == 0 {
            self.metrics.resolve_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        match self.by_id.get(id.0 as usize - 1) {
            Some(term) => Some(term.as_str()),
            None => {
                self.metrics.resolve_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Number of interned terms.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` when no terms are interned.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Traffic counters.
    pub fn metrics(&self) -> DictMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Appends the section encoding: entry count, then length-prefixed UTF-8
    /// strings in id order (ids are implicit).
    pub fn encode_section(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.by_id.len() as u64).to_be_bytes());
        for term in &self.by_id {
            out.extend_from_slice(&(term.len() as u32).to_be_bytes());
            out.extend_from_slice(term.as_bytes());
        }
    }

    /// Decodes a section produced by [`encode_section`](Self::encode_section),
    /// returning the dictionary and the number of bytes consumed.
    pub fn decode_section(src: &[u8]) -> Result<(Self, usize)> {
        if src.len() < 8 {
            return Err(TernaError::Corruption("dictionary section truncated"));
        }
        let count = u64::from_be_bytes(src[0..8].try_into().unwrap()) as usize;
        let mut offset = 8usize;
        let mut dict = Dict::new();
        dict.by_id.reserve(count);
        for _ in 0..count {
            if src.len() < offset + 4 {
                return Err(TernaError::Corruption("dictionary entry length truncated"));
            }
            let len = u32::from_be_bytes(src[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            if src.len() < offset + len {
                return Err(TernaError::Corruption("dictionary entry truncated"));
            }
            let term = std::str::from_utf8(&src[offset..offset + len])
                .map_err(|_| TernaError::Corruption("dictionary entry not valid UTF-8"))?;
            offset += len;
            let id = TermId(dict.by_id.len() as u64 + 1);
            dict.by_id.push(term.to_string());
            if dict.by_name.insert(term.to_string(), id).is_some() {
                return Err(TernaError::Corruption("duplicate dictionary entry"));
            }
        }
        Ok((dict, offset))
    }
}
