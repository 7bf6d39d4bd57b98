#![forbid(unsafe_code)]

//! Core identifier types, the triple data model, and the crate error type.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod checksum;

/// Dictionary id for an interned term string. Ids start at 1 and are never
/// reused; 0 is the reserved null id.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize, Default,
)]
pub struct TermId(pub u64);

/// Reserved id that no interned term ever receives.
pub const NULL_TERM: TermId = TermId(0);

/// Monotonic version marker for the committed state of the manifest.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize, Default,
)]
pub struct Epoch(pub u64);

impl Epoch {
    /// Returns the next epoch.
    pub const fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

/// Caller-supplied transaction id used for idempotent commit and replay.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize, Default,
)]
pub struct TxId(pub u64);

/// Caller-supplied session tag carried on commit records.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize, Default,
)]
pub struct SessionId(pub u64);

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(subject, predicate, object)` fact with all terms resolved through the
/// dictionary.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize,
)]
pub struct Triple {
    /// Subject term.
    pub s: TermId,
    /// Predicate term.
    pub p: TermId,
    /// Object term.
    pub o: TermId,
}

impl Triple {
    /// Builds a triple from raw term ids.
    pub const fn new(s: TermId, p: TermId, o: TermId) -> Self {
        Self { s, p, o }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.s, self.p, self.o)
    }
}

/// One of the three sort orders over triples. The primary is the leading key;
/// the remaining two keys break ties within a primary.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripleOrder {
    /// Subject-led ordering.
    Spo,
    /// Predicate-led ordering.
    Pos,
    /// Object-led ordering.
    Osp,
}

impl TripleOrder {
    /// All three orderings, in manifest position order.
    pub const ALL: [TripleOrder; 3] = [TripleOrder::Spo, TripleOrder::Pos, TripleOrder::Osp];

    /// Returns the primary key of `t` under this ordering.
    pub fn primary(self, t: &Triple) -> TermId {
        match self {
            TripleOrder::Spo => t.s,
            TripleOrder::Pos => t.p,
            TripleOrder::Osp => t.o,
        }
    }

    /// Returns `(primary, secondary, tertiary)` raw key components for `t`.
    pub fn key(self, t: &Triple) -> (u64, u64, u64) {
        match self {
            TripleOrder::Spo => (t.s.0, t.p.0, t.o.0),
            TripleOrder::Pos => (t.p.0, t.o.0, t.s.0),
            TripleOrder::Osp => (t.o.0, t.s.0, t.p.0),
        }
    }

    /// Stable on-disk tag for page frames.
    pub const fn tag(self) -> u8 {
        match self {
            TripleOrder::Spo => 1,
            TripleOrder::Pos => 2,
            TripleOrder::Osp => 3,
        }
    }

    /// Decodes an on-disk ordering tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(TripleOrder::Spo),
            2 => Ok(TripleOrder::Pos),
            3 => Ok(TripleOrder::Osp),
            _ => Err(TernaError::Corruption("unknown ordering tag")),
        }
    }

    /// Position of this ordering inside the manifest `lookups` array.
    pub const fn slot(self) -> usize {
        match self {
            TripleOrder::Spo => 0,
            TripleOrder::Pos => 1,
            TripleOrder::Osp => 2,
        }
    }

    /// Base name of the ordering's page files (`spo`, `pos`, `osp`).
    pub const fn base_name(self) -> &'static str {
        match self {
            TripleOrder::Spo => "spo",
            TripleOrder::Pos => "pos",
            TripleOrder::Osp => "osp",
        }
    }

    /// Picks the ordering that serves `criteria` with a bound primary when
    /// possible: subject-led, then predicate-led, then object-led, falling
    /// back to the subject-led ordering for unconstrained scans.
    pub fn for_criteria(criteria: &Criteria) -> TripleOrder {
        if criteria.s.is_some() {
            TripleOrder::Spo
        } else if criteria.p.is_some() {
            TripleOrder::Pos
        } else if criteria.o.is_some() {
            TripleOrder::Osp
        } else {
            TripleOrder::Spo
        }
    }
}

impl fmt::Display for TripleOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_name())
    }
}

/// Query pattern over triples; `None` fields are wildcards.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Criteria {
    /// Subject constraint.
    pub s: Option<TermId>,
    /// Predicate constraint.
    pub p: Option<TermId>,
    /// Object constraint.
    pub o: Option<TermId>,
}

impl Criteria {
    /// Matches every triple.
    pub const fn any() -> Self {
        Self {
            s: None,
            p: None,
            o: None,
        }
    }

    /// Constrains the subject.
    pub fn with_s(mut self, s: TermId) -> Self {
        self.s = Some(s);
        self
    }

    /// Constrains the predicate.
    pub fn with_p(mut self, p: TermId) -> Self {
        self.p = Some(p);
        self
    }

    /// Constrains the object.
    pub fn with_o(mut self, o: TermId) -> Self {
        self.o = Some(o);
        self
    }

    /// Exact-match criteria for one triple.
    pub fn exact(t: &Triple) -> Self {
        Self {
            s: Some(t.s),
            p: Some(t.p),
            o: Some(t.o),
        }
    }

    /// Returns `true` when `t` satisfies every bound field.
    pub fn matches(&self, t: &Triple) -> bool {
        self.s.map_or(true, |s| s == t.s)
            && self.p.map_or(true, |p| p == t.p)
            && self.o.map_or(true, |o| o == t.o)
    }

    /// Returns the bound value of this criteria's primary under `order`, if
    /// any.
    pub fn primary_for(&self, order: TripleOrder) -> Option<TermId> {
        match order {
            TripleOrder::Spo => self.s,
            TripleOrder::Pos => self.p,
            TripleOrder::Osp => self.o,
        }
    }
}

/// Unified error type for storage-engine operations.
#[derive(Debug, thiserror::Error)]
pub enum TernaError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk state failed validation; never auto-repaired.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller error with a static description.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Caller error carrying runtime context.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// Another writer holds the advisory lock for this database path.
    #[error("database is locked by another writer")]
    Locked,
    /// The reader registry could not be reached within the retry budget.
    #[error("reader registry unavailable")]
    ServiceUnavailable,
    /// Requested entity does not exist.
    #[error("not found")]
    NotFound,
}

/// Result type alias using [`TernaError`].
pub type Result<T> = std::result::Result<T, TernaError>;
