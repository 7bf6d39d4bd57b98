#![forbid(unsafe_code)]

//! Transaction batches: scope stack, nested semantics, and idempotent
//! commits.
//!
//! Writes buffer against the innermost open batch. An inner commit folds its
//! operations into the parent scope; an inner abort unwinds only that scope.
//! Only a root commit reaches the WAL and the staging store. Committing a
//! transaction id that is already in the remembered set is a no-op returning
//! the prior outcome, never a re-application; that is what makes retrying a
//! commit after a network or process failure safe.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::storage::manifest::REMEMBERED_TX_CAP;
use crate::types::{Epoch, Result, SessionId, TernaError, Triple, TxId};

/// One buffered write operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchOp {
    /// Add a fact.
    Put(Triple),
    /// Delete a fact.
    Delete(Triple),
}

/// Lifecycle of a batch, as observed through the manager.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum TxState {
    /// No batch open.
    #[default]
    Idle,
    /// A batch is open and buffering writes.
    Active,
    /// Commit finished.
    Committed,
    /// Abort finished.
    Aborted,
}

/// Outcome of a root commit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommitOutcome {
    /// The batch was applied and the epoch advanced.
    Committed {
        /// Epoch after the commit.
        epoch: Epoch,
    },
    /// The transaction id was already committed; nothing was re-applied.
    AlreadyCommitted,
}

/// What a `commit` call resolved to, before the store applies it.
#[derive(Debug)]
pub enum CommitKind {
    /// An inner scope folded into its parent.
    Nested,
    /// The root scope closed; the store must apply the effect.
    Root(RootCommit),
    /// The root scope carried an already-committed transaction id.
    Duplicate {
        /// The remembered transaction id.
        tx: TxId,
    },
}

/// Effective write set of a root batch, last-operation-wins per triple.
#[derive(Debug)]
pub struct RootCommit {
    /// Explicit transaction id, when the caller supplied one.
    pub tx: Option<TxId>,
    /// Session tag for the commit record.
    pub session: SessionId,
    /// Final puts.
    pub puts: Vec<Triple>,
    /// Final deletes.
    pub deletes: Vec<Triple>,
}

#[derive(Debug)]
struct BatchScope {
    tx: Option<TxId>,
    session: SessionId,
    ops: Vec<BatchOp>,
}

/// Manages the batch scope stack and the remembered committed-id set.
#[derive(Debug, Default)]
pub struct TransactionManager {
    scopes: Vec<BatchScope>,
    remembered: FxHashSet<TxId>,
    remembered_order: VecDeque<TxId>,
    last_state: TxState,
}

impl TransactionManager {
    /// Creates a manager seeded with already-committed transaction ids (from
    /// the manifest's remembered set and WAL replay).
    pub fn new(seed: impl IntoIterator<Item = TxId>) -> Self {
        let mut manager = Self {
            scopes: Vec::new(),
            remembered: FxHashSet::default(),
            remembered_order: VecDeque::new(),
            last_state: TxState::Idle,
        };
        for tx in seed {
            manager.remember(tx);
        }
        manager
    }

    /// Current observable state.
    pub fn state(&self) -> TxState {
        if self.scopes.is_empty() {
            self.last_state
        } else {
            TxState::Active
        }
    }

    /// Depth of the scope stack.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Returns `true` while a batch is open.
    pub fn in_batch(&self) -> bool {
        !self.scopes.is_empty()
    }

    /// Returns `true` when `tx` is known to have committed.
    pub fn is_remembered(&self, tx: TxId) -> bool {
        self.remembered.contains(&tx)
    }

    /// Records a committed transaction id, bounded to the remembered cap.
    pub fn remember(&mut self, tx: TxId) {
        if !self.remembered.insert(tx) {
            return;
        }
        self.remembered_order.push_back(tx);
        while self.remembered_order.len() > REMEMBERED_TX_CAP {
            if let Some(evicted) = self.remembered_order.pop_front() {
                self.remembered.remove(&evicted);
            }
        }
    }

    /// All remembered ids, oldest first.
    pub fn remembered_ids(&self) -> Vec<TxId> {
        self.remembered_order.iter().copied().collect()
    }

    /// Opens a batch scope. An explicit `tx` is only meaningful on the root
    /// scope, where it drives idempotency.
    pub fn begin(&mut self, tx: Option<TxId>, session: Option<SessionId>) -> Result<()> {
        if tx.is_some() && !self.scopes.is_empty() {
            return Err(TernaError::Invalid(
                "explicit transaction ids are only valid on the root batch",
            ));
        }
        self.scopes.push(BatchScope {
            tx,
            session: session.unwrap_or_default(),
            ops: Vec::new(),
        });
        Ok(())
    }

    /// Buffers one operation against the innermost scope.
    pub fn buffer(&mut self, op: BatchOp) -> Result<()> {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.ops.push(op);
                Ok(())
            }
            None => Err(TernaError::Invalid("no batch is active")),
        }
    }

    /// Aborts the innermost scope, unwinding only its own effects. Aborting
    /// the root discards everything. Returns the root's explicit transaction
    /// id when the root aborted.
    pub fn abort(&mut self) -> Result<Option<TxId>> {
        let scope = self
            .scopes
            .pop()
            .ok_or(TernaError::Invalid("no batch is active"))?;
        if self.scopes.is_empty() {
            self.last_state = TxState::Aborted;
            Ok(scope.tx)
        } else {
            Ok(None)
        }
    }

    /// Commits the innermost scope. Inner scopes fold into their parent;
    /// the root scope resolves to its effective write set (or a duplicate).
    pub fn commit(&mut self) -> Result<CommitKind> {
        let scope = self
            .scopes
            .pop()
            .ok_or(TernaError::Invalid("no batch is active"))?;
        if let Some(parent) = self.scopes.last_mut() {
            parent.ops.extend(scope.ops);
            return Ok(CommitKind::Nested);
        }
        self.last_state = TxState::Committed;
        if let Some(tx) = scope.tx {
            if self.remembered.contains(&tx) {
                return Ok(CommitKind::Duplicate { tx });
            }
        }
        // Last operation wins per triple; the order between distinct triples
        // no longer matters once folded.
        let mut effect: FxHashMap<Triple, bool> = FxHashMap::default();
        for op in &scope.ops {
            match op {
                BatchOp::Put(t) => {
                    effect.insert(*t, true);
                }
                BatchOp::Delete(t) => {
                    effect.insert(*t, false);
                }
            }
        }
        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        for (t, is_put) in effect {
            if is_put {
                puts.push(t);
            } else {
                deletes.push(t);
            }
        }
        puts.sort();
        deletes.sort();
        Ok(CommitKind::Root(RootCommit {
            tx: scope.tx,
            session: scope.session,
            puts,
            deletes,
        }))
    }
}
