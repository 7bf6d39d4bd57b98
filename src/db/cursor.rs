#![forbid(unsafe_code)]

//! Explicit streaming cursor over query results.
//!
//! The cursor is the visible contract for streaming queries: `open` (via
//! `stream_query`), `next` yielding bounded batches, `close`. It is finite,
//! forward-only, and not restartable. The cursor pins its snapshot's epoch
//! through a reader lease for its whole lifetime and heartbeats the lease on
//! every `next`, so long drains never expire mid-stream.

use crate::registry::LeaseGuard;
use crate::types::Triple;

/// Forward-only batch cursor returned by `stream_query`.
pub struct QueryCursor {
    remaining: std::vec::IntoIter<Triple>,
    batch_size: usize,
    closed: bool,
    lease: Option<LeaseGuard>,
}

impl QueryCursor {
    pub(crate) fn new(results: Vec<Triple>, batch_size: usize, lease: Option<LeaseGuard>) -> Self {
        Self {
            remaining: results.into_iter(),
            batch_size: batch_size.max(1),
            closed: false,
            lease,
        }
    }

    /// Batch size the cursor was opened with.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the next batch, or `None` once the cursor is exhausted or
    /// closed. The final batch may be shorter than the batch size.
    pub fn next(&mut self) -> Option<Vec<Triple>> {
        if self.closed {
            return None;
        }
        if let Some(lease) = &self.lease {
            let _ = lease.heartbeat();
        }
        let batch: Vec<Triple> = self.remaining.by_ref().take(self.batch_size).collect();
        if batch.is_empty() {
            self.close();
            return None;
        }
        Some(batch)
    }

    /// Releases the lease and ends the stream. Idempotent; exhaustion closes
    /// the cursor automatically.
    pub fn close(&mut self) {
        self.closed = true;
        self.lease.take();
    }

    /// Returns `true` once the cursor has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for QueryCursor {
    fn drop(&mut self) {
        self.close();
    }
}
