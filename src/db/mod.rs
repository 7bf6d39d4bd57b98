//! The `TripleStore` facade: the interface the query engine consumes.
//!
//! Writes land in the staging overlay and the WAL; flush drains staging into
//! the paged index files and rewrites the manifest; reads resolve through the
//! manifest and the paged index readers, optionally pinned to a historical
//! epoch through the reader registry. One advisory writer per database path;
//! readers are never blocked by writers or compaction because superseded page
//! versions stay intact until no lease can reach them.

mod compaction;
mod cursor;
pub mod datafile;
mod txn;

pub use compaction::{AutoCompactConfig, CompactReport, CompactionPolicy, GcReport};
pub use cursor::QueryCursor;
pub use txn::{BatchOp, CommitOutcome, TxState};

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::lock::LockFile;
use crate::registry::{
    LeaseGuard, RegistryClient, RegistryService, DEFAULT_CLIENT_BACKOFF, DEFAULT_CLIENT_RETRIES,
    DEFAULT_LEASE_EXPIRY,
};
use crate::storage::dict::Dict;
use crate::storage::index::{PagedIndexReader, PagedIndexWriter};
use crate::storage::manifest::{Compression, Manifest};
use crate::storage::staging::{Overlay, StagingStore};
use crate::storage::wal::{Wal, WalRecord};
use crate::storage::HotnessMetrics;
use crate::types::{
    Criteria, Epoch, Result, SessionId, TermId, TernaError, Triple, TripleOrder, TxId,
};

use compaction::CompactionWorker;
use txn::{CommitKind, TransactionManager};

/// Default page capacity in triples.
pub const DEFAULT_PAGE_SIZE: u32 = 512;
/// Default decoded-page cache capacity per ordering.
pub const DEFAULT_CACHE_PAGES: usize = 64;

/// Derived file locations for one database path.
#[derive(Clone, Debug)]
pub struct DbPaths {
    /// Primary data file.
    pub data: PathBuf,
    /// Directory holding the ordering files and the manifest.
    pub pages_dir: PathBuf,
    /// Write-ahead log.
    pub wal: PathBuf,
    /// Advisory writer lock file.
    pub lock: PathBuf,
    /// Default registry socket.
    pub socket: PathBuf,
}

impl DbPaths {
    /// Derives the sibling paths for a database file.
    pub fn for_db(path: impl AsRef<Path>) -> Self {
        let data = path.as_ref().to_path_buf();
        Self {
            pages_dir: sibling(&data, ".pages"),
            wal: sibling(&data, ".wal"),
            lock: sibling(&data, ".lock"),
            socket: sibling(&data, ".registry.sock"),
            data,
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("terna"));
    name.push(suffix);
    let mut out = path.to_path_buf();
    out.set_file_name(name);
    out
}

/// Configuration for opening a [`TripleStore`].
#[derive(Clone, Debug)]
pub struct Options {
    /// Page capacity in triples for freshly created databases; an existing
    /// manifest always wins.
    pub page_size: u32,
    /// Page compression for freshly created databases.
    pub compression: Compression,
    /// fsync the WAL on every commit. Slower, but a returned commit is
    /// guaranteed durable.
    pub durable_commits: bool,
    /// Decoded-page cache capacity per ordering.
    pub cache_pages: usize,
    /// Create the database when the path does not exist.
    pub create_if_missing: bool,
    /// Start the embedded reader-registry service on open.
    pub start_registry: bool,
    /// Socket path override for the registry; defaults to
    /// `<db>.registry.sock`.
    pub registry_socket: Option<PathBuf>,
    /// Expiry after which a non-heartbeating lease stops pinning epochs.
    pub lease_expiry: Duration,
    /// Connection attempts before registry calls fail fast.
    pub registry_retries: u32,
    /// Pause between registry connection attempts.
    pub registry_backoff: Duration,
    /// Hotness weighting for compaction candidate selection.
    pub compaction: CompactionPolicy,
    /// Background auto-compaction; off by default.
    pub auto_compact: Option<AutoCompactConfig>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            compression: Compression::default(),
            durable_commits: true,
            cache_pages: DEFAULT_CACHE_PAGES,
            create_if_missing: true,
            start_registry: true,
            registry_socket: None,
            lease_expiry: DEFAULT_LEASE_EXPIRY,
            registry_retries: DEFAULT_CLIENT_RETRIES,
            registry_backoff: DEFAULT_CLIENT_BACKOFF,
            compaction: CompactionPolicy::default(),
            auto_compact: None,
        }
    }
}

struct Inner {
    dict: Dict,
    staging: StagingStore,
    manifest: Arc<Manifest>,
    readers: [Arc<PagedIndexReader>; 3],
    properties: BTreeMap<String, String>,
    dict_dirty: bool,
    pending_txids: Vec<TxId>,
}

pub(crate) struct Shared {
    options: Options,
    paths: DbPaths,
    salt: u64,
    metrics: HotnessMetrics,
    wal: Wal,
    registry: RegistryClient,
    state: RwLock<Inner>,
    txns: Mutex<TransactionManager>,
}

/// Embedded persistent triple store.
pub struct TripleStore {
    shared: Arc<Shared>,
    service: Mutex<Option<RegistryService>>,
    worker: Mutex<Option<CompactionWorker>>,
    closed: AtomicBool,
    _lock: LockFile,
}

/// Immutable, epoch-pinned view used by `with_snapshot` and cursors.
///
/// The view holds its own manifest, readers, and overlay: concurrent commits
/// or compactions advancing the live epoch never show through, and there is
/// no fallback to live data.
pub struct SnapshotView {
    epoch: Epoch,
    manifest: Arc<Manifest>,
    readers: [Arc<PagedIndexReader>; 3],
    overlay: Overlay,
    lease: Option<LeaseGuard>,
}

impl SnapshotView {
    /// Epoch this view is pinned to.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// All triples matching `criteria` as of the pinned epoch.
    pub fn query(&self, criteria: &Criteria) -> Result<Vec<Triple>> {
        query_parts(&self.readers, &self.manifest, &self.overlay, criteria)
    }

    /// Whether the fact exists as of the pinned epoch.
    pub fn contains(&self, t: &Triple) -> Result<bool> {
        Ok(!self.query(&Criteria::exact(t))?.is_empty())
    }
}

fn query_parts(
    readers: &[Arc<PagedIndexReader>; 3],
    manifest: &Manifest,
    overlay: &Overlay,
    criteria: &Criteria,
) -> Result<Vec<Triple>> {
    let order = TripleOrder::for_criteria(criteria);
    let mut set: BTreeSet<Triple> = readers[order.slot()]
        .search(criteria)?
        .into_iter()
        .collect();
    for t in &manifest.tombstones {
        if criteria.matches(t) {
            set.remove(t);
        }
    }
    overlay.apply(&mut set, criteria);
    Ok(set.into_iter().collect())
}

fn open_readers(
    pages_dir: &Path,
    manifest: &Manifest,
    salt: u64,
    cache_pages: usize,
) -> Result<[Arc<PagedIndexReader>; 3]> {
    let spo = Arc::new(PagedIndexReader::open(
        pages_dir,
        manifest.lookup(TripleOrder::Spo),
        salt,
        cache_pages,
    )?);
    let pos = Arc::new(PagedIndexReader::open(
        pages_dir,
        manifest.lookup(TripleOrder::Pos),
        salt,
        cache_pages,
    )?);
    let osp = Arc::new(PagedIndexReader::open(
        pages_dir,
        manifest.lookup(TripleOrder::Osp),
        salt,
        cache_pages,
    )?);
    Ok([spo, pos, osp])
}

fn auto_tx() -> TxId {
    // High bit marks engine-assigned ids, keeping them out of the space
    // callers are likely to use for retryable commits.
    TxId(rand::random::<u64>() | (1 << 63))
}

fn fold_ops(ops: &[BatchOp]) -> (Vec<Triple>, Vec<Triple>) {
    let mut effect: FxHashMap<Triple, bool> = FxHashMap::default();
    for op in ops {
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
    (puts, deletes)
}

fn apply_replay(
    staging: &mut StagingStore,
    txns: &mut TransactionManager,
    records: &[WalRecord],
) -> Vec<TxId> {
    let mut pending: FxHashMap<TxId, Vec<BatchOp>> = FxHashMap::default();
    let mut newly_committed = Vec::new();
    for record in records {
        match record {
            WalRecord::Begin { tx } => {
                pending.entry(*tx).or_default();
            }
            WalRecord::Put { tx, triple } => {
                pending.entry(*tx).or_default().push(BatchOp::Put(*triple));
            }
            WalRecord::Delete { tx, triple } => {
                pending
                    .entry(*tx)
                    .or_default()
                    .push(BatchOp::Delete(*triple));
            }
            WalRecord::Abort { tx } => {
                pending.remove(tx);
            }
            WalRecord::Commit { tx, .. } => {
                let ops = pending.remove(tx).unwrap_or_default();
                if txns.is_remembered(*tx) {
                    debug!(tx = tx.0, "wal.replay.duplicate_commit_skipped");
                    continue;
                }
                let (puts, deletes) = fold_ops(&ops);
                staging.merge(&puts, &deletes);
                txns.remember(*tx);
                newly_committed.push(*tx);
            }
        }
    }
    newly_committed
}

impl TripleStore {
    /// Opens or creates the database at `path`.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let paths = DbPaths::for_db(path.as_ref());
        let lock = LockFile::acquire(&paths.lock)?;

        let exists = paths.data.exists();
        if !exists && !options.create_if_missing {
            return Err(TernaError::NotFound);
        }
        let data = if exists {
            datafile::read_data_file(&paths.data)?
        } else {
            let salt = rand::random::<u64>();
            let mut properties = BTreeMap::new();
            properties.insert(
                "created_by".to_string(),
                format!("terna {}", env!("CARGO_PKG_VERSION")),
            );
            let dict = Dict::new();
            let overlay = Overlay::default();
            datafile::write_data_file(&paths.data, salt, &dict, &overlay, &properties)?;
            datafile::DataFile {
                salt,
                dict,
                overlay,
                properties,
            }
        };

        std::fs::create_dir_all(&paths.pages_dir).map_err(TernaError::from)?;
        let manifest = if Manifest::path_in(&paths.pages_dir).exists() {
            Manifest::load(&paths.pages_dir)?
        } else {
            let manifest = Manifest::new(options.page_size, options.compression);
            manifest.store(&paths.pages_dir)?;
            manifest
        };

        let wal_io = StdFileIo::open(&paths.wal)?;
        let wal = Wal::open(Arc::new(wal_io), data.salt)?;
        let replay = wal.recover()?;

        let mut txns = TransactionManager::new(manifest.tx_ids.iter().copied());
        let mut staging = StagingStore::from_overlay(data.overlay);
        let pending_txids = apply_replay(&mut staging, &mut txns, &replay.records);

        let readers = open_readers(&paths.pages_dir, &manifest, data.salt, options.cache_pages)?;

        let socket = options
            .registry_socket
            .clone()
            .unwrap_or_else(|| paths.socket.clone());
        let service = if options.start_registry {
            match RegistryService::start(&socket, options.lease_expiry) {
                Ok(service) => Some(service),
                Err(err) => {
                    warn!(error = %err, "registry.embedded.start_failed");
                    None
                }
            }
        } else {
            None
        };
        let registry = RegistryClient::new(&socket)
            .with_retries(options.registry_retries, options.registry_backoff);

        info!(
            db = %paths.data.display(),
            epoch = manifest.epoch.0,
            replayed = replay.records.len(),
            "db.open"
        );

        let shared = Arc::new(Shared {
            salt: data.salt,
            metrics: HotnessMetrics::default(),
            wal,
            registry,
            state: RwLock::new(Inner {
                dict: data.dict,
                staging,
                manifest: Arc::new(manifest),
                readers,
                properties: data.properties,
                dict_dirty: false,
                pending_txids,
            }),
            txns: Mutex::new(txns),
            paths,
            options,
        });

        let worker = shared
            .options
            .auto_compact
            .map(|config| CompactionWorker::spawn(Arc::downgrade(&shared), config));

        Ok(Self {
            shared,
            service: Mutex::new(service),
            worker: Mutex::new(worker),
            closed: AtomicBool::new(false),
            _lock: lock,
        })
    }

    /// Derived file locations of this database.
    pub fn paths(&self) -> &DbPaths {
        &self.shared.paths
    }

    /// Database salt.
    pub fn salt(&self) -> u64 {
        self.shared.salt
    }

    /// Current committed epoch.
    pub fn epoch(&self) -> Epoch {
        self.shared.state.read().manifest.epoch
    }

    /// Handle to the current manifest.
    pub fn manifest(&self) -> Arc<Manifest> {
        Arc::clone(&self.shared.state.read().manifest)
    }

    /// Registry client handle used by this store.
    pub fn registry(&self) -> RegistryClient {
        self.shared.registry.clone()
    }

    /// Interns a term, allocating its id on first use.
    pub fn intern(&self, term: &str) -> Result<TermId> {
        let mut state = self.shared.state.write();
        let before = state.dict.len();
        let id = state.dict.intern(term)?;
        if state.dict.len() != before {
            state.dict_dirty = true;
        }
        Ok(id)
    }

    /// Resolves a term id back to its string.
    pub fn resolve(&self, id: TermId) -> Option<String> {
        self.shared.state.read().dict.resolve(id).map(str::to_string)
    }

    /// Looks up an already-interned term.
    pub fn lookup_term(&self, term: &str) -> Option<TermId> {
        self.shared.state.read().dict.lookup(term)
    }

    /// Opens a batch. Writes buffer against the innermost open batch.
    pub fn begin_batch(&self, tx: Option<TxId>, session: Option<SessionId>) -> Result<()> {
        self.shared.txns.lock().begin(tx, session)
    }

    /// Commits the innermost batch. On the root batch this logs to the WAL,
    /// merges into staging, and bumps the epoch; committing an
    /// already-remembered transaction id is an idempotent no-op.
    pub fn commit_batch(&self, durable: bool) -> Result<CommitOutcome> {
        self.shared.commit_batch(durable)
    }

    /// Aborts the innermost batch, unwinding only its own scope.
    pub fn abort_batch(&self) -> Result<()> {
        let root_tx = self.shared.txns.lock().abort()?;
        if let Some(tx) = root_tx {
            // Audit record; abort changes no state, so durability is optional.
            if let Err(err) = self.shared.wal.append(&WalRecord::Abort { tx }, false) {
                warn!(tx = tx.0, error = %err, "txn.abort.wal_append_failed");
            }
        }
        Ok(())
    }

    /// Adds a fact. Outside a batch this is an auto-committed single write.
    pub fn add_fact(&self, t: Triple) -> Result<()> {
        self.write_fact(BatchOp::Put(t))
    }

    /// Deletes a fact. Outside a batch this is an auto-committed single
    /// write.
    pub fn delete_fact(&self, t: Triple) -> Result<()> {
        self.write_fact(BatchOp::Delete(t))
    }

    fn write_fact(&self, op: BatchOp) -> Result<()> {
        let mut txns = self.shared.txns.lock();
        if txns.in_batch() {
            return txns.buffer(op);
        }
        txns.begin(None, None)?;
        txns.buffer(op)?;
        drop(txns);
        self.shared
            .commit_batch(self.shared.options.durable_commits)
            .map(|_| ())
    }

    /// All committed triples matching `criteria`, in canonical order.
    pub fn query(&self, criteria: &Criteria) -> Result<Vec<Triple>> {
        let state = self.shared.state.read();
        let order = TripleOrder::for_criteria(criteria);
        if let Some(primary) = criteria.primary_for(order) {
            self.shared.metrics.record_read(order, primary);
        }
        query_parts(
            &state.readers,
            &state.manifest,
            &state.staging.snapshot(),
            criteria,
        )
    }

    /// Whether the committed state contains `t`.
    pub fn contains_fact(&self, t: &Triple) -> Result<bool> {
        Ok(!self.query(&Criteria::exact(t))?.is_empty())
    }

    /// Runs `f` against an immutable view pinned to the current epoch. The
    /// reader lease is acquired before `f` runs and released on every exit
    /// path, including panics.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&SnapshotView) -> R) -> Result<R> {
        let view = self.acquire_view()?;
        Ok(f(&view))
    }

    /// Opens a streaming cursor over the matching triples: finite,
    /// forward-only, not restartable. The cursor pins the current epoch for
    /// its lifetime.
    pub fn stream_query(&self, criteria: &Criteria, batch_size: usize) -> Result<QueryCursor> {
        let mut view = self.acquire_view()?;
        let results = view.query(criteria)?;
        let lease = view.lease.take();
        Ok(QueryCursor::new(results, batch_size, lease))
    }

    fn acquire_view(&self) -> Result<SnapshotView> {
        let state = self.shared.state.read();
        let epoch = state.manifest.epoch;
        let lease_id = self.shared.registry.register(std::process::id(), epoch)?;
        let lease = LeaseGuard::new(self.shared.registry.clone(), lease_id);
        Ok(SnapshotView {
            epoch,
            manifest: Arc::clone(&state.manifest),
            readers: state.readers.clone(),
            overlay: state.staging.snapshot(),
            lease: Some(lease),
        })
    }

    /// Drains the staging overlay into the paged indexes, folds deletions
    /// into manifest tombstones, rewrites the manifest, and truncates the
    /// WAL.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush()
    }

    /// Rewrites the highest-scoring fragmented primaries. See
    /// [`CompactionPolicy`] for the hotness weighting.
    pub fn compact_incremental(&self, limit: usize) -> Result<CompactReport> {
        self.shared.compact_incremental(limit)
    }

    /// Rewrites one whole ordering into its next generation file.
    pub fn compact_full(&self, order: TripleOrder) -> Result<CompactReport> {
        self.shared.compact_full(order)
    }

    /// Deletes orphaned generation files no live lease can reach. When the
    /// registry is unreachable this degrades to conservative mode and
    /// reclaims nothing.
    pub fn collect_garbage(&self) -> Result<GcReport> {
        self.shared.collect_garbage()
    }

    /// Triggers one background compaction cycle, when the worker is running.
    pub fn trigger_auto_compact(&self) {
        if let Some(worker) = &*self.worker.lock() {
            worker.trigger();
        }
    }

    /// Pending staged adds and removes.
    pub fn staging_sizes(&self) -> (usize, usize) {
        let state = self.shared.state.read();
        (
            state.staging.pending_adds(),
            state.staging.pending_removes(),
        )
    }

    /// Number of interned terms.
    pub fn term_count(&self) -> usize {
        self.shared.state.read().dict.len()
    }

    /// Flushes and shuts down the worker and the embedded registry service.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(worker) = self.worker.lock().take() {
            worker.shutdown();
        }
        let result = self.shared.flush();
        if let Some(mut service) = self.service.lock().take() {
            service.stop();
        }
        info!(db = %self.shared.paths.data.display(), "db.close");
        result
    }
}

impl Drop for TripleStore {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            if let Err(err) = self.close() {
                warn!(error = %err, "db.close.failed");
            }
        }
    }
}

impl Shared {
    fn commit_batch(&self, durable: bool) -> Result<CommitOutcome> {
        let kind = self.txns.lock().commit()?;
        let root = match kind {
            CommitKind::Nested => {
                return Ok(CommitOutcome::Committed {
                    epoch: self.state.read().manifest.epoch,
                });
            }
            CommitKind::Duplicate { tx } => {
                debug!(tx = tx.0, "txn.commit.duplicate");
                return Ok(CommitOutcome::AlreadyCommitted);
            }
            CommitKind::Root(root) => root,
        };
        if root.puts.is_empty() && root.deletes.is_empty() && root.tx.is_none() {
            return Ok(CommitOutcome::Committed {
                epoch: self.state.read().manifest.epoch,
            });
        }

        let tx = root.tx.unwrap_or_else(auto_tx);
        let mut records = Vec::with_capacity(root.puts.len() + root.deletes.len() + 2);
        records.push(WalRecord::Begin { tx });
        for t in &root.puts {
            records.push(WalRecord::Put { tx, triple: *t });
        }
        for t in &root.deletes {
            records.push(WalRecord::Delete { tx, triple: *t });
        }
        records.push(WalRecord::Commit {
            tx,
            session: root.session,
        });
        self.wal.append_all(&records, durable)?;

        let epoch = {
            let mut state = self.state.write();
            state.staging.merge(&root.puts, &root.deletes);
            state.pending_txids.push(tx);
            for t in &root.puts {
                self.metrics.record_write(t);
            }
            if state.dict_dirty {
                // New terms must never outlive a commit that references them.
                datafile::write_data_file(
                    &self.paths.data,
                    self.salt,
                    &state.dict,
                    &state.staging.snapshot(),
                    &state.properties,
                )?;
                state.dict_dirty = false;
            }
            let mut manifest = (*state.manifest).clone();
            manifest.bump_epoch();
            manifest.store(&self.paths.pages_dir)?;
            let epoch = manifest.epoch;
            state.manifest = Arc::new(manifest);
            epoch
        };
        self.txns.lock().remember(tx);
        debug!(
            tx = tx.0,
            puts = root.puts.len(),
            deletes = root.deletes.len(),
            epoch = epoch.0,
            durable,
            "txn.commit"
        );
        Ok(CommitOutcome::Committed { epoch })
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.write();
        let overlay = state.staging.snapshot();
        if overlay.is_empty() && !state.dict_dirty && state.pending_txids.is_empty() {
            return Ok(());
        }

        let mut manifest = (*state.manifest).clone();
        let spo = &state.readers[TripleOrder::Spo.slot()];

        // Classify the overlay against the already-flushed pages.
        let mut to_write: Vec<Triple> = Vec::new();
        for t in overlay.adds.iter() {
            if manifest.tombstones.contains(t) {
                // Re-added after deletion; the pages still hold it.
                manifest.tombstones.remove(t);
            } else if !spo.contains(t)? {
                to_write.push(*t);
            }
        }
        for t in overlay.removes.iter() {
            if spo.contains(t)? {
                manifest.tombstones.insert(*t);
            }
        }

        let codec = manifest.compression.codec.page_codec();
        let mut pages_written = 0usize;
        if !to_write.is_empty() {
            for order in TripleOrder::ALL {
                let lookup = manifest.lookup(order).clone();
                let io = StdFileIo::open(self.paths.pages_dir.join(lookup.file_name()))?;
                let mut writer =
                    PagedIndexWriter::new(order, manifest.page_size, codec, self.salt);
                for t in &to_write {
                    writer.push(*t);
                }
                let descriptors = writer.finalize(&io)?;
                io.sync_all()?;
                pages_written += descriptors.len();
                manifest.lookup_mut(order).insert_pages(descriptors);
            }
        }

        for tx in &state.pending_txids {
            manifest.remember_tx(*tx);
        }
        manifest.bump_epoch();
        manifest.store(&self.paths.pages_dir)?;

        // The manifest on disk is the commit point; from here on, keep the
        // in-memory view in step with it before each fallible tail step.
        let epoch = manifest.epoch;
        let manifest = Arc::new(manifest);
        state.manifest = Arc::clone(&manifest);
        state.pending_txids.clear();
        state.readers = open_readers(
            &self.paths.pages_dir,
            &manifest,
            self.salt,
            self.options.cache_pages,
        )?;

        let drained = state.staging.drain();
        datafile::write_data_file(
            &self.paths.data,
            self.salt,
            &state.dict,
            &state.staging.snapshot(),
            &state.properties,
        )?;
        state.dict_dirty = false;
        self.wal.reset()?;
        info!(
            triples_written = to_write.len(),
            pages_written,
            removed = drained.removes.len(),
            epoch = epoch.0,
            "db.flush"
        );
        Ok(())
    }
}
