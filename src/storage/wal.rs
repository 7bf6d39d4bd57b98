#![forbid(unsafe_code)]

//! Append-only write-ahead log.
//!
//! Records are CRC-framed and applied strictly in append order. Replay is
//! sequential and deterministic: it stops at the first truncated or invalid
//! frame, and [`Wal::recover`] truncates that tail away rather than failing
//! ("tail-safe truncation"). A failed append means the change is not
//! guaranteed durable; the caller decides whether to surface or retry.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::primitives::io::FileIo;
use crate::types::checksum::{crc32, crc32_chunks};
use crate::types::{Result, SessionId, TermId, TernaError, Triple, TxId};

/// Magic bytes opening the WAL file.
pub const WAL_MAGIC: [u8; 4] = *b"TRNW";
/// WAL format version.
pub const WAL_FORMAT_VERSION: u16 = 1;
/// Length of the WAL file header.
pub const WAL_HEADER_LEN: usize = 20;
/// Length of the per-record frame header (payload length + payload CRC).
pub const FRAME_HEADER_LEN: usize = 8;

// Largest legal record payload; anything bigger in the length field is tail
// garbage, not a record.
const MAX_PAYLOAD_LEN: usize = 64;

const TAG_BEGIN: u8 = 1;
const TAG_PUT: u8 = 2;
const TAG_DELETE: u8 = 3;
const TAG_COMMIT: u8 = 4;
const TAG_ABORT: u8 = 5;

/// One logical WAL record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WalRecord {
    /// Opens transaction `tx`.
    Begin {
        /// Transaction id.
        tx: TxId,
    },
    /// Adds a triple under transaction `tx`.
    Put {
        /// Transaction id.
        tx: TxId,
        /// The added fact.
        triple: Triple,
    },
    /// Deletes a triple under transaction `tx`.
    Delete {
        /// Transaction id.
        tx: TxId,
        /// The deleted fact.
        triple: Triple,
    },
    /// Commits transaction `tx`.
    Commit {
        /// Transaction id.
        tx: TxId,
        /// Session tag for diagnostics; zero when absent.
        session: SessionId,
    },
    /// Aborts transaction `tx`.
    Abort {
        /// Transaction id.
        tx: TxId,
    },
}

impl WalRecord {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            WalRecord::Begin { tx } => {
                out.push(TAG_BEGIN);
                out.extend_from_slice(&tx.0.to_be_bytes());
            }
            WalRecord::Put { tx, triple } => {
                out.push(TAG_PUT);
                out.extend_from_slice(&tx.0.to_be_bytes());
                encode_triple(triple, out);
            }
            WalRecord::Delete { tx, triple } => {
                out.push(TAG_DELETE);
                out.extend_from_slice(&tx.0.to_be_bytes());
                encode_triple(triple, out);
            }
            WalRecord::Commit { tx, session } => {
                out.push(TAG_COMMIT);
                out.extend_from_slice(&tx.0.to_be_bytes());
                out.extend_from_slice(&session.0.to_be_bytes());
            }
            WalRecord::Abort { tx } => {
                out.push(TAG_ABORT);
                out.extend_from_slice(&tx.0.to_be_bytes());
            }
        }
    }

    fn decode(src: &[u8]) -> Result<Self> {
        if src.is_empty() {
            return Err(TernaError::Corruption("wal record empty"));
        }
        let tx = |bytes: &[u8]| -> Result<TxId> {
            if bytes.len() < 8 {
                return Err(TernaError::Corruption("wal record truncated"));
            }
            Ok(TxId(u64::from_be_bytes(bytes[..8].try_into().unwrap())))
        };
        match src[0] {
            TAG_BEGIN if src.len() == 9 => Ok(WalRecord::Begin { tx: tx(&src[1..])? }),
            TAG_PUT if src.len() == 33 => Ok(WalRecord::Put {
                tx: tx(&src[1..])?,
                triple: decode_triple(&src[9..])?,
            }),
            TAG_DELETE if src.len() == 33 => Ok(WalRecord::Delete {
                tx: tx(&src[1..])?,
                triple: decode_triple(&src[9..])?,
            }),
            TAG_COMMIT if src.len() == 17 => Ok(WalRecord::Commit {
                tx: tx(&src[1..])?,
                session: SessionId(u64::from_be_bytes(src[9..17].try_into().unwrap())),
            }),
            TAG_ABORT if src.len() == 9 => Ok(WalRecord::Abort { tx: tx(&src[1..])? }),
            _ => Err(TernaError::Corruption("wal record tag or length invalid")),
        }
    }
}

fn encode_triple(t: &Triple, out: &mut Vec<u8>) {
    out.extend_from_slice(&t.s.0.to_be_bytes());
    out.extend_from_slice(&t.p.0.to_be_bytes());
    out.extend_from_slice(&t.o.0.to_be_bytes());
}

fn decode_triple(src: &[u8]) -> Result<Triple> {
    if src.len() < 24 {
        return Err(TernaError::Corruption("wal triple truncated"));
    }
    Ok(Triple::new(
        TermId(u64::from_be_bytes(src[0..8].try_into().unwrap())),
        TermId(u64::from_be_bytes(src[8..16].try_into().unwrap())),
        TermId(u64::from_be_bytes(src[16..24].try_into().unwrap())),
    ))
}

/// Counters for WAL activity in this process.
#[derive(Clone, Copy, Debug, Default)]
pub struct WalStats {
    /// Records appended.
    pub records_appended: u64,
    /// Bytes appended (frames included).
    pub bytes_appended: u64,
    /// fsync calls issued.
    pub syncs: u64,
}

/// Result of scanning the log.
#[derive(Debug)]
pub struct WalReplay {
    /// Valid records, in append order.
    pub records: Vec<WalRecord>,
    /// File offset up to which frames validated.
    pub valid_up_to: u64,
    /// Bytes past `valid_up_to` (partial or corrupt tail).
    pub truncated_bytes: u64,
}

struct WalState {
    append_offset: u64,
    stats: WalStats,
}

/// Append-only durability log for one database.
pub struct Wal {
    io: Arc<dyn FileIo>,
    salt: u64,
    state: Mutex<WalState>,
}

impl Wal {
    /// Opens or creates the log, validating the header salt against the
    /// database salt.
    pub fn open(io: Arc<dyn FileIo>, salt: u64) -> Result<Self> {
        let len = io.len()?;
        if len < WAL_HEADER_LEN as u64 {
            let header = encode_header(salt);
            io.write_at(0, &header)?;
            io.truncate(WAL_HEADER_LEN as u64)?;
        } else {
            let mut buf = [0u8; WAL_HEADER_LEN];
            io.read_at(0, &mut buf)?;
            let stored_salt = decode_header(&buf)?;
            if stored_salt != salt {
                return Err(TernaError::Corruption("wal salt mismatch"));
            }
        }
        let append_offset = io.len()?.max(WAL_HEADER_LEN as u64);
        Ok(Self {
            io,
            salt,
            state: Mutex::new(WalState {
                append_offset,
                stats: WalStats::default(),
            }),
        })
    }

    /// Appends one record. With `durable`, fsyncs before returning.
    pub fn append(&self, record: &WalRecord, durable: bool) -> Result<()> {
        self.append_all(std::slice::from_ref(record), durable)
    }

    /// Appends a group of records contiguously, then optionally fsyncs once.
    pub fn append_all(&self, records: &[WalRecord], durable: bool) -> Result<()> {
        if records.is_empty() {
            if durable {
                self.sync()?;
            }
            return Ok(());
        }
        let mut buf = Vec::with_capacity(records.len() * (FRAME_HEADER_LEN + 33));
        for record in records {
            let mut payload = Vec::with_capacity(33);
            record.encode(&mut payload);
            buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            buf.extend_from_slice(&crc32(&payload).to_be_bytes());
            buf.extend_from_slice(&payload);
        }
        let mut state = self.state.lock();
        self.io.write_at(state.append_offset, &buf)?;
        state.append_offset += buf.len() as u64;
        state.stats.records_appended += records.len() as u64;
        state.stats.bytes_appended += buf.len() as u64;
        if durable {
            self.io.sync_all()?;
            state.stats.syncs += 1;
        }
        debug!(
            records = records.len(),
            bytes = buf.len(),
            durable,
            "wal.append"
        );
        Ok(())
    }

    /// Fsyncs pending appends.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()?;
        self.state.lock().stats.syncs += 1;
        Ok(())
    }

    /// Scans the log without mutating it.
    pub fn replay(&self) -> Result<WalReplay> {
        let end = self.io.len()?;
        let mut offset = WAL_HEADER_LEN as u64;
        let mut records = Vec::new();
        while offset + FRAME_HEADER_LEN as u64 <= end {
            let mut frame_header = [0u8; FRAME_HEADER_LEN];
            self.io.read_at(offset, &mut frame_header)?;
            let payload_len =
                u32::from_be_bytes(frame_header[0..4].try_into().unwrap()) as usize;
            let stored_crc = u32::from_be_bytes(frame_header[4..8].try_into().unwrap());
            if payload_len == 0 || payload_len > MAX_PAYLOAD_LEN {
                break;
            }
            let frame_end = offset + (FRAME_HEADER_LEN + payload_len) as u64;
            if frame_end > end {
                break;
            }
            let mut payload = vec![0u8; payload_len];
            self.io.read_at(offset + FRAME_HEADER_LEN as u64, &mut payload)?;
            if crc32(&payload) != stored_crc {
                break;
            }
            match WalRecord::decode(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
            offset = frame_end;
        }
        Ok(WalReplay {
            records,
            valid_up_to: offset,
            truncated_bytes: end.saturating_sub(offset),
        })
    }

    /// Scans the log and truncates any invalid tail left by a crash.
    pub fn recover(&self) -> Result<WalReplay> {
        let replay = self.replay()?;
        if replay.truncated_bytes > 0 {
            warn!(
                valid_up_to = replay.valid_up_to,
                dropped_bytes = replay.truncated_bytes,
                "wal.replay.truncated"
            );
            self.io.truncate(replay.valid_up_to)?;
            self.io.sync_all()?;
        }
        self.state.lock().append_offset = replay.valid_up_to;
        Ok(replay)
    }

    /// Empties the log after a successful flush.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.io.truncate(WAL_HEADER_LEN as u64)?;
        self.io.sync_all()?;
        state.append_offset = WAL_HEADER_LEN as u64;
        debug!("wal.reset");
        Ok(())
    }

    /// Total log length in bytes.
    pub fn len(&self) -> Result<u64> {
        self.io.len()
    }

    /// Returns `true` when no records follow the header.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? <= WAL_HEADER_LEN as u64)
    }

    /// Activity counters for this process.
    pub fn stats(&self) -> WalStats {
        self.state.lock().stats
    }

    /// Database salt the log was opened with.
    pub fn salt(&self) -> u64 {
        self.salt
    }
}

fn encode_header(salt: u64) -> [u8; WAL_HEADER_LEN] {
    let mut buf = [0u8; WAL_HEADER_LEN];
    buf[0..4].copy_from_slice(&WAL_MAGIC);
    buf[4..6].copy_from_slice(&WAL_FORMAT_VERSION.to_be_bytes());
    buf[6..8].fill(0);
    buf[8..16].copy_from_slice(&salt.to_be_bytes());
    let crc = crc32_chunks(&[&buf[..16]]);
    buf[16..20].copy_from_slice(&crc.to_be_bytes());
    buf
}

fn decode_header(buf: &[u8; WAL_HEADER_LEN]) -> Result<u64> {
    if buf[0..4] != WAL_MAGIC {
        return Err(TernaError::Corruption("wal magic mismatch"));
    }
    let version = u16::from_be_bytes(buf[4..6].try_into().unwrap());
    if version != WAL_FORMAT_VERSION {
        return Err(TernaError::Corruption("wal format version mismatch"));
    }
    let stored_crc = u32::from_be_bytes(buf[16..20].try_into().unwrap());
    if crc32_chunks(&[&buf[..16]]) != stored_crc {
        return Err(TernaError::Corruption("wal header crc mismatch"));
    }
    Ok(u64::from_be_bytes(buf[8..16].try_into().unwrap()))
}
