//! # StrataKV — an embeddable LSM key-value store
//!
//! The engine ties the [`command`], [`wal`], [`memtable`], and [`sstable`]
//! crates together into a persistent key-value store over a single local
//! directory. Keys and values are opaque, non-empty byte strings.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ write.rs → WAL append → memtable insert       │
//! │              |                                │
//! │              |  (entry count > threshold?)    │
//! │              |            yes                 │
//! │              v                                │
//! │        rotate() → freeze + new SSTable        │
//! │                                               │
//! │ read.rs → active → frozen → SSTs newest-first │
//! │            (first match wins)                 │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Directory layout
//!
//! | File               | Purpose                                    |
//! |--------------------|--------------------------------------------|
//! | `wal`              | active write-ahead log                     |
//! | `wal.<seq>`        | frozen log awaiting its flush to complete  |
//! | `<seq>.sst`        | immutable table; newest = largest sequence |
//! | `<seq>.sst.tmp`    | in-flight table build, cleaned at open     |
//!
//! ## Crash Safety
//!
//! Every write is appended to the WAL **before** the memtable update, and
//! the append is fsynced. A frozen log is only deleted **after** its
//! SSTable has been fsynced and renamed into place. SSTables are written
//! atomically via temp file + rename. Replay is idempotent by key, so a
//! crash between table publication and log deletion merely replays
//! duplicate commands on the next open.
//!
//! ## Concurrency
//!
//! All public operations take `&self` and may be called from any thread.
//! One engine-wide readers/writer lock guards the in-memory state; readers
//! hold shared access for the whole precedence walk, writers take exclusive
//! access for the append + insert critical section. The on-disk table build
//! runs outside the lock against the immutable frozen memtable. Tombstones
//! are never reclaimed; there is no compaction.

mod error;
mod read;
mod recovery;
mod write;

pub use error::{Error, Result};

use memtable::MemTable;
use parking_lot::{Mutex, RwLock};
use sstable::SSTableReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wal::Wal;

/// File name of the active write-ahead log inside the engine directory.
pub(crate) const WAL_FILE: &str = "wal";

pub(crate) enum Health {
    Open,
    /// A WAL append or flush failed; writes are rejected, reads still serve.
    Poisoned,
    Closed,
}

pub(crate) struct Inner {
    pub(crate) health: Health,
    pub(crate) active: MemTable,
    /// Present only while a flush is in flight; immutable and consulted by
    /// readers after `active`.
    pub(crate) frozen: Option<Arc<MemTable>>,
    /// Open tables, newest first.
    pub(crate) tables: Vec<SSTableReader>,
    /// `None` once the engine is closed.
    pub(crate) wal: Option<Wal>,
    /// Sequence number for the next flushed table (and its frozen log).
    pub(crate) next_seq: u64,
    /// Frozen logs whose contents are already persisted (or replayed into
    /// `active`); deleted opportunistically when the next flush completes.
    pub(crate) retired_wals: Vec<PathBuf>,
}

impl Inner {
    pub(crate) fn writable(&self) -> Result<()> {
        match self.health {
            Health::Open => Ok(()),
            Health::Poisoned => Err(Error::IllegalState(
                "engine poisoned by an earlier write failure",
            )),
            Health::Closed => Err(Error::IllegalState("engine is closed")),
        }
    }

    pub(crate) fn readable(&self) -> Result<()> {
        match self.health {
            Health::Open | Health::Poisoned => Ok(()),
            Health::Closed => Err(Error::IllegalState("engine is closed")),
        }
    }
}

/// The storage engine orchestrating memtable, WAL, and SSTables.
///
/// # Write Path
///
/// 1. Append the command to the WAL (fsynced; crash-safe durability).
/// 2. Insert the command into the in-memory memtable.
/// 3. If the memtable now holds more than `threshold` entries, rotate:
///    freeze the memtable and WAL, flush to a new SSTable, retire the log.
///
/// # Read Path
///
/// 1. Check the active memtable, then the frozen memtable if a flush is in
///    flight (freshest data, includes tombstones).
/// 2. Check SSTables from newest to oldest.
/// 3. First match wins; a tombstone reads as absent.
///
/// # Recovery
///
/// On [`open`](Engine::open), leftover `.sst.tmp` build artifacts are
/// removed, existing tables are opened newest-first, and frozen logs (oldest
/// first) followed by the active log are replayed into a fresh memtable. If
/// replay overshoots the threshold (possible after an interrupted flush),
/// the engine flushes once before serving.
pub struct Engine {
    pub(crate) dir: PathBuf,
    pub(crate) part_size: usize,
    pub(crate) threshold: usize,
    pub(crate) inner: RwLock<Inner>,
    /// Serializes rotations so at most one frozen memtable exists. A second
    /// writer reaching the threshold parks here until the first flush
    /// publishes its table.
    pub(crate) flush_lock: Mutex<()>,
}

impl Engine {
    /// Opens the engine over `dir`, creating the directory if needed and
    /// performing full recovery.
    ///
    /// `part_size` is the maximum number of commands per SSTable partition;
    /// `threshold` is the memtable entry count that triggers a flush.
    pub fn open<P: AsRef<Path>>(dir: P, part_size: usize, threshold: usize) -> Result<Self> {
        recovery::open(dir.as_ref(), part_size, threshold)
    }

    /// Closes the engine: the WAL handle first, then the table handles.
    ///
    /// The memtable is **not** flushed; recovery relies on WAL replay.
    /// Fails with [`Error::IllegalState`] if any operation (including a
    /// flush) is in flight, or if the engine is already closed.
    pub fn close(&self) -> Result<()> {
        let _serial = self
            .flush_lock
            .try_lock()
            .ok_or(Error::IllegalState("close called with a flush in flight"))?;
        let mut inner = self
            .inner
            .try_write()
            .ok_or(Error::IllegalState("close called with operations in flight"))?;
        if matches!(inner.health, Health::Closed) {
            return Err(Error::IllegalState("engine is closed"));
        }
        inner.health = Health::Closed;
        inner.wal = None;
        inner.tables.clear();
        inner.frozen = None;
        Ok(())
    }

    /// Directory this engine persists into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Maximum commands per SSTable partition.
    #[must_use]
    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Memtable entry count that triggers a flush.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of open SSTables.
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.inner.read().tables.len()
    }

    /// Number of entries in the active memtable, tombstones included.
    #[must_use]
    pub fn memtable_len(&self) -> usize {
        self.inner.read().active.len()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Engine")
            .field("dir", &self.dir)
            .field("part_size", &self.part_size)
            .field("threshold", &self.threshold)
            .field("memtable_entries", &inner.active.len())
            .field("flush_in_flight", &inner.frozen.is_some())
            .field("sstable_count", &inner.tables.len())
            .field("next_seq", &inner.next_seq)
            .finish()
    }
}

pub(crate) fn table_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{seq:08}.sst"))
}

pub(crate) fn frozen_wal_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{WAL_FILE}.{seq:08}"))
}
