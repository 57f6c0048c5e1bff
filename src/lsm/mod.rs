//! # LSM Tree Top
//!
//! Composes the write-ahead log, memtable manager, level manager,
//! manifest, and compaction scheduler behind one handle.
//!
//! ## Write path
//!
//! `put`/`delete` assign the next sequence under the shared tree
//! lock, append to the WAL **first**, then apply to the active
//! memtable. Crossing the memtable size budget freezes and rotates
//! (blocking on backpressure when the immutable queue is full), and
//! every flushable state change nudges the compaction trigger.
//!
//! ## Read path
//!
//! `get` consults the memtable manager (active, then immutables
//! newest-first); a tombstone answers "not found" immediately.
//! Misses fall through to the level manager, which walks level 0
//! newest-first and binary-searches the deeper levels.
//!
//! ## Recovery
//!
//! `open` loads the manifest, re-derives level membership from the
//! `.sst` files on disk (skipping corrupt ones with a warning),
//! replays the WAL into a fresh memtable honoring the last
//! checkpoint, and seeds the sequence counter past everything seen.
//!
//! ## Resource pressure
//!
//! A write that fails with a resource kind (`disk_full`,
//! `out_of_memory`) closes a write gate: further writes are refused
//! with the same kind while reads continue. The gate reopens once a
//! `flush` succeeds.
//!
//! ## Stall visibility
//!
//! Maintenance paths take the tree lock with a deadline through a
//! [`DeadlockDetector`]-watched [`TimedRwLock`]; `stalled_waiters`
//! reports any waiter that has overrun its patience.

#[cfg(test)]
mod tests;

pub mod batch;

pub use batch::{BatchOptions, BatchReport, BatchWriter};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compaction::{
    CompactionContext, CompactionError, CompactionScheduler, CompactionStatsSnapshot,
};
use crate::config::{LsmConfig, MAX_LEVELS};
use crate::error::{ErrorKind, KindError};
use crate::level::{LevelError, LevelManager, TableMeta, parse_table_file_name};
use crate::manifest::{Manifest, ManifestError};
use crate::memtable::{MemtableError, MemtableManager};
use crate::sync::{DeadlockDetector, StalledWaiter, SyncError, TimedRwLock};
use crate::wal::{Wal, WalError, WalRecord, WalRecordType};

/// Sub-directory of the data dir holding WAL segments.
pub const WAL_DIR: &str = "wal";

/// Sub-directory of the data dir holding this engine's tables.
pub const TABLE_DIR: &str = "lsm";

/// How long `flush` waits for the immutable queue to drain.
const FLUSH_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Patience for maintenance-path tree-lock acquisitions. While a
/// waiter is inside this window it is visible to the deadlock
/// detector; past it, the operation fails with `timeout` instead of
/// hanging.
const TREE_LOCK_PATIENCE: Duration = Duration::from_secs(10);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the tree.
#[derive(Debug, Error)]
pub enum LsmError {
    /// WAL failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Memtable failure.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Level registry failure.
    #[error("level error: {0}")]
    Level(#[from] LevelError),

    /// Manifest failure.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Compaction failure.
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A deadline-bounded lock acquisition gave up.
    #[error("lock error: {0}")]
    Lock(#[from] SyncError),

    /// A key or value failed validation.
    #[error("invalid argument: {0}")]
    InvalidParam(String),

    /// Writes are suspended after a resource failure.
    #[error("writes suspended ({0})")]
    WritesSuspended(ErrorKind),

    /// The flush drain did not finish within its deadline.
    #[error("flush timed out with {0} immutables pending")]
    FlushTimeout(usize),
}

impl KindError for LsmError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Wal(e) => e.kind(),
            Self::Memtable(e) => e.kind(),
            Self::Level(e) => e.kind(),
            Self::Manifest(e) => e.kind(),
            Self::Compaction(e) => e.kind(),
            Self::Io(e) => crate::error::io_error_kind(e),
            Self::Lock(e) => e.kind(),
            Self::InvalidParam(_) => ErrorKind::InvalidParam,
            Self::WritesSuspended(kind) => *kind,
            Self::FlushTimeout(_) => ErrorKind::Timeout,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Point-in-time statistics for one tree.
#[derive(Debug, Clone)]
pub struct LsmStats {
    /// Bytes resident in the active memtable and immutable queue.
    pub memtable_bytes: usize,
    /// Entries across the active memtable and immutable queue.
    pub memtable_entries: usize,
    /// Frozen memtables awaiting flush.
    pub immutable_count: usize,
    /// Tables per level.
    pub level_file_counts: [u32; MAX_LEVELS],
    /// Total tables on disk.
    pub sstable_count: usize,
    /// Highest assigned sequence.
    pub last_seq: u64,
    /// Compaction counters.
    pub compaction: CompactionStatsSnapshot,
}

// ------------------------------------------------------------------------------------------------
// LsmTree
// ------------------------------------------------------------------------------------------------

/// The log-structured merge tree engine.
pub struct LsmTree {
    config: LsmConfig,
    data_dir: PathBuf,

    /// Shared for routine reads/writes; exclusive for atomic batch
    /// commits and rotation-sensitive sections. Maintenance paths
    /// acquire it with a deadline, watched by `detector`.
    tree_lock: TimedRwLock<()>,

    /// Registry of deadline-bounded waiters on this tree's locks.
    detector: Arc<DeadlockDetector>,

    /// Highest assigned sequence number.
    seq: AtomicU64,

    /// Resource-pressure write gate; holds the kind that closed it.
    write_gate: Mutex<Option<ErrorKind>>,

    wal: Arc<Wal>,
    manifest: Arc<Manifest>,
    memtables: Arc<MemtableManager>,
    levels: Arc<LevelManager>,
    scheduler: CompactionScheduler,
}

impl LsmTree {
    /// Opens (or creates) a tree rooted at `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>, config: LsmConfig) -> Result<Self, LsmError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let table_dir = data_dir.join(TABLE_DIR);
        let wal_dir = data_dir.join(WAL_DIR);
        fs::create_dir_all(&table_dir)?;
        fs::create_dir_all(&wal_dir)?;

        let manifest = Arc::new(Manifest::open(&data_dir)?);
        let levels = Arc::new(LevelManager::new(config.clone()));

        // Level membership comes from the table files themselves;
        // corrupt files are skipped (and logged), unknown files
        // quarantined by ignoring them.
        let mut max_seq_on_disk = 0u64;
        for entry in fs::read_dir(&table_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((level, file_id)) = parse_table_file_name(&name) else {
                if name.ends_with(".sst") {
                    warn!(file = %name, "unrecognized table file name, ignoring");
                }
                continue;
            };
            match TableMeta::load(entry.path(), level, file_id) {
                Ok(meta) => {
                    max_seq_on_disk = max_seq_on_disk.max(meta.reader()?.max_seq());
                    levels.add_table(meta)?;
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping unreadable table");
                }
            }
        }

        let recorded = manifest.file_counts();
        let actual = levels.file_counts();
        if recorded != actual {
            warn!(
                ?recorded,
                ?actual,
                "manifest file counts disagree with directory, trusting the directory"
            );
        }
        manifest.ensure_next_file_id(levels.max_file_id() + 1);

        // WAL replay reconstructs the memtable state that never made
        // it to a table. Records at or below the last checkpoint are
        // already durable and are dropped.
        let wal = Arc::new(Wal::open(&wal_dir, config.wal_size_limit, config.sync_writes)?);
        let records = wal.replay()?;
        let checkpoint_seq = records
            .iter()
            .filter(|r| r.record_type == WalRecordType::Checkpoint)
            .map(|r| r.seq)
            .max()
            .unwrap_or(0);

        // Auto-freeze stays off until the scheduler is up: a replay
        // large enough to fill the immutable queue would otherwise
        // block recovery with nothing draining it.
        let memtables = Arc::new(MemtableManager::new(
            config.memtable_max_size,
            config.max_immutable_count,
            false,
        ));

        let mut max_seq_in_wal = checkpoint_seq;
        let mut replayed = 0usize;
        for record in records {
            max_seq_in_wal = max_seq_in_wal.max(record.seq);
            if record.seq <= checkpoint_seq {
                continue;
            }
            match record.record_type {
                WalRecordType::Put => {
                    memtables.put(&record.key, &record.value, record.seq)?;
                    replayed += 1;
                }
                WalRecordType::Delete => {
                    memtables.delete(&record.key, record.seq)?;
                    replayed += 1;
                }
                // Handled above / reserved boundary marker.
                WalRecordType::Checkpoint | WalRecordType::Commit => {}
            }
        }

        let last_seq = max_seq_on_disk.max(max_seq_in_wal);
        manifest.set_active_memtable(memtables.active().id());

        info!(
            data_dir = %data_dir.display(),
            tables = levels.total_file_count(),
            replayed,
            last_seq,
            "tree opened"
        );

        let scheduler = CompactionScheduler::start(CompactionContext {
            config: config.clone(),
            table_dir,
            memtables: Arc::clone(&memtables),
            levels: Arc::clone(&levels),
            manifest: Arc::clone(&manifest),
            wal: Arc::clone(&wal),
        });
        memtables.set_auto_freeze(config.auto_freeze);
        if memtables.active().approximate_bytes() >= config.memtable_max_size {
            memtables.rotate();
        }

        let detector = Arc::new(DeadlockDetector::new());
        let tree = Self {
            config,
            data_dir,
            tree_lock: TimedRwLock::with_detector("tree", (), Arc::clone(&detector)),
            detector,
            seq: AtomicU64::new(last_seq),
            write_gate: Mutex::new(None),
            wal,
            manifest,
            memtables,
            levels,
            scheduler,
        };
        // Anything replayed may already warrant a flush.
        tree.scheduler.trigger_check();
        Ok(tree)
    }

    // --------------------------------------------------------------------------------------------
    // Write path
    // --------------------------------------------------------------------------------------------

    /// Inserts or updates a key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), LsmError> {
        self.validate_key(key)?;
        self.validate_value(value)?;
        self.check_write_gate()?;

        let _tree = self.tree_lock.read();
        let seq = self.next_seq();

        self.wal_append(&WalRecord::put(seq, key, value))?;
        self.memtables.put(key, value, seq)?;

        if self.memtables.should_flush() {
            self.scheduler.trigger_check();
        }
        Ok(())
    }

    /// Deletes a key by writing a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<(), LsmError> {
        self.validate_key(key)?;
        self.check_write_gate()?;

        let _tree = self.tree_lock.read();
        let seq = self.next_seq();

        self.wal_append(&WalRecord::delete(seq, key))?;
        self.memtables.delete(key, seq)?;

        if self.memtables.should_flush() {
            self.scheduler.trigger_check();
        }
        Ok(())
    }

    /// Starts a batch with default options.
    pub fn batch(&self) -> BatchWriter<'_> {
        BatchWriter::new(self, BatchOptions::default())
    }

    /// Starts a batch with explicit options.
    pub fn batch_with(&self, options: BatchOptions) -> BatchWriter<'_> {
        BatchWriter::new(self, options)
    }

    // --------------------------------------------------------------------------------------------
    // Read path
    // --------------------------------------------------------------------------------------------

    /// Point lookup. `Ok(None)` means not found (absent or deleted).
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, LsmError> {
        self.validate_key(key)?;
        let _tree = self.tree_lock.read();

        if let Some(version) = self.memtables.get(key) {
            return Ok(if version.deleted {
                None
            } else {
                Some(version.value)
            });
        }

        match self.levels.get(key)? {
            Some(version) if !version.deleted => Ok(Some(version.value)),
            _ => Ok(None),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance
    // --------------------------------------------------------------------------------------------

    /// Freezes the active memtable (if non-empty) and drains the
    /// immutable queue to level 0. Idempotent; reopens the write gate
    /// on success.
    ///
    /// The rotation takes the tree lock exclusively with a deadline —
    /// a wedged foreground holder turns this into a `timeout` (and a
    /// [`stalled_waiters`](Self::stalled_waiters) entry) rather than
    /// a hang.
    pub fn flush(&self) -> Result<(), LsmError> {
        {
            let _tree = self.tree_lock.write_for(TREE_LOCK_PATIENCE)?;
            if !self.memtables.active().is_empty() {
                self.memtables.rotate();
            }
        }
        self.scheduler.trigger_check();

        let deadline = Instant::now() + FLUSH_DRAIN_TIMEOUT;
        while self.memtables.immutable_count() > 0 {
            if Instant::now() > deadline {
                return Err(LsmError::FlushTimeout(self.memtables.immutable_count()));
            }
            self.scheduler.trigger_check();
            std::thread::sleep(Duration::from_millis(2));
        }

        *self.write_gate.lock() = None;
        Ok(())
    }

    /// Queues a full rewrite: every level is pushed downward until
    /// only the deepest populated level holds data.
    pub fn compact(&self) {
        self.scheduler.schedule_major();
    }

    /// Queues an urgent compaction of one specific level.
    pub fn compact_level(&self, level: usize) {
        self.scheduler.schedule_manual(level);
    }

    /// Fsyncs the WAL.
    pub fn sync(&self) -> Result<(), LsmError> {
        self.wal.sync()?;
        Ok(())
    }

    /// Flushes everything, checkpoints, persists the manifest, and
    /// stops the worker pool.
    pub fn close(&self) -> Result<(), LsmError> {
        self.flush()?;
        self.wal.checkpoint(self.seq.load(Ordering::SeqCst))?;

        self.manifest.set_file_counts(self.levels.file_counts());
        self.manifest.set_active_memtable(self.memtables.active().id());
        self.manifest.save()?;

        self.scheduler.shutdown();
        debug!(data_dir = %self.data_dir.display(), "tree closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Introspection
    // --------------------------------------------------------------------------------------------

    /// Approximate entry count: every resident version, duplicates
    /// across layers not collapsed. An upper bound on live keys.
    pub fn approximate_count(&self) -> u64 {
        let in_tables: u64 = (0..MAX_LEVELS)
            .flat_map(|level| self.levels.tables(level))
            .map(|meta| meta.entry_count)
            .sum();
        self.memtables.entry_count() as u64 + in_tables
    }

    /// Resident memory attributable to this tree.
    pub fn memory_usage(&self) -> usize {
        self.memtables.approximate_bytes()
    }

    /// Highest assigned sequence.
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Deadline-bounded lock waiters that have overrun their patience
    /// — the coarse deadlock signal an operator thread polls.
    pub fn stalled_waiters(&self) -> Vec<StalledWaiter> {
        self.detector.sweep()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> LsmStats {
        LsmStats {
            memtable_bytes: self.memtables.approximate_bytes(),
            memtable_entries: self.memtables.entry_count(),
            immutable_count: self.memtables.immutable_count(),
            level_file_counts: self.levels.file_counts(),
            sstable_count: self.levels.total_file_count(),
            last_seq: self.last_seq(),
            compaction: self.scheduler.stats(),
        }
    }

    /// The tree's configuration.
    pub fn config(&self) -> &LsmConfig {
        &self.config
    }

    // --------------------------------------------------------------------------------------------
    // Internals (shared with the batch writer)
    // --------------------------------------------------------------------------------------------

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn validate_key(&self, key: &[u8]) -> Result<(), LsmError> {
        if key.is_empty() {
            return Err(LsmError::InvalidParam("key must not be empty".into()));
        }
        if key.len() > self.config.max_key_len {
            return Err(LsmError::InvalidParam(format!(
                "key of {} bytes exceeds limit {}",
                key.len(),
                self.config.max_key_len
            )));
        }
        Ok(())
    }

    pub(crate) fn validate_value(&self, value: &[u8]) -> Result<(), LsmError> {
        if value.is_empty() {
            return Err(LsmError::InvalidParam("value must not be empty".into()));
        }
        if value.len() > self.config.max_value_len {
            return Err(LsmError::InvalidParam(format!(
                "value of {} bytes exceeds limit {}",
                value.len(),
                self.config.max_value_len
            )));
        }
        Ok(())
    }

    pub(crate) fn check_write_gate(&self) -> Result<(), LsmError> {
        match *self.write_gate.lock() {
            Some(kind) => Err(LsmError::WritesSuspended(kind)),
            None => Ok(()),
        }
    }

    /// WAL append that closes the write gate on resource failures.
    pub(crate) fn wal_append(&self, record: &WalRecord) -> Result<(), LsmError> {
        match self.wal.append(record) {
            Ok(()) => Ok(()),
            Err(e) => {
                let kind = e.kind();
                if kind.is_resource() {
                    warn!(%kind, "resource failure, suspending writes");
                    *self.write_gate.lock() = Some(kind);
                }
                Err(e.into())
            }
        }
    }

    pub(crate) fn memtables(&self) -> &Arc<MemtableManager> {
        &self.memtables
    }

    pub(crate) fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    pub(crate) fn tree_lock(&self) -> &TimedRwLock<()> {
        &self.tree_lock
    }

    pub(crate) fn trigger_compaction_check(&self) {
        self.scheduler.trigger_check();
    }
}

impl Drop for LsmTree {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
