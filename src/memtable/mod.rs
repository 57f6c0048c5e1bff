//! # Memtable Module
//!
//! ## Design Invariants
//!
//! - A memtable stores **one version per key**: an update replaces the
//!   previous entry in place, so ties on a key are impossible within
//!   one table. Cross-table ordering is resolved by sequence number.
//! - Deletes are tombstones, not physical removal; they must survive
//!   until the deepest compaction proves no older occurrence exists.
//! - Key and value bytes are owned by the table's [`Arena`]; dropping
//!   the table (and any outstanding handles) releases them wholesale.
//! - `freeze()` is a one-way transition. A frozen table rejects writes
//!   and serves only `get` and iteration.
//!
//! ## Manager
//!
//! [`MemtableManager`] owns exactly one active memtable plus a FIFO
//! queue of frozen immutables awaiting flush, bounded by
//! `max_immutable_count`. When the queue is full, rotation **blocks**
//! on a condition variable until a flush frees a slot — backpressure,
//! never a drop. Flush workers remove a specific immutable by `Arc`
//! identity so concurrent flushes cannot double-consume a table.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, trace};

use crate::arena::{Arena, ArenaStats};
use crate::error::{ErrorKind, KindError};
use crate::types::{Entry, Version};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by memtable operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// The key was empty.
    #[error("key must not be empty")]
    EmptyKey,

    /// A write reached a table that is no longer active.
    #[error("memtable is {0:?}, writes rejected")]
    NotActive(MemtableState),
}

impl KindError for MemtableError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyKey => ErrorKind::InvalidParam,
            Self::NotActive(_) => ErrorKind::Busy,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

/// Lifecycle state of a memtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemtableState {
    /// Accepting writes.
    Active,
    /// Frozen; queued for flush.
    Frozen,
    /// A compaction worker is streaming it into an SSTable.
    Flushing,
    /// Flushed; about to be dropped.
    Flushed,
}

/// One versioned entry inside a memtable.
#[derive(Debug, Clone)]
struct MemEntry {
    /// Arena-owned value bytes; empty for tombstones.
    value: Bytes,
    /// Sequence of the mutation.
    seq: u64,
    /// Tombstone marker.
    deleted: bool,
}

struct MemtableCore {
    map: BTreeMap<Bytes, MemEntry>,
    state: MemtableState,
    /// Entry overhead plus key/value bytes, maintained on every
    /// insert/replace.
    approximate_bytes: usize,
}

/// Ordered in-memory store of `(key → (value, seq, deleted))`.
pub struct Memtable {
    /// Identifier unique within one tree instance.
    id: u64,

    /// Sequence counter value when this table was created.
    created_seq: u64,

    arena: Arena,
    core: RwLock<MemtableCore>,
}

/// Fixed per-entry accounting overhead.
const ENTRY_OVERHEAD: usize = std::mem::size_of::<MemEntry>() + std::mem::size_of::<Bytes>();

impl Memtable {
    /// Creates an empty active memtable.
    pub fn new(id: u64, created_seq: u64) -> Self {
        Self {
            id,
            created_seq,
            arena: Arena::new(),
            core: RwLock::new(MemtableCore {
                map: BTreeMap::new(),
                state: MemtableState::Active,
                approximate_bytes: 0,
            }),
        }
    }

    /// Identifier of this table.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence counter value at creation time.
    pub fn created_seq(&self) -> u64 {
        self.created_seq
    }

    /// Inserts or replaces a key with a live value.
    pub fn put(&self, key: &[u8], value: &[u8], seq: u64) -> Result<(), MemtableError> {
        self.insert(key, value, seq, false)
    }

    /// Inserts a tombstone for `key`.
    pub fn delete(&self, key: &[u8], seq: u64) -> Result<(), MemtableError> {
        self.insert(key, &[], seq, true)
    }

    fn insert(&self, key: &[u8], value: &[u8], seq: u64, deleted: bool) -> Result<(), MemtableError> {
        if key.is_empty() {
            return Err(MemtableError::EmptyKey);
        }

        // Copy into the arena before taking the lock; a failed
        // allocation would leave the map untouched.
        let key = self.arena.alloc(key);
        let value = if value.is_empty() {
            Bytes::new()
        } else {
            self.arena.alloc(value)
        };

        let mut core = self.core.write();
        if core.state != MemtableState::Active {
            return Err(MemtableError::NotActive(core.state));
        }

        let key_len = key.len();
        let value_len = value.len();
        let entry = MemEntry {
            value,
            seq,
            deleted,
        };
        match core.map.insert(key, entry) {
            // Replacement: key bytes and overhead stay accounted,
            // only the value delta changes.
            Some(old) => {
                core.approximate_bytes -= old.value.len();
                core.approximate_bytes += value_len;
            }
            None => core.approximate_bytes += ENTRY_OVERHEAD + key_len + value_len,
        }
        trace!(seq, deleted, "memtable insert");
        Ok(())
    }

    /// Returns the version stored for `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<Version> {
        let core = self.core.read();
        core.map.get(key).map(|entry| Version {
            value: entry.value.clone(),
            seq: entry.seq,
            deleted: entry.deleted,
        })
    }

    /// Snapshot iterator over the table in key order.
    ///
    /// Compaction passes `include_tombstones = true`; external
    /// consumers usually skip them.
    pub fn iter(&self, include_tombstones: bool) -> impl Iterator<Item = Entry> {
        let core = self.core.read();
        let entries: Vec<Entry> = core
            .map
            .iter()
            .filter(|(_, entry)| include_tombstones || !entry.deleted)
            .map(|(key, entry)| Entry {
                key: key.clone(),
                value: entry.value.clone(),
                seq: entry.seq,
                deleted: entry.deleted,
            })
            .collect();
        entries.into_iter()
    }

    /// Approximate resident size: entry overhead plus key and value
    /// bytes.
    pub fn approximate_bytes(&self) -> usize {
        self.core.read().approximate_bytes
    }

    /// Number of entries (tombstones included).
    pub fn entry_count(&self) -> usize {
        self.core.read().map.len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MemtableState {
        self.core.read().state
    }

    /// One-way transition to [`MemtableState::Frozen`]. Idempotent for
    /// an already-frozen table; never un-freezes.
    pub fn freeze(&self) {
        let mut core = self.core.write();
        if core.state == MemtableState::Active {
            core.state = MemtableState::Frozen;
        }
    }

    /// Marks the table as being flushed by a worker.
    pub fn mark_flushing(&self) {
        let mut core = self.core.write();
        if core.state == MemtableState::Frozen {
            core.state = MemtableState::Flushing;
        }
    }

    /// Marks the table as fully flushed.
    pub fn mark_flushed(&self) {
        self.core.write().state = MemtableState::Flushed;
    }

    /// Arena statistics for `memory_usage` reporting.
    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Restores a key to a previously captured version (or to absence).
    ///
    /// Batch-rollback support: the batch writer captures each key's
    /// prior version (via [`get`](Self::get)) before overwriting it
    /// and unwinds through here when an atomic commit fails. Bypasses
    /// the state check — the batch holds the tree lock exclusively,
    /// so the table cannot freeze mid-rollback.
    pub(crate) fn revert(&self, key: &[u8], prior: Option<Version>) {
        let mut core = self.core.write();
        match prior {
            Some(version) => {
                let value_len = version.value.len();
                let entry = MemEntry {
                    value: version.value,
                    seq: version.seq,
                    deleted: version.deleted,
                };
                match core.map.insert(Bytes::copy_from_slice(key), entry) {
                    Some(old) => {
                        core.approximate_bytes -= old.value.len();
                        core.approximate_bytes += value_len;
                    }
                    None => {
                        core.approximate_bytes += ENTRY_OVERHEAD + key.len() + value_len;
                    }
                }
            }
            None => {
                if let Some(old) = core.map.remove(key) {
                    core.approximate_bytes -= ENTRY_OVERHEAD + key.len() + old.value.len();
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// MemtableManager
// ------------------------------------------------------------------------------------------------

struct ManagerTables {
    active: Arc<Memtable>,
    /// FIFO: front is oldest (next to flush), back is newest.
    immutables: VecDeque<Arc<Memtable>>,
}

/// Owns the active memtable and the bounded queue of frozen
/// immutables.
pub struct MemtableManager {
    memtable_max_size: usize,
    max_immutable_count: usize,
    auto_freeze: AtomicBool,

    tables: Mutex<ManagerTables>,
    /// Signalled when a flush frees an immutable slot.
    slot_freed: Condvar,
    next_id: AtomicU64,
    /// Highest sequence routed through `apply`, used as the creation
    /// sequence of replacement tables (every entry in a frozen table
    /// has a sequence at or below it).
    last_seq: AtomicU64,
}

impl MemtableManager {
    /// Creates a manager with one fresh active memtable.
    pub fn new(memtable_max_size: usize, max_immutable_count: usize, auto_freeze: bool) -> Self {
        Self {
            memtable_max_size,
            max_immutable_count: max_immutable_count.max(1),
            auto_freeze: AtomicBool::new(auto_freeze),
            tables: Mutex::new(ManagerTables {
                active: Arc::new(Memtable::new(0, 0)),
                immutables: VecDeque::new(),
            }),
            slot_freed: Condvar::new(),
            next_id: AtomicU64::new(1),
            last_seq: AtomicU64::new(0),
        }
    }

    /// Applies a put to the active memtable, rotating first if a
    /// concurrent freeze won the race.
    pub fn put(&self, key: &[u8], value: &[u8], seq: u64) -> Result<(), MemtableError> {
        self.apply(key, value, seq, false)
    }

    /// Applies a tombstone to the active memtable.
    pub fn delete(&self, key: &[u8], seq: u64) -> Result<(), MemtableError> {
        self.apply(key, &[], seq, true)
    }

    fn apply(&self, key: &[u8], value: &[u8], seq: u64, deleted: bool) -> Result<(), MemtableError> {
        self.last_seq.fetch_max(seq, Ordering::Relaxed);
        loop {
            let active = self.tables.lock().active.clone();
            let result = if deleted {
                active.delete(key, seq)
            } else {
                active.put(key, value, seq)
            };
            match result {
                Ok(()) => {
                    if self.auto_freeze.load(Ordering::Relaxed)
                        && active.approximate_bytes() >= self.memtable_max_size
                    {
                        self.rotate_if_active(&active);
                    }
                    return Ok(());
                }
                // The table froze between the clone and the write;
                // the next iteration picks up the new active table.
                Err(MemtableError::NotActive(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Searches the active table, then the immutables newest→oldest.
    pub fn get(&self, key: &[u8]) -> Option<Version> {
        let (active, immutables) = {
            let tables = self.tables.lock();
            (
                tables.active.clone(),
                tables.immutables.iter().cloned().collect::<Vec<_>>(),
            )
        };

        if let Some(version) = active.get(key) {
            return Some(version);
        }
        for table in immutables.iter().rev() {
            if let Some(version) = table.get(key) {
                return Some(version);
            }
        }
        None
    }

    /// Freezes and rotates the active memtable, blocking while the
    /// immutable queue is full.
    pub fn rotate(&self) -> Arc<Memtable> {
        let mut tables = self.tables.lock();
        while tables.immutables.len() >= self.max_immutable_count {
            self.slot_freed.wait(&mut tables);
        }

        let frozen = tables.active.clone();
        frozen.freeze();
        tables.immutables.push_back(frozen.clone());

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let created_seq = self.last_seq.load(Ordering::Relaxed);
        tables.active = Arc::new(Memtable::new(id, created_seq));
        debug!(
            frozen_id = frozen.id(),
            new_id = id,
            queued = tables.immutables.len(),
            "memtable rotated"
        );
        frozen
    }

    /// Rotates only if `expected` is still the active table. Used by
    /// the auto-freeze path so two racing writers rotate once.
    fn rotate_if_active(&self, expected: &Arc<Memtable>) {
        let mut tables = self.tables.lock();
        if !Arc::ptr_eq(&tables.active, expected) {
            return;
        }
        while tables.immutables.len() >= self.max_immutable_count {
            self.slot_freed.wait(&mut tables);
            if !Arc::ptr_eq(&tables.active, expected) {
                return;
            }
        }
        let frozen = tables.active.clone();
        frozen.freeze();
        tables.immutables.push_back(frozen.clone());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let created_seq = self.last_seq.load(Ordering::Relaxed);
        tables.active = Arc::new(Memtable::new(id, created_seq));
        debug!(
            frozen_id = frozen.id(),
            queued = tables.immutables.len(),
            "memtable auto-rotated"
        );
    }

    /// The oldest immutable, if any — the next table to flush.
    pub fn oldest_immutable(&self) -> Option<Arc<Memtable>> {
        self.tables.lock().immutables.front().cloned()
    }

    /// All queued immutables, oldest first.
    pub fn immutables(&self) -> Vec<Arc<Memtable>> {
        self.tables.lock().immutables.iter().cloned().collect()
    }

    /// Removes a specific immutable by identity.
    ///
    /// Returns `false` when the table was already removed by another
    /// worker — the operation is idempotent.
    pub fn remove_immutable(&self, table: &Arc<Memtable>) -> bool {
        let removed = {
            let mut tables = self.tables.lock();
            let before = tables.immutables.len();
            tables.immutables.retain(|t| !Arc::ptr_eq(t, table));
            tables.immutables.len() < before
        };
        if removed {
            self.slot_freed.notify_all();
        }
        removed
    }

    /// Current active table.
    pub fn active(&self) -> Arc<Memtable> {
        self.tables.lock().active.clone()
    }

    /// Records a sequence applied outside [`put`]/[`delete`] (the
    /// batch writer applies straight to the active table).
    pub fn note_seq(&self, seq: u64) {
        self.last_seq.fetch_max(seq, Ordering::Relaxed);
    }

    /// Toggles automatic rotation. WAL replay disables it: nothing
    /// drains the immutable queue before the scheduler starts, so a
    /// rotation there could block recovery on a full queue.
    pub fn set_auto_freeze(&self, enabled: bool) {
        self.auto_freeze.store(enabled, Ordering::Relaxed);
    }

    /// Number of queued immutables.
    pub fn immutable_count(&self) -> usize {
        self.tables.lock().immutables.len()
    }

    /// True when at least one immutable awaits flushing.
    pub fn should_flush(&self) -> bool {
        self.immutable_count() > 0
    }

    /// Total approximate bytes across the active table and the queue.
    pub fn approximate_bytes(&self) -> usize {
        let tables = self.tables.lock();
        tables.active.approximate_bytes()
            + tables
                .immutables
                .iter()
                .map(|t| t.approximate_bytes())
                .sum::<usize>()
    }

    /// Total entry count across the active table and the queue.
    pub fn entry_count(&self) -> usize {
        let tables = self.tables.lock();
        tables.active.entry_count()
            + tables
                .immutables
                .iter()
                .map(|t| t.entry_count())
                .sum::<usize>()
    }
}
