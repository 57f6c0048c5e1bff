//! # Engine Abstraction Layer
//!
//! Every backend — unordered array, ordered map, chained hash table,
//! B+Tree, LSM tree — exposes the same [`StorageEngine`] contract.
//! Dispatch is a sum type ([`AnyEngine`]) with one `match` per
//! operation: no function-pointer tables, no trait objects on the hot
//! path.
//!
//! Required operations: `put`, `get`, `delete`, `update`, `count`,
//! `memory_usage`. Optional operations default to
//! [`crate::error::ErrorKind::NotSupported`]; callers feature-detect with
//! [`StorageEngine::supports`] instead of probing for errors.
//!
//! [`EngineManager`] owns one instance per engine kind in a fixed
//! slot array. Switching the active engine is a single write under a
//! rw-lock; operations route to the active engine without copying
//! data. Every routed operation is timed and counted into the
//! [`MetricsRegistry`](crate::metrics::MetricsRegistry). Each engine
//! owns its own sequence space — switching engines never rebases or
//! merges orderings.

#[cfg(test)]
mod tests;

pub mod array;
pub mod bptree;
pub mod hash;
pub mod lsm;
pub mod ordered;

pub use array::ArrayEngine;
pub use bptree::BPlusTreeEngine;
pub use hash::HashEngine;
pub use lsm::LsmEngine;
pub use ordered::OrderedEngine;

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::cache::Cache;
use crate::config::DbConfig;
use crate::error::{Error, KindError, Result};
use crate::metrics::{EngineExtras, MetricsRegistry};

// ------------------------------------------------------------------------------------------------
// Engine kinds
// ------------------------------------------------------------------------------------------------

/// The selectable storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Unordered vector of pairs; linear scans.
    Array,
    /// Ordered in-memory map.
    Ordered,
    /// Chained hash table with explicit buckets.
    Hash,
    /// Order-bounded B+Tree with linked leaves.
    BPlusTree,
    /// Log-structured merge tree (durable).
    Lsm,
}

impl EngineKind {
    /// Every kind, in slot order.
    pub const ALL: [EngineKind; 5] = [
        Self::Array,
        Self::Ordered,
        Self::Hash,
        Self::BPlusTree,
        Self::Lsm,
    ];

    /// Slot index in the manager's engine array.
    pub fn slot(self) -> usize {
        match self {
            Self::Array => 0,
            Self::Ordered => 1,
            Self::Hash => 2,
            Self::BPlusTree => 3,
            Self::Lsm => 4,
        }
    }

    /// Stable lowercase name (also the data sub-directory name).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Ordered => "ordered",
            Self::Hash => "hash",
            Self::BPlusTree => "bptree",
            Self::Lsm => "lsm",
        }
    }

    /// Parses a kind from a user-facing name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "array" => Some(Self::Array),
            "ordered" | "rbtree" | "tree" => Some(Self::Ordered),
            "hash" => Some(Self::Hash),
            "bptree" | "btree" | "b+tree" => Some(Self::BPlusTree),
            "lsm" => Some(Self::Lsm),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional capabilities, for feature detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOp {
    /// `batch_set`
    BatchSet,
    /// `range_scan`
    RangeScan,
    /// `iter`
    Iterate,
    /// `begin/commit/rollback_transaction`
    Transactions,
    /// `snapshot`
    Snapshot,
    /// `flush`
    Flush,
    /// `compact`
    Compact,
    /// `sync`
    Sync,
}

// ------------------------------------------------------------------------------------------------
// The contract
// ------------------------------------------------------------------------------------------------

/// The uniform storage contract every backend satisfies.
///
/// Implementations are internally synchronized: all methods take
/// `&self` and are safe to call from any thread.
pub trait StorageEngine: Send + Sync {
    /// Inserts or overwrites a key.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Returns the value, or `None` when absent or deleted.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Removes a key. Engines that can cheaply detect absence return
    /// [`crate::error::ErrorKind::NotFound`]; the LSM blind-deletes.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Overwrites an existing key;
    /// [`crate::error::ErrorKind::NotFound`] when it does not exist.
    fn update(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Number of stored entries (the LSM reports an upper bound, see
    /// its adapter).
    fn count(&self) -> Result<u64>;

    /// Approximate resident bytes.
    fn memory_usage(&self) -> Result<u64>;

    /// True when the optional `op` is implemented.
    fn supports(&self, _op: EngineOp) -> bool {
        false
    }

    /// Inserts many pairs; atomicity is engine-specific.
    fn batch_set(&self, _pairs: &[(&[u8], &[u8])]) -> Result<()> {
        Err(Error::not_supported("batch_set"))
    }

    /// Returns pairs with `start <= key < end`, key-ordered.
    fn range_scan(&self, _start: &[u8], _end: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        Err(Error::not_supported("range_scan"))
    }

    /// Iterator over the full entry set (ordering is engine-specific).
    fn iter(&self) -> Result<Box<dyn Iterator<Item = (Bytes, Bytes)> + Send>> {
        Err(Error::not_supported("iter"))
    }

    /// Begins a local transaction (reserved for the distributed
    /// coordinator hook).
    fn begin_transaction(&self) -> Result<u64> {
        Err(Error::not_supported("begin_transaction"))
    }

    /// Commits a local transaction.
    fn commit_transaction(&self, _txn: u64) -> Result<()> {
        Err(Error::not_supported("commit_transaction"))
    }

    /// Rolls back a local transaction.
    fn rollback_transaction(&self, _txn: u64) -> Result<()> {
        Err(Error::not_supported("rollback_transaction"))
    }

    /// Copies out the full entry set.
    fn snapshot(&self) -> Result<Vec<(Bytes, Bytes)>> {
        Err(Error::not_supported("snapshot"))
    }

    /// Forces buffered state to durable storage.
    fn flush(&self) -> Result<()> {
        Err(Error::not_supported("flush"))
    }

    /// Triggers storage reorganization.
    fn compact(&self) -> Result<()> {
        Err(Error::not_supported("compact"))
    }

    /// Fsyncs durable state.
    fn sync(&self) -> Result<()> {
        Err(Error::not_supported("sync"))
    }

    /// Engine-specific metric extras.
    fn extras(&self) -> EngineExtras;
}

// ------------------------------------------------------------------------------------------------
// AnyEngine — sum type dispatch
// ------------------------------------------------------------------------------------------------

/// Concrete engine variants behind one type.
pub enum AnyEngine {
    /// Unordered array backend.
    Array(ArrayEngine),
    /// Ordered-map backend.
    Ordered(OrderedEngine),
    /// Chained-hash backend.
    Hash(HashEngine),
    /// B+Tree backend.
    BPlusTree(BPlusTreeEngine),
    /// LSM backend.
    Lsm(LsmEngine),
}

impl AnyEngine {
    /// The kind of this variant.
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Array(_) => EngineKind::Array,
            Self::Ordered(_) => EngineKind::Ordered,
            Self::Hash(_) => EngineKind::Hash,
            Self::BPlusTree(_) => EngineKind::BPlusTree,
            Self::Lsm(_) => EngineKind::Lsm,
        }
    }

    fn as_engine(&self) -> &dyn StorageEngine {
        match self {
            Self::Array(e) => e,
            Self::Ordered(e) => e,
            Self::Hash(e) => e,
            Self::BPlusTree(e) => e,
            Self::Lsm(e) => e,
        }
    }
}

impl StorageEngine for AnyEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.as_engine().put(key, value)
    }
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.as_engine().get(key)
    }
    fn delete(&self, key: &[u8]) -> Result<()> {
        self.as_engine().delete(key)
    }
    fn update(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.as_engine().update(key, value)
    }
    fn count(&self) -> Result<u64> {
        self.as_engine().count()
    }
    fn memory_usage(&self) -> Result<u64> {
        self.as_engine().memory_usage()
    }
    fn supports(&self, op: EngineOp) -> bool {
        self.as_engine().supports(op)
    }
    fn batch_set(&self, pairs: &[(&[u8], &[u8])]) -> Result<()> {
        self.as_engine().batch_set(pairs)
    }
    fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        self.as_engine().range_scan(start, end)
    }
    fn iter(&self) -> Result<Box<dyn Iterator<Item = (Bytes, Bytes)> + Send>> {
        self.as_engine().iter()
    }
    fn begin_transaction(&self) -> Result<u64> {
        self.as_engine().begin_transaction()
    }
    fn commit_transaction(&self, txn: u64) -> Result<()> {
        self.as_engine().commit_transaction(txn)
    }
    fn rollback_transaction(&self, txn: u64) -> Result<()> {
        self.as_engine().rollback_transaction(txn)
    }
    fn snapshot(&self) -> Result<Vec<(Bytes, Bytes)>> {
        self.as_engine().snapshot()
    }
    fn flush(&self) -> Result<()> {
        self.as_engine().flush()
    }
    fn compact(&self) -> Result<()> {
        self.as_engine().compact()
    }
    fn sync(&self) -> Result<()> {
        self.as_engine().sync()
    }
    fn extras(&self) -> EngineExtras {
        self.as_engine().extras()
    }
}

// ------------------------------------------------------------------------------------------------
// EngineManager
// ------------------------------------------------------------------------------------------------

/// Owns one engine per kind and routes operations to the active one,
/// recording per-engine metrics along the way.
pub struct EngineManager {
    /// Fixed slots indexed by [`EngineKind::slot`].
    engines: [Arc<AnyEngine>; 5],
    active: RwLock<EngineKind>,
    metrics: Arc<MetricsRegistry>,
    /// Optional read cache whose hit rate feeds the active engine's
    /// gauge.
    cache: Mutex<Option<Arc<Cache>>>,
}

impl EngineManager {
    /// Builds every backend. The LSM persists under
    /// `<data_dir>/lsm`-style sub-paths; the in-memory backends start
    /// empty.
    pub fn open(config: &DbConfig) -> Result<Self> {
        let metrics = Arc::new(MetricsRegistry::new());
        let lsm = LsmEngine::open(&config.data_dir, config.lsm.clone())
            .map_err(|e| Error::op(e.kind(), e.to_string()))?;

        let engines = [
            Arc::new(AnyEngine::Array(ArrayEngine::new())),
            Arc::new(AnyEngine::Ordered(OrderedEngine::new())),
            Arc::new(AnyEngine::Hash(HashEngine::new())),
            Arc::new(AnyEngine::BPlusTree(BPlusTreeEngine::new())),
            Arc::new(AnyEngine::Lsm(lsm)),
        ];
        for kind in EngineKind::ALL {
            metrics.register(kind);
        }

        info!(active = %config.default_engine, "engine manager opened");
        Ok(Self {
            engines,
            active: RwLock::new(config.default_engine),
            metrics,
            cache: Mutex::new(None),
        })
    }

    /// Attaches a cache whose hit rate is exported with the active
    /// engine's gauges.
    pub fn attach_cache(&self, cache: Arc<Cache>) {
        *self.cache.lock() = Some(cache);
    }

    /// The currently active engine kind.
    pub fn active_kind(&self) -> EngineKind {
        *self.active.read()
    }

    /// Switches the active engine: one write under the rw-lock, no
    /// data movement. Sequence spaces stay per-engine.
    pub fn switch_engine(&self, kind: EngineKind) {
        let mut active = self.active.write();
        if *active != kind {
            info!(from = %*active, to = %kind, "switching active engine");
            *active = kind;
        }
    }

    /// The active engine instance.
    pub fn active_engine(&self) -> Arc<AnyEngine> {
        let kind = *self.active.read();
        Arc::clone(&self.engines[kind.slot()])
    }

    /// A specific engine instance.
    pub fn engine(&self, kind: EngineKind) -> Arc<AnyEngine> {
        Arc::clone(&self.engines[kind.slot()])
    }

    /// The metrics registry feeding the exporter.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    // --------------------------------------------------------------------------------------------
    // Routed operations (counted + timed)
    // --------------------------------------------------------------------------------------------

    /// `put` on the active engine.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let (kind, engine) = self.route();
        let started = Instant::now();
        let result = engine.put(key, value);
        self.metrics.record_write(kind, started.elapsed(), &result);
        result
    }

    /// `get` on the active engine.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let (kind, engine) = self.route();
        let started = Instant::now();
        let result = engine.get(key);
        self.metrics.record_read(kind, started.elapsed(), &result);
        result
    }

    /// `delete` on the active engine.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let (kind, engine) = self.route();
        let started = Instant::now();
        let result = engine.delete(key);
        self.metrics.record_delete(kind, started.elapsed(), &result);
        result
    }

    /// `update` on the active engine.
    pub fn update(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let (kind, engine) = self.route();
        let started = Instant::now();
        let result = engine.update(key, value);
        self.metrics.record_update(kind, started.elapsed(), &result);
        result
    }

    /// `count` on the active engine.
    pub fn count(&self) -> Result<u64> {
        self.active_engine().count()
    }

    /// `memory_usage` on the active engine.
    pub fn memory_usage(&self) -> Result<u64> {
        self.active_engine().memory_usage()
    }

    /// Refreshes gauges and extras for every engine and returns the
    /// registry's text snapshot.
    pub fn stats_report(&self) -> String {
        for kind in EngineKind::ALL {
            let engine = self.engine(kind);
            if let Ok(bytes) = engine.memory_usage() {
                self.metrics.set_memory_bytes(kind, bytes);
            }
            self.metrics.set_extras(kind, engine.extras());
        }
        if let Some(cache) = self.cache.lock().clone() {
            self.metrics
                .set_cache_hit_rate(self.active_kind(), cache.stats().hit_rate());
        }
        self.metrics.render_text()
    }

    fn route(&self) -> (EngineKind, Arc<AnyEngine>) {
        let kind = *self.active.read();
        (kind, Arc::clone(&self.engines[kind.slot()]))
    }
}

/// Closes engines that hold durable state.
impl EngineManager {
    /// Flushes and closes the LSM engine; in-memory engines have
    /// nothing durable.
    pub fn close(&self) -> Result<()> {
        if let AnyEngine::Lsm(lsm) = &*self.engines[EngineKind::Lsm.slot()] {
            lsm.close().map_err(|e| Error::op(e.kind(), e.to_string()))?;
        }
        Ok(())
    }
}
