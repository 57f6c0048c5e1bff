//! LSM backend adapter: bridges [`LsmTree`] onto the engine contract.

use std::path::Path;

use bytes::Bytes;

use crate::config::LsmConfig;
use crate::error::{Error, ErrorKind, KindError, Result};
use crate::lsm::{BatchOptions, LsmError, LsmTree};
use crate::metrics::EngineExtras;

use super::{EngineOp, StorageEngine};

/// The durable engine: an [`LsmTree`] rooted at the data directory.
pub struct LsmEngine {
    tree: LsmTree,
}

impl LsmEngine {
    /// Opens the tree under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>, config: LsmConfig) -> std::result::Result<Self, LsmError> {
        Ok(Self {
            tree: LsmTree::open(data_dir, config)?,
        })
    }

    /// The underlying tree, for callers needing LSM-specific surface
    /// (batches, stats, manual level compaction).
    pub fn tree(&self) -> &LsmTree {
        &self.tree
    }

    /// Flushes and shuts the tree down.
    pub fn close(&self) -> std::result::Result<(), LsmError> {
        self.tree.close()
    }
}

fn adapt(e: LsmError) -> Error {
    Error::op(e.kind(), e.to_string())
}

impl StorageEngine for LsmEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.put(key, value).map_err(adapt)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.tree.get(key).map_err(adapt)
    }

    /// Blind delete: a tombstone is written whether or not the key
    /// exists (checking first would cost a full read path walk).
    fn delete(&self, key: &[u8]) -> Result<()> {
        self.tree.delete(key).map_err(adapt)
    }

    fn update(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.tree.get(key).map_err(adapt)?.is_none() {
            return Err(Error::op(ErrorKind::NotFound, "key not found"));
        }
        self.tree.put(key, value).map_err(adapt)
    }

    /// Upper bound: resident versions across all layers, duplicates
    /// and tombstones not collapsed.
    fn count(&self) -> Result<u64> {
        Ok(self.tree.approximate_count())
    }

    fn memory_usage(&self) -> Result<u64> {
        Ok(self.tree.memory_usage() as u64)
    }

    fn supports(&self, op: EngineOp) -> bool {
        matches!(
            op,
            EngineOp::BatchSet | EngineOp::Flush | EngineOp::Compact | EngineOp::Sync
        )
    }

    fn batch_set(&self, pairs: &[(&[u8], &[u8])]) -> Result<()> {
        let mut batch = self.tree.batch_with(BatchOptions::default());
        for (key, value) in pairs {
            batch.put(key, value);
        }
        let report = batch.commit().map_err(adapt)?;
        match report.first_error {
            None => Ok(()),
            Some(kind) => Err(Error::op(kind, "batch commit failed and rolled back")),
        }
    }

    fn flush(&self) -> Result<()> {
        self.tree.flush().map_err(adapt)
    }

    fn compact(&self) -> Result<()> {
        self.tree.compact();
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.tree.sync().map_err(adapt)
    }

    fn extras(&self) -> EngineExtras {
        let stats = self.tree.stats();
        EngineExtras::Lsm {
            compactions: stats
                .compaction
                .completed
                .saturating_sub(stats.compaction.flushes),
            flushes: stats.compaction.flushes,
            levels: stats
                .level_file_counts
                .iter()
                .filter(|&&c| c > 0)
                .count() as u64,
            memtable_bytes: stats.memtable_bytes as u64,
            sstable_count: stats.sstable_count as u64,
        }
    }
}
