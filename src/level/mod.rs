//! Level manager — the on-disk shape of the tree.
//!
//! Tables are tracked per level. Level 0 holds freshly flushed tables
//! whose key ranges may overlap; lookups there go newest-first by
//! file id. Every level ≥ 1 keeps its tables ordered by `min_key`
//! with pairwise-disjoint key ranges, so a lookup needs at most one
//! table.
//!
//! Readers are opened lazily and cached on the [`TableMeta`]; the
//! bloom filter is consulted (inside [`TableReader::get`]) before any
//! data block is touched.
//!
//! Compaction predicates:
//! - level 0 compacts when its file count reaches the configured
//!   limit,
//! - level n ≥ 1 compacts when its byte size exceeds
//!   `base × multiplier^(n−1)`.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::{LsmConfig, MAX_LEVELS};
use crate::error::{ErrorKind, KindError};
use crate::sstable::{SstableError, TableReader};
use crate::types::Version;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by level-manager operations.
#[derive(Debug, Error)]
pub enum LevelError {
    /// Underlying table failure.
    #[error("table error: {0}")]
    Sstable(#[from] SstableError),

    /// The target level already holds the maximum number of files.
    #[error("level {0} is full")]
    LevelFull(usize),

    /// A level index outside `0..MAX_LEVELS`.
    #[error("invalid level {0}")]
    InvalidLevel(usize),
}

impl KindError for LevelError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Sstable(e) => e.kind(),
            Self::LevelFull(_) => ErrorKind::Busy,
            Self::InvalidLevel(_) => ErrorKind::InvalidParam,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Table file naming
// ------------------------------------------------------------------------------------------------

/// Builds the on-disk file name for a table:
/// `level_<n>_<id>_<threadhash>_<timestamp>.sst`.
pub fn table_file_name(level: usize, file_id: u64) -> String {
    let thread_hash = {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish() & 0xFFFF
    };
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    format!("level_{level}_{file_id}_{thread_hash:04x}_{timestamp}.sst")
}

/// Parses `(level, file_id)` back out of a table file name. Returns
/// `None` for anything that is not a ConcordKV table name.
pub fn parse_table_file_name(name: &str) -> Option<(usize, u64)> {
    let stem = name.strip_suffix(".sst")?;
    let mut parts = stem.split('_');
    if parts.next()? != "level" {
        return None;
    }
    let level = parts.next()?.parse::<usize>().ok()?;
    let file_id = parts.next()?.parse::<u64>().ok()?;
    Some((level, file_id))
}

// ------------------------------------------------------------------------------------------------
// TableMeta
// ------------------------------------------------------------------------------------------------

/// Metadata for one on-disk table, with a lazily opened cached reader.
pub struct TableMeta {
    /// File name within the engine data directory.
    pub file_name: String,
    /// Unique file id (allocation order — higher means newer).
    pub file_id: u64,
    /// Level the table currently belongs to.
    pub level: usize,
    /// On-disk size in bytes.
    pub file_size: u64,
    /// Total entries, tombstones included.
    pub entry_count: u64,
    /// Smallest key.
    pub min_key: Bytes,
    /// Largest key.
    pub max_key: Bytes,
    /// Creation time, nanoseconds since the UNIX epoch.
    pub created_at: u64,

    path: PathBuf,
    reader: Mutex<Option<Arc<TableReader>>>,
}

impl TableMeta {
    /// Opens the table at `path` and builds its metadata, keeping the
    /// reader cached.
    pub fn load(path: impl AsRef<Path>, level: usize, file_id: u64) -> Result<Arc<Self>, LevelError> {
        let path = path.as_ref().to_path_buf();
        let reader = Arc::new(TableReader::open(&path)?);
        Ok(Arc::new(Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_id,
            level,
            file_size: reader.file_size(),
            entry_count: reader.entry_count(),
            min_key: reader.first_key().clone(),
            max_key: reader.last_key().clone(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
            path,
            reader: Mutex::new(Some(reader)),
        }))
    }

    /// The cached reader, opening it on first use.
    pub fn reader(&self) -> Result<Arc<TableReader>, LevelError> {
        let mut slot = self.reader.lock();
        if let Some(reader) = slot.as_ref() {
            return Ok(Arc::clone(reader));
        }
        let reader = Arc::new(TableReader::open(&self.path)?);
        *slot = Some(Arc::clone(&reader));
        Ok(reader)
    }

    /// Drops the cached reader (it reopens lazily on next use).
    pub fn evict_reader(&self) {
        self.reader.lock().take();
    }

    /// Path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when `key` falls inside this table's key range.
    pub fn covers(&self, key: &[u8]) -> bool {
        self.min_key.as_ref() <= key && key <= self.max_key.as_ref()
    }

    /// True when this table's range intersects `[min, max]`.
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        !(self.max_key.as_ref() < min || self.min_key.as_ref() > max)
    }
}

// ------------------------------------------------------------------------------------------------
// LevelManager
// ------------------------------------------------------------------------------------------------

/// Per-level table registry and lookup router.
pub struct LevelManager {
    config: LsmConfig,
    levels: RwLock<Vec<Vec<Arc<TableMeta>>>>,
}

impl LevelManager {
    /// Creates an empty hierarchy.
    pub fn new(config: LsmConfig) -> Self {
        Self {
            config,
            levels: RwLock::new(vec![Vec::new(); MAX_LEVELS]),
        }
    }

    /// Registers a table at its level.
    ///
    /// Level 0 keeps newest-first order (file id descending); higher
    /// levels keep `min_key` order.
    pub fn add_table(&self, meta: Arc<TableMeta>) -> Result<(), LevelError> {
        let level = meta.level;
        if level >= MAX_LEVELS {
            return Err(LevelError::InvalidLevel(level));
        }
        let mut levels = self.levels.write();
        let tables = &mut levels[level];
        if tables.len() >= self.config.max_files_per_level {
            return Err(LevelError::LevelFull(level));
        }
        if level == 0 {
            let at = tables.partition_point(|t| t.file_id > meta.file_id);
            tables.insert(at, meta);
        } else {
            let at = tables.partition_point(|t| t.min_key < meta.min_key);
            tables.insert(at, meta);
        }
        trace!(level, count = tables.len(), "table added");
        Ok(())
    }

    /// Removes a specific table by identity. Returns `false` when the
    /// table is no longer present (already removed).
    pub fn remove_table(&self, meta: &Arc<TableMeta>) -> bool {
        let mut levels = self.levels.write();
        let tables = &mut levels[meta.level];
        let before = tables.len();
        tables.retain(|t| !Arc::ptr_eq(t, meta));
        tables.len() < before
    }

    /// Atomically replaces compaction inputs with outputs.
    ///
    /// Outputs are installed before inputs are removed, under one
    /// write lock, so a reader never observes a state with both
    /// absent.
    pub fn install_compaction(
        &self,
        inputs: &[Arc<TableMeta>],
        outputs: &[Arc<TableMeta>],
    ) -> Result<(), LevelError> {
        let mut levels = self.levels.write();
        for meta in outputs {
            if meta.level >= MAX_LEVELS {
                return Err(LevelError::InvalidLevel(meta.level));
            }
            let tables = &mut levels[meta.level];
            let at = tables.partition_point(|t| t.min_key < meta.min_key);
            tables.insert(at, Arc::clone(meta));
        }
        for meta in inputs {
            levels[meta.level].retain(|t| !Arc::ptr_eq(t, meta));
        }
        debug!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            "compaction installed"
        );
        Ok(())
    }

    /// Point lookup across the hierarchy, walking levels top-down.
    pub fn get(&self, key: &[u8]) -> Result<Option<Version>, LevelError> {
        let levels: Vec<Vec<Arc<TableMeta>>> = {
            let guard = self.levels.read();
            guard.clone()
        };

        // Level 0: overlapping ranges, newest file first.
        for meta in &levels[0] {
            if !meta.covers(key) {
                continue;
            }
            if let Some(version) = meta.reader()?.get(key)? {
                return Ok(Some(version));
            }
        }

        // Levels >= 1: disjoint ranges, binary search by min_key.
        for tables in levels.iter().skip(1) {
            if tables.is_empty() {
                continue;
            }
            let pp = tables.partition_point(|t| t.min_key.as_ref() <= key);
            if pp == 0 {
                continue;
            }
            let candidate = &tables[pp - 1];
            if !candidate.covers(key) {
                continue;
            }
            if let Some(version) = candidate.reader()?.get(key)? {
                return Ok(Some(version));
            }
        }
        Ok(None)
    }

    /// True when `level` is due for compaction.
    pub fn needs_compaction(&self, level: usize) -> bool {
        if level >= MAX_LEVELS {
            return false;
        }
        let levels = self.levels.read();
        if level == 0 {
            levels[0].len() >= self.config.level0_file_limit
        } else {
            let size: u64 = levels[level].iter().map(|t| t.file_size).sum();
            size > self.config.max_level_bytes(level)
        }
    }

    /// Snapshot of one level's tables (L0 newest-first, otherwise
    /// key-ordered).
    pub fn tables(&self, level: usize) -> Vec<Arc<TableMeta>> {
        self.levels
            .read()
            .get(level)
            .cloned()
            .unwrap_or_default()
    }

    /// Tables at `level` overlapping `[min, max]`.
    pub fn overlapping(&self, level: usize, min: &[u8], max: &[u8]) -> Vec<Arc<TableMeta>> {
        self.tables(level)
            .into_iter()
            .filter(|t| t.overlaps(min, max))
            .collect()
    }

    /// File count of one level.
    pub fn file_count(&self, level: usize) -> usize {
        self.levels.read().get(level).map_or(0, Vec::len)
    }

    /// Byte size of one level.
    pub fn level_size(&self, level: usize) -> u64 {
        self.levels
            .read()
            .get(level)
            .map_or(0, |tables| tables.iter().map(|t| t.file_size).sum())
    }

    /// Total table count across all levels.
    pub fn total_file_count(&self) -> usize {
        self.levels.read().iter().map(Vec::len).sum()
    }

    /// Per-level file counts, for the manifest snapshot.
    pub fn file_counts(&self) -> [u32; MAX_LEVELS] {
        let levels = self.levels.read();
        let mut counts = [0u32; MAX_LEVELS];
        for (level, tables) in levels.iter().enumerate() {
            counts[level] = tables.len() as u32;
        }
        counts
    }

    /// Deepest level currently holding at least one table.
    pub fn deepest_populated_level(&self) -> usize {
        let levels = self.levels.read();
        levels
            .iter()
            .enumerate()
            .rev()
            .find(|(_, tables)| !tables.is_empty())
            .map_or(0, |(level, _)| level)
    }

    /// Highest file id currently registered (0 when empty).
    pub fn max_file_id(&self) -> u64 {
        self.levels
            .read()
            .iter()
            .flatten()
            .map(|t| t.file_id)
            .max()
            .unwrap_or(0)
    }
}
