//! Configuration for the LSM tree, the cache layer, and the database
//! wrapper.
//!
//! All options are plain struct fields with documented defaults; a
//! [`DbConfig`] can additionally be seeded from the `CONCORD_*`
//! environment variables that the surrounding tooling exports.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineKind;

/// Number of levels in the SSTable hierarchy, including level 0.
pub const MAX_LEVELS: usize = 7;

/// Configuration for one LSM tree instance.
#[derive(Debug, Clone)]
pub struct LsmConfig {
    /// Max active-memtable size (bytes) before it is frozen.
    pub memtable_max_size: usize,

    /// Max number of frozen memtables awaiting flush. Writers block
    /// when the queue is full (backpressure, never a drop).
    pub max_immutable_count: usize,

    /// Freeze the active memtable automatically when it crosses
    /// `memtable_max_size`. Disabled only by tests that drive
    /// rotation by hand.
    pub auto_freeze: bool,

    /// Target uncompressed size of one SSTable data block.
    pub block_size: usize,

    /// Bloom filter false-positive rate for newly written SSTables.
    pub bloom_fp_rate: f64,

    /// Level-0 file count that triggers a Level-N compaction.
    pub level0_file_limit: usize,

    /// Byte budget of level 1; level n holds
    /// `max_level_base_bytes * level_size_multiplier^(n-1)`.
    pub max_level_base_bytes: u64,

    /// Growth factor between consecutive levels.
    pub level_size_multiplier: u64,

    /// Upper bound on files tracked per level.
    pub max_files_per_level: usize,

    /// Number of data blocks per Level-N compaction output table.
    pub blocks_per_output: usize,

    /// WAL segment size that triggers rotation.
    pub wal_size_limit: u64,

    /// Fsync every WAL append before acknowledging the write.
    pub sync_writes: bool,

    /// Compaction worker threads.
    pub worker_count: usize,

    /// Largest accepted key, in bytes.
    pub max_key_len: usize,

    /// Largest accepted value, in bytes.
    pub max_value_len: usize,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            memtable_max_size: 4 * 1024 * 1024,
            max_immutable_count: 4,
            auto_freeze: true,
            block_size: 4096,
            bloom_fp_rate: 0.01,
            level0_file_limit: 4,
            max_level_base_bytes: 10 * 1024 * 1024,
            level_size_multiplier: 10,
            max_files_per_level: 256,
            blocks_per_output: 512,
            wal_size_limit: 16 * 1024 * 1024,
            sync_writes: false,
            worker_count: 2,
            max_key_len: 64 * 1024,
            max_value_len: 16 * 1024 * 1024,
        }
    }
}

impl LsmConfig {
    /// Byte budget for `level` (level ≥ 1). Level 0 is bounded by file
    /// count, not bytes.
    pub fn max_level_bytes(&self, level: usize) -> u64 {
        debug_assert!(level >= 1);
        let exp = (level as u32).saturating_sub(1);
        self.max_level_base_bytes
            .saturating_mul(self.level_size_multiplier.saturating_pow(exp))
    }
}

/// Eviction policy for the cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Least-recently-used; access moves to head, evict from tail.
    Lru,
    /// Least-frequently-used with idle-hour frequency decay.
    Lfu,
    /// Insertion order; access does not reorder.
    Fifo,
    /// Uniformly random victim.
    Random,
    /// Second-chance clock over a fixed slot array.
    Clock,
    /// Adaptive replacement (T1/T2 resident, B1/B2 ghosts, target p).
    Arc,
}

/// Configuration for one cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Eviction policy.
    pub policy: EvictionPolicy,

    /// Hard bound on resident entries.
    pub max_entries: usize,

    /// Hard bound on resident key+value bytes.
    pub max_bytes: usize,

    /// Fraction of `max_entries` evicted per full-cache `set`.
    pub eviction_factor: f64,

    /// Lower clamp for one eviction batch.
    pub min_eviction_count: usize,

    /// Upper clamp for one eviction batch.
    pub max_eviction_count: usize,

    /// Default TTL applied when `set` passes none. `None` = no expiry.
    pub default_ttl: Option<Duration>,

    /// Interval between background TTL sweeps. `None` disables the
    /// sweeper thread.
    pub sweep_interval: Option<Duration>,

    /// Number of hash-index stripes. Rounded up to a power of two.
    pub stripe_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: EvictionPolicy::Lru,
            max_entries: 1024,
            max_bytes: 64 * 1024 * 1024,
            eviction_factor: 0.1,
            min_eviction_count: 1,
            max_eviction_count: 64,
            default_ttl: None,
            sweep_interval: Some(Duration::from_secs(1)),
            stripe_count: 16,
        }
    }
}

/// Top-level configuration for a ConcordKV database instance.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Root data directory; each engine persists under
    /// `<data_dir>/<engine_name>/`.
    pub data_dir: PathBuf,

    /// Engine activated at startup.
    pub default_engine: EngineKind,

    /// Port for the metrics exporter, when one is started.
    pub listen_port: u16,

    /// LSM tree options.
    pub lsm: LsmConfig,

    /// Cache options.
    pub cache: CacheConfig,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./concord-data"),
            default_engine: EngineKind::Lsm,
            listen_port: 7460,
            lsm: LsmConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl DbConfig {
    /// Builds a config from defaults overridden by the `CONCORD_*`
    /// environment variables.
    ///
    /// Unknown engine names and unparsable ports fall back to the
    /// defaults with a warning rather than failing startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CONCORD_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(name) = std::env::var("CONCORD_DEFAULT_ENGINE") {
            match EngineKind::parse(&name) {
                Some(kind) => config.default_engine = kind,
                None => {
                    tracing::warn!(engine = %name, "unknown CONCORD_DEFAULT_ENGINE, keeping default")
                }
            }
        }

        if let Ok(port) = std::env::var("CONCORD_LISTEN_PORT") {
            match port.parse::<u16>() {
                Ok(p) => config.listen_port = p,
                Err(_) => {
                    tracing::warn!(port = %port, "unparsable CONCORD_LISTEN_PORT, keeping default")
                }
            }
        }

        config
    }
}
