//! # ConcordKV
//!
//! A pluggable key-value storage engine: one abstract contract over
//! five interchangeable backends — unordered array, ordered map,
//! chained hash table, B+Tree, and a **log-structured merge tree**
//! with levelled compaction — wrapped by a policy-pluggable cache
//! layer and a per-engine metrics registry.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EngineManager                          │
//! │   array │ ordered │ hash │ b+tree │ lsm   (active slot)     │
//! └───────────────────────────────┬─────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────▼─────────────────────────────┐
//! │                         LsmTree                             │
//! │  ┌──────────┐  ┌───────────────┐  ┌──────────────────────┐  │
//! │  │  Active  │  │   Immutable   │  │  Levelled SSTables   │  │
//! │  │ Memtable │→ │     queue     │→ │  L0 → L1 → … → L6    │  │
//! │  └────┬─────┘  └───────┬───────┘  └──────────┬───────────┘  │
//! │       │ WAL-first      │ flush workers       │ level merges │
//! │  ┌────▼────────────────▼──────────────────────▼──────────┐  │
//! │  │   WAL segments · Manifest · Compaction scheduler      │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Engine contract, the five backends, and the routing manager |
//! | [`lsm`] | The LSM tree top: write/read paths, recovery, batch writer |
//! | [`memtable`] | Arena-backed ordered write buffer + immutable queue manager |
//! | [`wal`] | Segmented, CRC-protected write-ahead log |
//! | [`sstable`] | Immutable block-structured tables: writer, reader, bloom, iterator |
//! | [`level`] | Per-level table registry and lookup routing |
//! | [`compaction`] | Priority task queue, worker pool, flush and merge executors |
//! | [`manifest`] | Atomic snapshot of the tree's structural state |
//! | [`cache`] | Bounded cache with LRU/LFU/FIFO/Random/CLOCK/ARC eviction |
//! | [`metrics`] | Per-engine counters, histograms, text + HTTP export |
//! | [`sync`] | Timed rw-lock, spinlock, striped segment lock, deadlock detector |
//! | [`arena`] | Block arena with per-size-class statistics |
//! | [`encoding`] | Crate-owned little-endian wire primitives |
//! | [`config`] | Tree, cache, and database configuration |
//! | [`error`] | Closed error-kind set shared across the public surface |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use concordkv::config::DbConfig;
//! use concordkv::engine::{EngineKind, EngineManager};
//!
//! let config = DbConfig {
//!     data_dir: "/tmp/concord".into(),
//!     default_engine: EngineKind::Lsm,
//!     ..DbConfig::default()
//! };
//! let db = EngineManager::open(&config).unwrap();
//!
//! db.put(b"hello", b"world").unwrap();
//! assert_eq!(&db.get(b"hello").unwrap().unwrap()[..], b"world");
//! db.delete(b"hello").unwrap();
//!
//! db.close().unwrap();
//! ```
//!
//! ## Guarantees
//!
//! - **Write-ahead durability** — every LSM mutation hits the WAL
//!   before the memtable; replay reconstructs unflushed state.
//! - **Total write order** — a per-tree sequence number orders every
//!   mutation; the highest sequence wins on reads and merges.
//! - **Checksummed storage** — every SSTable block, WAL record, and
//!   manifest snapshot carries a CRC32; corruption is detected, never
//!   silently served.
//! - **Backpressure, not loss** — a full immutable queue blocks
//!   writers until a flush frees a slot.
//! - **Bounded cache** — entry and byte limits hold at every
//!   quiescent point, whatever the eviction policy.

pub mod arena;
pub mod cache;
pub mod compaction;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod level;
pub mod lsm;
pub mod manifest;
pub mod memtable;
pub mod metrics;
pub mod sstable;
pub mod sync;
pub mod types;
pub mod wal;

pub use config::{CacheConfig, DbConfig, EvictionPolicy, LsmConfig};
pub use engine::{AnyEngine, EngineKind, EngineManager, StorageEngine};
pub use error::{Error, ErrorKind, Result};
