use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::compaction::{
    CompactionContext, CompactionScheduler, CompactionTask, Priority, QueueState, TaskKind,
};
use crate::config::LsmConfig;
use crate::level::{LevelManager, TableMeta, table_file_name};
use crate::manifest::Manifest;
use crate::memtable::MemtableManager;
use crate::sstable::TableWriter;
use crate::types::Entry;
use crate::wal::Wal;

mod tests_executors;
mod tests_queue;

/// A complete compaction context over a temp directory.
pub(crate) struct Fixture {
    pub tmp: TempDir,
    pub memtables: Arc<MemtableManager>,
    pub levels: Arc<LevelManager>,
    pub manifest: Arc<Manifest>,
    pub wal: Arc<Wal>,
    pub config: LsmConfig,
}

impl Fixture {
    pub fn new(config: LsmConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let tmp = TempDir::new().unwrap();
        let table_dir = tmp.path().join("lsm");
        let wal_dir = tmp.path().join("wal");
        std::fs::create_dir_all(&table_dir).unwrap();

        Self {
            memtables: Arc::new(MemtableManager::new(
                config.memtable_max_size,
                config.max_immutable_count,
                config.auto_freeze,
            )),
            levels: Arc::new(LevelManager::new(config.clone())),
            manifest: Arc::new(Manifest::open(tmp.path()).unwrap()),
            wal: Arc::new(Wal::open(&wal_dir, config.wal_size_limit, false).unwrap()),
            config,
            tmp,
        }
    }

    pub fn context(&self) -> CompactionContext {
        CompactionContext {
            config: self.config.clone(),
            table_dir: self.tmp.path().join("lsm"),
            memtables: Arc::clone(&self.memtables),
            levels: Arc::clone(&self.levels),
            manifest: Arc::clone(&self.manifest),
            wal: Arc::clone(&self.wal),
        }
    }

    /// Writes a table straight into the hierarchy, bypassing flushes.
    pub fn plant_table(&self, level: usize, rows: &[(&[u8], &[u8], u64, bool)]) -> Arc<TableMeta> {
        let file_id = self.manifest.allocate_file_id();
        let path = self
            .tmp
            .path()
            .join("lsm")
            .join(table_file_name(level, file_id));
        let mut writer = TableWriter::create(&path, self.config.block_size, 0.01).unwrap();
        for (key, value, seq, deleted) in rows {
            let entry = if *deleted {
                Entry::tombstone(key.to_vec(), *seq)
            } else {
                Entry::put(key.to_vec(), value.to_vec(), *seq)
            };
            writer.add(&entry).unwrap();
        }
        writer.finalize().unwrap();
        let meta = TableMeta::load(&path, level, file_id).unwrap();
        self.levels.add_table(Arc::clone(&meta)).unwrap();
        meta
    }
}

pub(crate) fn small_config() -> LsmConfig {
    LsmConfig {
        memtable_max_size: 1024 * 1024,
        max_immutable_count: 4,
        auto_freeze: false,
        level0_file_limit: 2,
        worker_count: 2,
        ..LsmConfig::default()
    }
}

/// Polls until `predicate` holds or the timeout expires.
pub(crate) fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

pub(crate) fn task(id: u64, priority: Priority) -> CompactionTask {
    CompactionTask {
        id,
        kind: TaskKind::Major,
        priority,
    }
}

pub(crate) fn queue_priorities(queue: &QueueState) -> Vec<Priority> {
    queue.tasks.iter().map(|t| t.priority).collect()
}

pub(crate) fn start_scheduler(fixture: &Fixture) -> CompactionScheduler {
    CompactionScheduler::start(fixture.context())
}
