//! # Compaction Module
//!
//! Background maintenance of the table hierarchy: a priority queue of
//! tasks drained by a worker thread pool.
//!
//! ## Task types
//!
//! - **Level-0** — stream one frozen memtable into a fresh level-0
//!   table, register it, and release the memtable.
//! - **Level-N** — merge the oldest table of level *n* with every
//!   overlapping table of level *n+1*, dropping shadowed versions,
//!   and purging tombstones when nothing deeper can hold the key.
//! - **Manual** — a user-triggered level-N pass at urgent priority.
//! - **Major** — full rewrite, walking every level top-down.
//!
//! ## Scheduling
//!
//! Tasks are inserted by priority: ahead of the head when strictly
//! more urgent, otherwise before the first strictly-less-urgent
//! successor. `trigger_check` runs after every flush and periodically
//! from idle workers; it deduplicates by target (memtable identity,
//! level number) and respects a load cap of `2 × worker_count`
//! outstanding tasks.
//!
//! ## Failure semantics
//!
//! A failed task records its error and bumps the failure counter; the
//! pool keeps running and the next trigger may retry. Shutdown sets a
//! flag, broadcasts the queue condition, and joins every worker.

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::config::{LsmConfig, MAX_LEVELS};
use crate::error::{ErrorKind, KindError};
use crate::level::{LevelError, LevelManager, TableMeta, table_file_name};
use crate::manifest::{Manifest, ManifestError};
use crate::memtable::{Memtable, MemtableManager};
use crate::sstable::{SstableError, TableIterator, TableWriter};
use crate::types::Entry;
use crate::wal::{Wal, WalError};

/// Retries for a colliding table file name before the task fails.
const FILE_NAME_RETRIES: u32 = 10;

/// Idle wait before a worker re-runs the periodic trigger check.
const WORKER_TICK: Duration = Duration::from_millis(200);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors produced while executing compaction tasks.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// Table build or read failure.
    #[error("table error: {0}")]
    Sstable(#[from] SstableError),

    /// Level registry failure.
    #[error("level error: {0}")]
    Level(#[from] LevelError),

    /// Manifest persistence failure.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// WAL checkpoint failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not find a free table file name.
    #[error("file name collision persisted across {FILE_NAME_RETRIES} attempts")]
    FileNameCollision,

    /// An input table died mid-merge.
    #[error("merge input failed: {0}")]
    MergeInput(String),
}

impl KindError for CompactionError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Sstable(e) => e.kind(),
            Self::Level(e) => e.kind(),
            Self::Manifest(e) => e.kind(),
            Self::Wal(e) => e.kind(),
            Self::Io(_) => ErrorKind::Io,
            Self::FileNameCollision | Self::MergeInput(_) => ErrorKind::CompactionFailed,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Tasks
// ------------------------------------------------------------------------------------------------

/// Priority of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Background housekeeping.
    Low,
    /// Routine level overflow.
    Normal,
    /// Memtable flushes (they unblock writers).
    High,
    /// Operator-requested work.
    Urgent,
}

/// What a task does.
#[derive(Clone)]
pub enum TaskKind {
    /// Flush one frozen memtable into level 0.
    Level0 {
        /// The specific memtable to flush (identity matters).
        memtable: Arc<Memtable>,
    },
    /// Merge the oldest table of `level` into `level + 1`.
    LevelN {
        /// Source level.
        level: usize,
    },
    /// Full rewrite of every level (reserved for operators).
    Major,
    /// User-triggered compaction of one level.
    Manual {
        /// Source level.
        level: usize,
    },
}

impl std::fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Level0 { memtable } => write!(f, "Level0(memtable {})", memtable.id()),
            Self::LevelN { level } => write!(f, "LevelN({level})"),
            Self::Major => write!(f, "Major"),
            Self::Manual { level } => write!(f, "Manual({level})"),
        }
    }
}

/// One queued unit of work.
#[derive(Debug)]
pub struct CompactionTask {
    /// Queue-unique id.
    pub id: u64,
    /// What to do.
    pub kind: TaskKind,
    /// Queue priority.
    pub priority: Priority,
}

/// Counters published by the scheduler.
#[derive(Debug, Default)]
pub struct CompactionStats {
    queued_total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    flushes: AtomicU64,
    bytes_written: AtomicU64,
    running: AtomicUsize,
}

/// Point-in-time view of [`CompactionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStatsSnapshot {
    /// Tasks ever enqueued.
    pub queued_total: u64,
    /// Tasks finished successfully.
    pub completed: u64,
    /// Tasks that failed.
    pub failed: u64,
    /// Completed level-0 flushes (a subset of `completed`).
    pub flushes: u64,
    /// Table bytes written by executors.
    pub bytes_written: u64,
    /// Tasks currently executing.
    pub running: usize,
}

// ------------------------------------------------------------------------------------------------
// Shared context
// ------------------------------------------------------------------------------------------------

/// Everything an executor needs, shared between the tree top and the
/// worker pool. Workers borrow these structures; they never own them.
pub struct CompactionContext {
    /// Tree configuration.
    pub config: LsmConfig,
    /// Directory holding the engine's `.sst` files.
    pub table_dir: PathBuf,
    /// Memtable manager (source of level-0 flushes).
    pub memtables: Arc<MemtableManager>,
    /// Level registry.
    pub levels: Arc<LevelManager>,
    /// Manifest for file-id allocation and snapshots.
    pub manifest: Arc<Manifest>,
    /// WAL, checkpointed after successful flushes.
    pub wal: Arc<Wal>,
}

// ------------------------------------------------------------------------------------------------
// Queue state
// ------------------------------------------------------------------------------------------------

struct QueueState {
    tasks: VecDeque<CompactionTask>,
    /// Levels with a queued or running level-N/manual task.
    busy_levels: Vec<usize>,
    /// Memtables with a queued or running flush task.
    busy_memtables: Vec<Arc<Memtable>>,
    shutdown: bool,
}

impl QueueState {
    fn has_memtable_task(&self, memtable: &Arc<Memtable>) -> bool {
        self.busy_memtables.iter().any(|m| Arc::ptr_eq(m, memtable))
    }

    fn has_level_task(&self, level: usize) -> bool {
        self.busy_levels.contains(&level)
    }

    /// Spec'd priority insertion: ahead of the head when strictly
    /// greater, else before the first strictly-lower successor.
    fn insert(&mut self, task: CompactionTask) {
        if self
            .tasks
            .front()
            .is_none_or(|head| task.priority > head.priority)
        {
            self.tasks.push_front(task);
            return;
        }
        let mut at = self.tasks.len();
        for i in 0..self.tasks.len() - 1 {
            if self.tasks[i + 1].priority < task.priority {
                at = i + 1;
                break;
            }
        }
        self.tasks.insert(at, task);
    }
}

// ------------------------------------------------------------------------------------------------
// Scheduler
// ------------------------------------------------------------------------------------------------

struct SchedulerInner {
    ctx: CompactionContext,
    queue: Mutex<QueueState>,
    task_available: Condvar,
    stats: CompactionStats,
    next_task_id: AtomicU64,
    worker_count: usize,
}

/// Priority task queue plus worker pool.
pub struct CompactionScheduler {
    inner: Arc<SchedulerInner>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl CompactionScheduler {
    /// Creates a scheduler and starts its workers.
    pub fn start(ctx: CompactionContext) -> Self {
        let worker_count = ctx.config.worker_count.max(1);
        let inner = Arc::new(SchedulerInner {
            ctx,
            queue: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                busy_levels: Vec::new(),
                busy_memtables: Vec::new(),
                shutdown: false,
            }),
            task_available: Condvar::new(),
            stats: CompactionStats::default(),
            next_task_id: AtomicU64::new(1),
            worker_count,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let inner = Arc::clone(&inner);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("concord-compact-{worker_id}"))
                    .spawn(move || inner.worker_loop(worker_id))
                    .expect("spawning compaction worker"),
            );
        }
        info!(workers = worker_count, "compaction scheduler started");

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues flush and level tasks for anything over threshold.
    ///
    /// Called after every successful flush and periodically by idle
    /// workers. Deduplicates by target and honors the load cap.
    pub fn trigger_check(&self) {
        self.inner.trigger_check();
    }

    /// Queues an urgent compaction of one level.
    pub fn schedule_manual(&self, level: usize) {
        self.inner.enqueue(TaskKind::Manual { level }, Priority::Urgent);
    }

    /// Queues a full rewrite.
    pub fn schedule_major(&self) {
        self.inner.enqueue(TaskKind::Major, Priority::Urgent);
    }

    /// Current counters.
    pub fn stats(&self) -> CompactionStatsSnapshot {
        self.inner.stats_snapshot()
    }

    /// Outstanding (queued + running) tasks.
    pub fn active_tasks(&self) -> usize {
        self.inner.active_tasks()
    }

    /// Stops the pool: sets the flag, broadcasts the condition, joins
    /// every worker. Queued tasks that never ran are dropped.
    pub fn shutdown(&self) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
        }
        self.inner.task_available.notify_all();

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("compaction worker panicked during shutdown");
            }
        }
        info!("compaction scheduler stopped");
    }
}

impl Drop for CompactionScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SchedulerInner {
    fn stats_snapshot(&self) -> CompactionStatsSnapshot {
        CompactionStatsSnapshot {
            queued_total: self.stats.queued_total.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            flushes: self.stats.flushes.load(Ordering::Relaxed),
            bytes_written: self.stats.bytes_written.load(Ordering::Relaxed),
            running: self.stats.running.load(Ordering::Relaxed),
        }
    }

    fn active_tasks(&self) -> usize {
        self.queue.lock().tasks.len() + self.stats.running.load(Ordering::Relaxed)
    }

    fn enqueue(&self, kind: TaskKind, priority: Priority) -> bool {
        let mut queue = self.queue.lock();
        if queue.shutdown {
            return false;
        }
        match &kind {
            TaskKind::Level0 { memtable } => {
                if queue.has_memtable_task(memtable) {
                    return false;
                }
                queue.busy_memtables.push(Arc::clone(memtable));
            }
            // A merge reads level n and rewrites level n+1: reserve
            // both, so merges on adjacent levels never share tables.
            TaskKind::LevelN { level } | TaskKind::Manual { level } => {
                if queue.has_level_task(*level) || queue.has_level_task(level + 1) {
                    return false;
                }
                queue.busy_levels.push(*level);
                queue.busy_levels.push(level + 1);
            }
            // A major rewrite walks every level; it runs alone.
            TaskKind::Major => {
                if !queue.busy_levels.is_empty() {
                    return false;
                }
                queue.busy_levels.extend(0..=MAX_LEVELS);
            }
        }

        let task = CompactionTask {
            id: self.next_task_id.fetch_add(1, Ordering::Relaxed),
            kind,
            priority,
        };
        trace!(task = ?task.kind, ?priority, "task enqueued");
        queue.insert(task);
        self.stats.queued_total.fetch_add(1, Ordering::Relaxed);
        drop(queue);
        self.task_available.notify_one();
        true
    }

    fn trigger_check(&self) {
        let cap = 2 * self.worker_count;
        // One flush task per queued immutable, oldest first.
        for memtable in self.ctx.memtables.immutables() {
            if self.active_tasks() >= cap {
                return;
            }
            self.enqueue(TaskKind::Level0 { memtable }, Priority::High);
        }
        // One merge task per level over threshold.
        for level in 0..MAX_LEVELS {
            if self.active_tasks() >= cap {
                return;
            }
            if self.ctx.levels.needs_compaction(level) {
                self.enqueue(TaskKind::LevelN { level }, Priority::Normal);
            }
        }
    }

    fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "compaction worker up");
        loop {
            let task = {
                let mut queue = self.queue.lock();
                loop {
                    if queue.shutdown {
                        debug!(worker_id, "compaction worker exiting");
                        return;
                    }
                    if let Some(task) = queue.tasks.pop_front() {
                        break Some(task);
                    }
                    let timeout = self
                        .task_available
                        .wait_for(&mut queue, WORKER_TICK)
                        .timed_out();
                    if timeout && queue.tasks.is_empty() && !queue.shutdown {
                        break None; // idle tick: run the trigger below
                    }
                }
            };

            match task {
                Some(task) => self.run_task(worker_id, task),
                None => self.trigger_check(),
            }
        }
    }

    fn run_task(&self, worker_id: usize, task: CompactionTask) {
        self.stats.running.fetch_add(1, Ordering::Relaxed);
        debug!(worker_id, task_id = task.id, kind = ?task.kind, "task running");

        let result = match &task.kind {
            TaskKind::Level0 { memtable } => self.execute_level0(memtable),
            TaskKind::LevelN { level } | TaskKind::Manual { level } => self.execute_leveln(*level),
            TaskKind::Major => self.execute_major(),
        };

        // Release target reservations.
        {
            let mut queue = self.queue.lock();
            match &task.kind {
                TaskKind::Level0 { memtable } => {
                    queue.busy_memtables.retain(|m| !Arc::ptr_eq(m, memtable));
                }
                TaskKind::LevelN { level } | TaskKind::Manual { level } => {
                    queue.busy_levels.retain(|l| l != level && *l != level + 1);
                }
                TaskKind::Major => queue.busy_levels.clear(),
            }
        }

        match result {
            Ok(bytes) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                if matches!(task.kind, TaskKind::Level0 { .. }) {
                    self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                }
                self.stats.bytes_written.fetch_add(bytes, Ordering::Relaxed);
                debug!(worker_id, task_id = task.id, bytes, "task completed");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker_id,
                    task_id = task.id,
                    kind = ?task.kind,
                    error_kind = %e.kind(),
                    error = %e,
                    "task failed"
                );
            }
        }
        self.stats.running.fetch_sub(1, Ordering::Relaxed);
    }

    // --------------------------------------------------------------------------------------------
    // Level-0 executor
    // --------------------------------------------------------------------------------------------

    /// Streams one frozen memtable into a fresh level-0 table.
    fn execute_level0(&self, memtable: &Arc<Memtable>) -> Result<u64, CompactionError> {
        memtable.mark_flushing();

        // Empty table: nothing to persist, just release it.
        if memtable.is_empty() {
            self.ctx.memtables.remove_immutable(memtable);
            memtable.mark_flushed();
            self.checkpoint_wal()?;
            return Ok(0);
        }

        // Unique file name; retry on collision under load.
        let (file_id, path) = self.allocate_table_path(0)?;

        let mut writer =
            TableWriter::create(&path, self.ctx.config.block_size, self.ctx.config.bloom_fp_rate)?;
        for entry in memtable.iter(true) {
            if let Err(e) = writer.add(&entry) {
                // The writer drop removes its temp file; nothing under
                // the final name exists yet.
                return Err(e.into());
            }
        }
        let final_path = writer.finalize()?;

        let meta = TableMeta::load(&final_path, 0, file_id)?;
        let bytes_written = meta.file_size;

        if let Err(e) = self.ctx.levels.add_table(Arc::clone(&meta)) {
            let _ = fs::remove_file(&final_path);
            return Err(e.into());
        }

        // Identity removal: a racing worker may have consumed it
        // already, which is fine.
        self.ctx.memtables.remove_immutable(memtable);
        memtable.mark_flushed();

        self.ctx.manifest.set_file_counts(self.ctx.levels.file_counts());
        self.ctx.manifest.save()?;
        self.checkpoint_wal()?;

        info!(
            file_id,
            bytes = bytes_written,
            entries = meta.entry_count,
            "memtable flushed to level 0"
        );

        // A fresh level-0 file may tip the level over its limit.
        self.trigger_check();
        Ok(bytes_written)
    }

    /// Writes a WAL checkpoint at the highest sequence that is now
    /// fully durable: one below the oldest creation sequence still
    /// resident in memory.
    fn checkpoint_wal(&self) -> Result<(), CompactionError> {
        let mut safe_seq = self.ctx.memtables.active().created_seq();
        for table in self.ctx.memtables.immutables() {
            safe_seq = safe_seq.min(table.created_seq());
        }
        if safe_seq > 0 {
            self.ctx.wal.checkpoint(safe_seq)?;
        }
        Ok(())
    }

    /// Picks a fresh `(file_id, path)`, retrying on name collisions.
    fn allocate_table_path(&self, level: usize) -> Result<(u64, PathBuf), CompactionError> {
        for _ in 0..FILE_NAME_RETRIES {
            let file_id = self.ctx.manifest.allocate_file_id();
            let path = self.ctx.table_dir.join(table_file_name(level, file_id));
            if !path.exists() {
                return Ok((file_id, path));
            }
            warn!(file_id, path = %path.display(), "table name collision, retrying");
        }
        Err(CompactionError::FileNameCollision)
    }

    // --------------------------------------------------------------------------------------------
    // Level-N executor
    // --------------------------------------------------------------------------------------------

    /// Merges the oldest table of `level` with every overlapping table
    /// of `level + 1`.
    fn execute_leveln(&self, level: usize) -> Result<u64, CompactionError> {
        if level + 1 >= MAX_LEVELS {
            return Ok(0); // deepest level has nowhere to go
        }
        let source_tables = self.ctx.levels.tables(level);
        let Some(source) = source_tables.iter().min_by_key(|t| t.file_id).cloned() else {
            return Ok(0);
        };

        let target_level = level + 1;
        let mut inputs = vec![Arc::clone(&source)];
        inputs.extend(
            self.ctx
                .levels
                .overlapping(target_level, &source.min_key, &source.max_key),
        );

        // Tombstones may be purged only when no level deeper than the
        // target can hold an older occurrence of the key.
        let purge_tombstones = (target_level + 1..MAX_LEVELS)
            .all(|l| self.ctx.levels.file_count(l) == 0);

        debug!(
            level,
            target_level,
            inputs = inputs.len(),
            purge_tombstones,
            "level-N compaction starting"
        );

        // Open every input and merge (key ASC, seq DESC), keeping the
        // newest version per key.
        let readers = inputs
            .iter()
            .map(|meta| meta.reader())
            .collect::<Result<Vec<_>, _>>()?;
        let mut iters: Vec<TableIterator<'_>> = readers
            .iter()
            .map(|reader| TableIterator::new(reader, true))
            .collect();

        let mut merge = MergeIterator::new(&mut iters);
        let max_output_bytes = self.ctx.config.block_size * self.ctx.config.blocks_per_output;

        let mut outputs: Vec<Arc<TableMeta>> = Vec::new();
        let mut writer: Option<(u64, PathBuf, TableWriter)> = None;
        let mut written_to_current = 0usize;
        let mut bytes_written = 0u64;
        let mut last_key: Option<Entry> = None;

        while let Some(entry) = merge.next() {
            // Shadowed version of a key we already emitted.
            if let Some(prev) = &last_key {
                if prev.key == entry.key {
                    continue;
                }
            }
            last_key = Some(entry.clone());

            if entry.deleted && purge_tombstones {
                continue;
            }

            if writer.is_none() {
                let (file_id, path) = self.allocate_table_path(target_level)?;
                let table = TableWriter::create(
                    &path,
                    self.ctx.config.block_size,
                    self.ctx.config.bloom_fp_rate,
                )?;
                writer = Some((file_id, path, table));
                written_to_current = 0;
            }
            if let Some((_, _, table)) = writer.as_mut() {
                table.add(&entry)?;
                written_to_current += entry.encoded_len();
            }

            if written_to_current >= max_output_bytes {
                if let Some((file_id, path, table)) = writer.take() {
                    table.finalize()?;
                    let meta = TableMeta::load(&path, target_level, file_id)?;
                    bytes_written += meta.file_size;
                    outputs.push(meta);
                }
            }
        }
        if let Some(e) = merge.take_error() {
            return Err(CompactionError::MergeInput(e.to_string()));
        }
        if let Some((file_id, path, table)) = writer.take() {
            table.finalize()?;
            let meta = TableMeta::load(&path, target_level, file_id)?;
            bytes_written += meta.file_size;
            outputs.push(meta);
        }

        // Swap inputs for outputs atomically, persist, then unlink.
        self.ctx.levels.install_compaction(&inputs, &outputs)?;
        self.ctx.manifest.set_file_counts(self.ctx.levels.file_counts());
        self.ctx.manifest.save()?;

        for meta in &inputs {
            meta.evict_reader();
            if let Err(e) = fs::remove_file(meta.path()) {
                warn!(path = %meta.path().display(), error = %e, "failed to unlink compacted input");
            }
        }

        info!(
            level,
            target_level,
            inputs = inputs.len(),
            outputs = outputs.len(),
            bytes = bytes_written,
            "level-N compaction finished"
        );
        Ok(bytes_written)
    }

    /// Full rewrite: push every level's data downward, top to bottom.
    fn execute_major(&self) -> Result<u64, CompactionError> {
        let mut total = 0;
        for level in 0..MAX_LEVELS - 1 {
            while self.ctx.levels.file_count(level) > 0 {
                total += self.execute_leveln(level)?;
            }
        }
        Ok(total)
    }
}

// ------------------------------------------------------------------------------------------------
// MergeIterator — k-way merge over table iterators
// ------------------------------------------------------------------------------------------------

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Heap-based k-way merge yielding entries in `(key ASC, seq DESC)`
/// order across all sources.
///
/// An input that dies mid-iteration latches its error here; callers
/// check [`take_error`](Self::take_error) after draining.
pub struct MergeIterator<'a, 'r> {
    sources: &'a mut [TableIterator<'r>],
    heap: BinaryHeap<Reverse<HeapItem>>,
    error: Option<SstableError>,
}

struct HeapItem {
    entry: Entry,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.entry.cmp(&other.entry)
    }
}

impl<'a, 'r> MergeIterator<'a, 'r> {
    /// Primes the heap with the first entry of every source.
    pub fn new(sources: &'a mut [TableIterator<'r>]) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut error = None;
        for (idx, source) in sources.iter_mut().enumerate() {
            if let Some(entry) = source.next() {
                heap.push(Reverse(HeapItem { entry, source: idx }));
            } else if let Some(e) = source.error() {
                error = Some(SstableError::Corrupted(e.to_string()));
            }
        }
        Self {
            sources,
            heap,
            error,
        }
    }

    /// The first error any source hit, if one did.
    pub fn take_error(&mut self) -> Option<SstableError> {
        self.error.take()
    }
}

impl Iterator for MergeIterator<'_, '_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        let Reverse(item) = self.heap.pop()?;
        let source = &mut self.sources[item.source];
        if let Some(next_entry) = source.next() {
            self.heap.push(Reverse(HeapItem {
                entry: next_entry,
                source: item.source,
            }));
        } else if let Some(e) = source.error() {
            if self.error.is_none() {
                self.error = Some(SstableError::Corrupted(e.to_string()));
            }
        }
        Some(item.entry)
    }
}
