//! Batch writer — many mutations, one commit.
//!
//! A [`BatchWriter`] buffers puts and deletes, then commits them in
//! one pass: sequences are assigned monotonically, one WAL record is
//! written per operation (with a single fsync at the end when
//! `sync_wal` is set), and all operations apply to the memtable under
//! one exclusive tree lock.
//!
//! With `atomic_commit`, a mid-commit failure unwinds every applied
//! operation from a write-set journal that captured each key's prior
//! version — pre-validation alone cannot foresee I/O failures, a
//! journal can always undo them. A successful atomic commit appends a
//! `Commit` boundary record after the batch (currently informational;
//! replay treats it as a marker).

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{ErrorKind, KindError};
use crate::types::Version;
use crate::wal::WalRecord;

use super::{LsmError, LsmTree};

/// One buffered operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BatchOp {
    Put { key: Bytes, value: Bytes },
    Delete { key: Bytes },
}

impl BatchOp {
    fn key(&self) -> &Bytes {
        match self {
            Self::Put { key, .. } => key,
            Self::Delete { key } => key,
        }
    }
}

/// Commit-time behavior switches.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Sort operations by key before committing.
    pub sort_keys: bool,

    /// Collapse repeated keys, keeping the latest operation.
    pub dedup_keys: bool,

    /// Fsync the WAL once after the last record.
    pub sync_wal: bool,

    /// All-or-nothing semantics: roll back applied operations when
    /// any operation fails.
    pub atomic_commit: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            sort_keys: false,
            dedup_keys: false,
            sync_wal: true,
            atomic_commit: true,
        }
    }
}

/// Outcome of one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Operations applied and kept.
    pub committed: usize,
    /// Operations that failed (after rollback: all of them).
    pub failed: usize,
    /// Kind of the first failure, if any.
    pub first_error: Option<ErrorKind>,
    /// Index (in commit order) of the first failing operation.
    pub first_error_index: Option<usize>,
    /// Wall-clock commit duration in microseconds.
    pub elapsed_us: u64,
    /// WAL records written.
    pub wal_writes: usize,
}

/// Buffered multi-operation writer for one tree.
pub struct BatchWriter<'a> {
    tree: &'a LsmTree,
    ops: Vec<BatchOp>,
    options: BatchOptions,
}

impl<'a> BatchWriter<'a> {
    pub(crate) fn new(tree: &'a LsmTree, options: BatchOptions) -> Self {
        Self {
            tree,
            ops: Vec::new(),
            options,
        }
    }

    /// Buffers a put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        });
        self
    }

    /// Buffers a delete.
    pub fn delete(&mut self, key: &[u8]) -> &mut Self {
        self.ops.push(BatchOp::Delete {
            key: Bytes::copy_from_slice(key),
        });
        self
    }

    /// Number of buffered operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Commits the batch. See the module docs for semantics.
    pub fn commit(self) -> Result<BatchReport, LsmError> {
        let started = Instant::now();
        let BatchWriter {
            tree,
            mut ops,
            options,
        } = self;

        tree.check_write_gate()?;

        // Validate everything up front: an invalid operation fails
        // the whole batch before any effect.
        for (index, op) in ops.iter().enumerate() {
            let result = match op {
                BatchOp::Put { key, value } => tree
                    .validate_key(key)
                    .and_then(|()| tree.validate_value(value)),
                BatchOp::Delete { key } => tree.validate_key(key),
            };
            if let Err(e) = result {
                return Ok(BatchReport {
                    committed: 0,
                    failed: ops.len(),
                    first_error: Some(e.kind()),
                    first_error_index: Some(index),
                    elapsed_us: started.elapsed().as_micros() as u64,
                    wal_writes: 0,
                });
            }
        }

        if options.sort_keys {
            ops.sort_by(|a, b| a.key().cmp(b.key()));
        }
        if options.dedup_keys {
            // Keep the latest operation per key: walk from the back,
            // drop keys already seen.
            let mut seen = std::collections::HashSet::new();
            let mut keep = vec![false; ops.len()];
            for (index, op) in ops.iter().enumerate().rev() {
                if seen.insert(op.key().clone()) {
                    keep[index] = true;
                }
            }
            let mut keep_iter = keep.into_iter();
            ops.retain(|_| keep_iter.next().unwrap_or(false));
        }

        if ops.is_empty() {
            return Ok(BatchReport {
                committed: 0,
                failed: 0,
                first_error: None,
                first_error_index: None,
                elapsed_us: started.elapsed().as_micros() as u64,
                wal_writes: 0,
            });
        }

        // Exclusive tree lock: sequences, WAL records, and memtable
        // application happen as one unit with no interleaved writers.
        let _tree = tree.tree_lock().write();
        let active = tree.memtables().active();

        let mut wal_writes = 0usize;
        let mut journal: Vec<(Bytes, Option<Version>)> = Vec::with_capacity(ops.len());
        let mut failure: Option<(usize, ErrorKind)> = None;

        for (index, op) in ops.iter().enumerate() {
            let seq = tree.next_seq();
            let record = match op {
                BatchOp::Put { key, value } => WalRecord::put(seq, key, value),
                BatchOp::Delete { key } => WalRecord::delete(seq, key),
            };
            if let Err(e) = tree.wal_append(&record) {
                failure = Some((index, e.kind()));
                break;
            }
            wal_writes += 1;

            // Capture the prior version before overwriting.
            journal.push((op.key().clone(), active.get(op.key())));

            let applied = match op {
                BatchOp::Put { key, value } => active.put(key, value, seq),
                BatchOp::Delete { key } => active.delete(key, seq),
            };
            if let Err(e) = applied {
                journal.pop();
                failure = Some((index, e.kind()));
                break;
            }
        }

        let report = match failure {
            None => {
                if options.atomic_commit {
                    // Boundary marker after a complete batch.
                    let seq = tree.last_seq();
                    if let Err(e) = tree.wal_append(&WalRecord::commit(seq)) {
                        warn!(error = %e, "commit boundary record failed");
                    } else {
                        wal_writes += 1;
                    }
                }
                if options.sync_wal {
                    tree.wal().sync()?;
                }
                tree.memtables().note_seq(tree.last_seq());
                BatchReport {
                    committed: ops.len(),
                    failed: 0,
                    first_error: None,
                    first_error_index: None,
                    elapsed_us: started.elapsed().as_micros() as u64,
                    wal_writes,
                }
            }
            Some((index, kind)) => {
                if options.atomic_commit {
                    // Unwind in reverse: restore each key's captured
                    // prior version.
                    for (key, prior) in journal.drain(..).rev() {
                        active.revert(&key, prior);
                    }
                    debug!(failed_at = index, %kind, "batch rolled back");
                    BatchReport {
                        committed: 0,
                        failed: ops.len(),
                        first_error: Some(kind),
                        first_error_index: Some(index),
                        elapsed_us: started.elapsed().as_micros() as u64,
                        wal_writes,
                    }
                } else {
                    BatchReport {
                        committed: index,
                        failed: ops.len() - index,
                        first_error: Some(kind),
                        first_error_index: Some(index),
                        elapsed_us: started.elapsed().as_micros() as u64,
                        wal_writes,
                    }
                }
            }
        };

        drop(_tree);
        tree.trigger_compaction_check();
        Ok(report)
    }
}
