//! Restartable forward iteration over one table.
//!
//! [`TableIterator`] walks data blocks in index order, decoding one
//! block at a time. Compaction iterates with tombstones preserved;
//! external consumers may skip them.
//!
//! Block validation (CRC, entry counts) happens on load. A corrupt
//! block ends the iteration and latches the error — callers that must
//! distinguish "drained" from "died" check [`TableIterator::error`]
//! after exhaustion, mirroring the status-carrying iterators of the
//! LevelDB lineage.

use tracing::warn;

use crate::types::Entry;

use super::{BlockKind, SstableError, TableReader, decode_data_entries, read_block};

/// Forward iterator over the entries of one table.
pub struct TableIterator<'a> {
    reader: &'a TableReader,
    include_tombstones: bool,
    block_idx: usize,
    block_entries: Vec<Entry>,
    entry_idx: usize,
    error: Option<SstableError>,
}

impl<'a> TableIterator<'a> {
    /// Positions a new iterator at the table's first entry.
    pub fn new(reader: &'a TableReader, include_tombstones: bool) -> Self {
        Self {
            reader,
            include_tombstones,
            block_idx: 0,
            block_entries: Vec::new(),
            entry_idx: 0,
            error: None,
        }
    }

    /// Restarts the iteration from the first entry.
    pub fn rewind(&mut self) {
        self.block_idx = 0;
        self.block_entries.clear();
        self.entry_idx = 0;
        self.error = None;
    }

    /// The error that ended iteration early, if any.
    pub fn error(&self) -> Option<&SstableError> {
        self.error.as_ref()
    }

    /// Loads the next data block into `block_entries`.
    fn load_next_block(&mut self) -> bool {
        let index = self.reader.index_entries();
        while self.block_idx < index.len() {
            let slot = &index[self.block_idx];
            self.block_idx += 1;
            match read_block(self.reader.mmap_bytes(), slot.offset, BlockKind::Data)
                .and_then(|(header, body)| decode_data_entries(&body, header.count))
            {
                Ok(entries) => {
                    if entries.is_empty() {
                        continue;
                    }
                    self.block_entries = entries;
                    self.entry_idx = 0;
                    return true;
                }
                Err(e) => {
                    warn!(
                        path = %self.reader.path().display(),
                        block = self.block_idx - 1,
                        error = %e,
                        "table iteration stopped on corrupt block"
                    );
                    self.error = Some(e);
                    return false;
                }
            }
        }
        false
    }
}

impl Iterator for TableIterator<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        loop {
            if self.error.is_some() {
                return None;
            }
            if self.entry_idx >= self.block_entries.len() {
                if !self.load_next_block() {
                    return None;
                }
            }
            let entry = self.block_entries[self.entry_idx].clone();
            self.entry_idx += 1;
            if entry.deleted && !self.include_tombstones {
                continue;
            }
            return Some(entry);
        }
    }
}
