//! SSTable writer — streams sorted entries into a complete table file.
//!
//! The writer accumulates one data block in memory; when it crosses
//! the configured block size the block is finalized (CRC computed,
//! header + body appended to disk) and an index entry keyed by the
//! block's first key is recorded. `finalize` flushes the last block,
//! serializes the index and bloom blocks, writes the footer, fsyncs,
//! and atomically renames the temp file into place — a crash can
//! never leave a half-written table under the final name.
//!
//! Input must arrive in strictly ascending key order; a violation is
//! rejected so a broken merge cannot silently produce an unsearchable
//! table.

use std::fs::{File, OpenOptions, rename};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use crc32fast::Hasher as Crc32;
use tracing::debug;

use crate::encoding::Encode;
use crate::types::Entry;

use super::{
    BLOCK_HEADER_SIZE, BlockHeader, BlockKind, Footer, IndexEntry, SstableError,
    bloom::BloomFilter,
};

/// Streaming writer for one table file.
pub struct TableWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    file: File,
    writer: BufWriter<File>,
    block_size: usize,
    bloom_fp_rate: f64,

    offset: u64,
    current_block: Vec<u8>,
    block_count: u32,
    block_first_key: Option<Bytes>,
    block_first_seq: u64,
    index: Vec<IndexEntry>,

    last_key: Option<Bytes>,
    keys: Vec<Bytes>,
    entry_count: u64,
    min_seq: u64,
    max_seq: u64,
    finalized: bool,
}

impl TableWriter {
    /// Creates a writer targeting `path`, writing through
    /// `path + ".tmp"` until finalized.
    pub fn create(
        path: impl AsRef<Path>,
        block_size: usize,
        bloom_fp_rate: f64,
    ) -> Result<Self, SstableError> {
        let final_path = path.as_ref().to_path_buf();
        let tmp_path = final_path.with_extension("sst.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let writer = BufWriter::new(file.try_clone()?);

        Ok(Self {
            final_path,
            tmp_path,
            file,
            writer,
            block_size: block_size.max(64),
            bloom_fp_rate,
            offset: 0,
            current_block: Vec::new(),
            block_count: 0,
            block_first_key: None,
            block_first_seq: 0,
            index: Vec::new(),
            last_key: None,
            keys: Vec::new(),
            entry_count: 0,
            min_seq: u64::MAX,
            max_seq: 0,
            finalized: false,
        })
    }

    /// Appends one entry. Keys must be strictly ascending.
    pub fn add(&mut self, entry: &Entry) -> Result<(), SstableError> {
        if let Some(last) = &self.last_key {
            if entry.key.as_ref() <= last.as_ref() {
                return Err(SstableError::UnsortedInput);
            }
        }
        self.last_key = Some(entry.key.clone());

        if self.block_first_key.is_none() {
            self.block_first_key = Some(entry.key.clone());
            self.block_first_seq = entry.seq;
        }

        // Entry header + payload into the open block.
        (entry.key.len() as u32).encode_to(&mut self.current_block)?;
        (entry.value.len() as u32).encode_to(&mut self.current_block)?;
        entry.seq.encode_to(&mut self.current_block)?;
        entry.deleted.encode_to(&mut self.current_block)?;
        self.current_block.extend_from_slice(&entry.key);
        self.current_block.extend_from_slice(&entry.value);
        self.block_count += 1;

        self.keys.push(entry.key.clone());
        self.entry_count += 1;
        self.min_seq = self.min_seq.min(entry.seq);
        self.max_seq = self.max_seq.max(entry.seq);

        if self.current_block.len() >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Entries added so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Writes the open data block and records its index entry.
    fn flush_block(&mut self) -> Result<(), SstableError> {
        if self.current_block.is_empty() {
            return Ok(());
        }
        let body = std::mem::take(&mut self.current_block);
        let first_key = self
            .block_first_key
            .take()
            .unwrap_or_else(Bytes::new);

        let block_offset = self.offset;
        let written = self.write_raw_block(BlockKind::Data, self.block_count, &body)?;
        self.index.push(IndexEntry {
            key: first_key,
            offset: block_offset,
            size: written as u32,
            seq: self.block_first_seq,
        });
        self.block_count = 0;
        Ok(())
    }

    /// Writes header + body for one block; returns total bytes.
    fn write_raw_block(
        &mut self,
        kind: BlockKind,
        count: u32,
        body: &[u8],
    ) -> Result<usize, SstableError> {
        let mut hasher = Crc32::new();
        hasher.update(body);
        let header = BlockHeader {
            kind: kind.as_u32(),
            count,
            uncompressed: body.len() as u32,
            compressed: body.len() as u32,
            crc32: hasher.finalize(),
        };
        let mut bytes = Vec::with_capacity(BLOCK_HEADER_SIZE + body.len());
        header.encode_to(&mut bytes)?;
        bytes.extend_from_slice(body);
        self.writer.write_all(&bytes)?;
        self.offset += bytes.len() as u64;
        Ok(bytes.len())
    }

    /// Flushes remaining state, writes index, bloom, and footer,
    /// fsyncs, and renames the table into place.
    pub fn finalize(mut self) -> Result<PathBuf, SstableError> {
        self.flush_block()?;

        // Index block. A zero-entry body round-trips.
        let index_offset = self.offset;
        let mut index_body = Vec::new();
        for entry in &self.index {
            entry.encode_to(&mut index_body)?;
        }
        let index_size =
            self.write_raw_block(BlockKind::Index, self.index.len() as u32, &index_body)?;

        // Bloom block: raw bit array, bit count in the header's
        // reserved slot.
        let mut bloom = BloomFilter::with_rate(self.keys.len(), self.bloom_fp_rate);
        for key in &self.keys {
            bloom.insert(key);
        }
        let bloom_offset = self.offset;
        let bloom_bits = bloom.bits().to_vec();
        let bloom_size =
            self.write_raw_block(BlockKind::Bloom, bloom.bit_count() as u32, &bloom_bits)?;

        let footer = Footer {
            magic: super::SST_MAGIC,
            version: super::SST_VERSION,
            index_offset,
            index_size: index_size as u32,
            bloom_offset,
            bloom_size: bloom_size as u32,
            min_seq: if self.entry_count == 0 { 0 } else { self.min_seq },
            max_seq: self.max_seq,
            entry_count: self.entry_count,
            crc32: 0, // computed inside encode()
        };
        let footer_bytes = footer.encode()?;
        self.writer.write_all(&footer_bytes)?;
        self.writer.flush()?;
        self.file.sync_all()?;

        rename(&self.tmp_path, &self.final_path)?;
        self.finalized = true;

        debug!(
            path = %self.final_path.display(),
            entries = self.entry_count,
            blocks = self.index.len(),
            "table finalized"
        );
        Ok(self.final_path.clone())
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        // An abandoned writer must not leave its temp file behind.
        if !self.finalized {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}
