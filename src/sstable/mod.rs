//! Sorted String Table (SSTable) Module
//!
//! Immutable, block-structured on-disk tables holding sorted
//! `(key, value, seq, deleted)` entries. Every byte of the format is
//! pinned here; see the layout below.
//!
//! # On-disk layout (little-endian)
//!
//! ```text
//! [data block 0: header(20) + body]
//! [data block 1: header(20) + body]
//! ...
//! [index block:  header(20) + body]     one entry per data block
//! [bloom block:  header(20) + raw bits] header count field = bit count
//! [footer: 60 bytes]
//! ```
//!
//! Block header: `kind(u32) | entry_count(u32) | uncompressed(u32) |
//! compressed(u32) | crc32(u32)`; the CRC covers the uncompressed
//! body. Compression is not applied, so `compressed` always mirrors
//! `uncompressed`. For the bloom block the `entry_count` slot is a
//! reserved field carrying the filter's bit count; a mismatch against
//! the body length is corruption.
//!
//! Data entry: `key_len(u32) | value_len(u32) | seq(u64) |
//! deleted(u8) | key | value`.
//!
//! Index entry: `key_len(u32) | offset(u64) | size(u32) | seq(u64) |
//! key` — keyed by the block's first (smallest) key; `size` is the
//! full block size including its header.
//!
//! Footer: `magic(u32) | version(u32) | index_off(u64) |
//! index_size(u32) | bloom_off(u64) | bloom_size(u32) | min_seq(u64) |
//! max_seq(u64) | entry_count(u64) | crc32(u32)`; the CRC covers the
//! preceding footer bytes. Magic or version mismatch is a hard open
//! error.
//!
//! # Concurrency model
//!
//! Tables are immutable after [`TableWriter::finalize`]; a
//! [`TableReader`] is `&self` throughout and safe to share across
//! threads without locking.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod bloom;
pub mod iterator;
pub mod writer;

#[cfg(test)]
mod tests;

pub use bloom::BloomFilter;
pub use iterator::TableIterator;
pub use writer::TableWriter;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::encoding::{Decode, Encode, EncodingError};
use crate::error::{ErrorKind, KindError, io_error_kind};
use crate::types::Version;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Footer magic: `b"SST1"` read as a little-endian u32.
pub const SST_MAGIC: u32 = u32::from_le_bytes(*b"SST1");

/// Current format version.
pub const SST_VERSION: u32 = 1;

/// Fixed block header size.
pub const BLOCK_HEADER_SIZE: usize = 20;

/// Fixed footer size.
pub const FOOTER_SIZE: usize = 60;

/// Fixed per-entry header inside a data block.
pub const ENTRY_HEADER_SIZE: usize = 4 + 4 + 8 + 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum SstableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Wire-format decode failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The file failed an integrity check.
    #[error("corrupted table: {0}")]
    Corrupted(String),

    /// The writer was fed keys out of sorted order.
    #[error("entries must arrive in ascending key order")]
    UnsortedInput,
}

impl KindError for SstableError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => io_error_kind(e),
            Self::Encoding(_) | Self::Corrupted(_) => ErrorKind::Corrupted,
            Self::UnsortedInput => ErrorKind::InvalidParam,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Block kinds and header
// ------------------------------------------------------------------------------------------------

/// Block type tags used in block headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Data,
    Index,
    Bloom,
}

impl BlockKind {
    pub(crate) fn as_u32(self) -> u32 {
        match self {
            Self::Data => 1,
            Self::Index => 2,
            Self::Bloom => 3,
        }
    }
}

/// 20-byte header preceding every block body.
///
/// `count` is the entry count for data and index blocks; for the
/// bloom block it is the reserved slot carrying the filter bit count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub(crate) kind: u32,
    pub(crate) count: u32,
    pub(crate) uncompressed: u32,
    pub(crate) compressed: u32,
    pub(crate) crc32: u32,
}

impl Encode for BlockHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.kind.encode_to(buf)?;
        self.count.encode_to(buf)?;
        self.uncompressed.encode_to(buf)?;
        self.compressed.encode_to(buf)?;
        self.crc32.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (kind, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (uncompressed, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (compressed, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (crc32, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                kind,
                count,
                uncompressed,
                compressed,
                crc32,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Index entries
// ------------------------------------------------------------------------------------------------

/// One index entry: the first key of a data block plus its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    /// Smallest key in the referenced block.
    pub(crate) key: Bytes,
    /// File offset of the block header.
    pub(crate) offset: u64,
    /// Full block size (header + body).
    pub(crate) size: u32,
    /// Sequence of the block's first entry.
    pub(crate) seq: u64,
}

impl IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        (self.key.len() as u32).encode_to(buf)?;
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        self.seq.encode_to(buf)?;
        buf.extend_from_slice(&self.key);
        Ok(())
    }

    fn decode_from(buf: &Bytes, at: usize) -> Result<(Self, usize), SstableError> {
        let mut off = at;
        let (key_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let key_len = key_len as usize;
        if buf.len() < off + key_len {
            return Err(SstableError::Corrupted("index entry key truncated".into()));
        }
        let key = buf.slice(off..off + key_len);
        off += key_len;
        Ok((
            Self {
                key,
                offset,
                size,
                seq,
            },
            off - at,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

/// Fixed-size footer at the end of every table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Footer {
    pub(crate) magic: u32,
    pub(crate) version: u32,
    pub(crate) index_offset: u64,
    pub(crate) index_size: u32,
    pub(crate) bloom_offset: u64,
    pub(crate) bloom_size: u32,
    pub(crate) min_seq: u64,
    pub(crate) max_seq: u64,
    pub(crate) entry_count: u64,
    pub(crate) crc32: u32,
}

impl Footer {
    /// Serializes the footer, computing the trailing CRC over the
    /// preceding bytes.
    pub(crate) fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.magic.encode_to(&mut buf)?;
        self.version.encode_to(&mut buf)?;
        self.index_offset.encode_to(&mut buf)?;
        self.index_size.encode_to(&mut buf)?;
        self.bloom_offset.encode_to(&mut buf)?;
        self.bloom_size.encode_to(&mut buf)?;
        self.min_seq.encode_to(&mut buf)?;
        self.max_seq.encode_to(&mut buf)?;
        self.entry_count.encode_to(&mut buf)?;

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        hasher.finalize().encode_to(&mut buf)?;
        Ok(buf)
    }

    /// Parses and CRC-verifies a footer from its on-disk bytes.
    pub(crate) fn decode(buf: &[u8]) -> Result<Self, SstableError> {
        if buf.len() != FOOTER_SIZE {
            return Err(SstableError::Corrupted(format!(
                "footer must be {FOOTER_SIZE} bytes, got {}",
                buf.len()
            )));
        }

        let mut off = 0;
        let (magic, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (index_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (index_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (bloom_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (bloom_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (min_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (entry_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (crc32, _) = u32::decode_from(&buf[off..])?;

        let mut hasher = Crc32::new();
        hasher.update(&buf[..FOOTER_SIZE - 4]);
        if hasher.finalize() != crc32 {
            return Err(SstableError::Corrupted("footer checksum mismatch".into()));
        }
        if magic != SST_MAGIC {
            return Err(SstableError::Corrupted(format!(
                "bad footer magic 0x{magic:08X}"
            )));
        }
        if version != SST_VERSION {
            return Err(SstableError::Corrupted(format!(
                "unsupported table version {version}"
            )));
        }

        Ok(Self {
            magic,
            version,
            index_offset,
            index_size,
            bloom_offset,
            bloom_size,
            min_seq,
            max_seq,
            entry_count,
            crc32,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Block reading
// ------------------------------------------------------------------------------------------------

/// Reads and CRC-verifies the block at `offset`, returning its header
/// and an owned copy of the body.
pub(crate) fn read_block(
    data: &[u8],
    offset: u64,
    expected_kind: BlockKind,
) -> Result<(BlockHeader, Bytes), SstableError> {
    let start = usize::try_from(offset)
        .map_err(|_| SstableError::Corrupted("block offset exceeds address space".into()))?;
    if data.len() < start + BLOCK_HEADER_SIZE {
        return Err(SstableError::Corrupted("block header out of range".into()));
    }

    let (header, _) = BlockHeader::decode_from(&data[start..start + BLOCK_HEADER_SIZE])?;
    if header.kind != expected_kind.as_u32() {
        return Err(SstableError::Corrupted(format!(
            "expected block kind {}, found {}",
            expected_kind.as_u32(),
            header.kind
        )));
    }

    let body_start = start + BLOCK_HEADER_SIZE;
    let body_len = header.uncompressed as usize;
    if data.len() < body_start + body_len {
        return Err(SstableError::Corrupted("block body out of range".into()));
    }

    let body = &data[body_start..body_start + body_len];
    let mut hasher = Crc32::new();
    hasher.update(body);
    if hasher.finalize() != header.crc32 {
        return Err(SstableError::Corrupted("block checksum mismatch".into()));
    }

    Ok((header, Bytes::copy_from_slice(body)))
}

/// Decodes the entries of a data-block body.
///
/// Returned keys and values are zero-copy slices of `body`.
pub(crate) fn decode_data_entries(
    body: &Bytes,
    expected: u32,
) -> Result<Vec<crate::types::Entry>, SstableError> {
    let mut entries = Vec::with_capacity(expected as usize);
    let mut off = 0;
    while off < body.len() {
        let (key_len, n) = u32::decode_from(&body[off..])?;
        off += n;
        let (value_len, n) = u32::decode_from(&body[off..])?;
        off += n;
        let (seq, n) = u64::decode_from(&body[off..])?;
        off += n;
        // A tombstone byte outside {0, 1} is corruption, surfaced by
        // the strict bool form.
        let (deleted, n) = bool::decode_from(&body[off..])?;
        off += n;

        let (key_len, value_len) = (key_len as usize, value_len as usize);
        if body.len() < off + key_len + value_len {
            return Err(SstableError::Corrupted("data entry truncated".into()));
        }
        let key = body.slice(off..off + key_len);
        off += key_len;
        let value = body.slice(off..off + value_len);
        off += value_len;

        entries.push(crate::types::Entry {
            key,
            value,
            seq,
            deleted,
        });
    }
    if entries.len() != expected as usize {
        return Err(SstableError::Corrupted(format!(
            "data block declared {expected} entries, decoded {}",
            entries.len()
        )));
    }
    Ok(entries)
}

// ------------------------------------------------------------------------------------------------
// TableReader
// ------------------------------------------------------------------------------------------------

/// Memory-mapped reader over one immutable table.
#[derive(Debug)]
pub struct TableReader {
    path: PathBuf,
    mmap: Mmap,
    footer: Footer,
    index: Vec<IndexEntry>,
    bloom: BloomFilter,
    first_key: Bytes,
    last_key: Bytes,
    file_size: u64,
}

impl TableReader {
    /// Opens a table: maps the file, verifies the footer, and loads
    /// the index and bloom blocks.
    ///
    /// # Safety
    ///
    /// Uses a read-only `Mmap` over a file that is never modified
    /// after `finalize`; all block boundaries are validated before
    /// slicing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SstableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FOOTER_SIZE {
            return Err(SstableError::Corrupted("file smaller than footer".into()));
        }
        let footer = Footer::decode(&mmap[mmap.len() - FOOTER_SIZE..])?;

        // Index block — an empty body (size 0) is legal.
        let (index_header, index_body) = read_block(&mmap, footer.index_offset, BlockKind::Index)?;
        if u64::from(index_header.uncompressed) + BLOCK_HEADER_SIZE as u64
            != u64::from(footer.index_size)
        {
            return Err(SstableError::Corrupted(
                "footer and index header disagree on size".into(),
            ));
        }
        let mut index = Vec::with_capacity(index_header.count as usize);
        let mut off = 0;
        while off < index_body.len() {
            let (entry, n) = IndexEntry::decode_from(&index_body, off)?;
            off += n;
            index.push(entry);
        }
        if index.len() != index_header.count as usize {
            return Err(SstableError::Corrupted(
                "index entry count mismatch".into(),
            ));
        }

        // Bloom block — the header count slot carries the bit count.
        let (bloom_header, bloom_body) = read_block(&mmap, footer.bloom_offset, BlockKind::Bloom)?;
        let bit_count = u64::from(bloom_header.count);
        if bit_count.div_ceil(8) != bloom_body.len() as u64 {
            return Err(SstableError::Corrupted(format!(
                "bloom bit count {bit_count} does not match {} body bytes",
                bloom_body.len()
            )));
        }
        let bloom = BloomFilter::from_bits(bloom_body.to_vec(), bit_count, footer.entry_count);

        // First/last key: first entry of the first block, last entry
        // of the last block.
        let (first_key, last_key) = match (index.first(), index.last()) {
            (Some(first), Some(last)) => {
                let first_key = first.key.clone();
                let (header, body) = read_block(&mmap, last.offset, BlockKind::Data)?;
                let entries = decode_data_entries(&body, header.count)?;
                let last_key = entries
                    .last()
                    .map(|e| e.key.clone())
                    .unwrap_or_else(Bytes::new);
                (first_key, last_key)
            }
            _ => (Bytes::new(), Bytes::new()),
        };

        debug!(
            path = %path.display(),
            entries = footer.entry_count,
            blocks = index.len(),
            "table opened"
        );

        Ok(Self {
            path,
            mmap,
            footer,
            index,
            bloom,
            first_key,
            last_key,
            file_size,
        })
    }

    /// Point lookup. Returns the stored version (tombstones included)
    /// or `None` when the table cannot contain the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Version>, SstableError> {
        if self.index.is_empty() || !self.bloom.may_contain(key) {
            return Ok(None);
        }

        // Last index entry whose first key is <= the target.
        let pp = self.index.partition_point(|e| e.key.as_ref() <= key);
        if pp == 0 {
            return Ok(None);
        }
        let slot = &self.index[pp - 1];

        let (header, body) = read_block(&self.mmap, slot.offset, BlockKind::Data)?;
        let entries = decode_data_entries(&body, header.count)?;
        for entry in entries {
            match entry.key.as_ref().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(Version::of(&entry))),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Bloom membership test without touching data blocks.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom.may_contain(key)
    }

    /// Total entries, from the footer.
    pub fn entry_count(&self) -> u64 {
        self.footer.entry_count
    }

    /// Lowest sequence in the table.
    pub fn min_seq(&self) -> u64 {
        self.footer.min_seq
    }

    /// Highest sequence in the table.
    pub fn max_seq(&self) -> u64 {
        self.footer.max_seq
    }

    /// Smallest key (empty for an empty table).
    pub fn first_key(&self) -> &Bytes {
        &self.first_key
    }

    /// Largest key (empty for an empty table).
    pub fn last_key(&self) -> &Bytes {
        &self.last_key
    }

    /// On-disk file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path this reader was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data blocks.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn mmap_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub(crate) fn index_entries(&self) -> &[IndexEntry] {
        &self.index
    }
}
