//! Write-Ahead Logging (WAL) Module
//!
//! Durable, append-only record stream capturing every mutation before
//! it enters the memtable. Replay after a crash reconstructs the
//! active memtable state exactly.
//!
//! # On-disk layout
//!
//! A WAL is a directory of segment files `wal-<seq:06>.log`. Each
//! segment is a bare sequence of records (no segment header):
//!
//! ```text
//! [type u32][seq u64][timestamp u64][key_len u32][value_len u32][crc32 u32][key][value]
//! ```
//!
//! The CRC32 covers the five leading header fields plus the key and
//! value payload. All integers are little-endian.
//!
//! # Durability & recovery
//!
//! - With `sync_writes` every append is fsynced before it returns;
//!   otherwise data reaches the OS on append and stable storage on
//!   rotation, checkpoint, and drop.
//! - A partial record at the end of a segment is a clean EOF (the
//!   crash interrupted an append that was never acknowledged).
//! - A CRC mismatch mid-stream stops replay at the prior record.
//! - A `Checkpoint` record marks everything before it as flushed;
//!   segments older than the segment holding the latest checkpoint
//!   can be unlinked.
//!
//! # Concurrency model
//!
//! The active segment handle lives behind a mutex; appends are atomic
//! from the caller's perspective. Replay happens before the tree goes
//! live, so it never races appenders.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crc32fast::Hasher as Crc32;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::encoding::{Decode, EncodingError};
use crate::error::{ErrorKind, KindError, io_error_kind};

/// Fixed record header size: `type + seq + timestamp + key_len +
/// value_len + crc`.
pub const RECORD_HEADER_SIZE: usize = 4 + 8 + 8 + 4 + 4 + 4;

/// Upper bound on one record's payload, guarding replay against
/// corrupted length fields (largest legal key + value plus slack).
pub const MAX_RECORD_PAYLOAD: usize = (64 + 16 * 1024) * 1024 + 4096;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Data integrity failure — checksum did not match.
    #[error("checksum mismatch in {segment} at offset {offset}")]
    ChecksumMismatch {
        /// Segment file name.
        segment: String,
        /// Byte offset of the corrupt record.
        offset: u64,
    },

    /// A record declared a payload beyond [`MAX_RECORD_PAYLOAD`].
    #[error("record payload of {0} bytes exceeds limit")]
    RecordTooLarge(usize),

    /// A record carried an unknown type tag.
    #[error("unknown record type {0}")]
    UnknownRecordType(u32),

    /// Wire-format decode failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

impl KindError for WalError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => io_error_kind(e),
            Self::ChecksumMismatch { .. } | Self::UnknownRecordType(_) | Self::Encoding(_) => {
                ErrorKind::Corrupted
            }
            Self::RecordTooLarge(_) => ErrorKind::InvalidParam,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// Kind of one WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecordType {
    /// A key/value insert or update.
    Put,
    /// A point tombstone.
    Delete,
    /// Everything before this record is durable in SSTables.
    Checkpoint,
    /// Transaction commit boundary (reserved).
    Commit,
}

impl WalRecordType {
    fn as_u32(self) -> u32 {
        match self {
            Self::Put => 1,
            Self::Delete => 2,
            Self::Checkpoint => 3,
            Self::Commit => 4,
        }
    }

    fn from_u32(tag: u32) -> Result<Self, WalError> {
        match tag {
            1 => Ok(Self::Put),
            2 => Ok(Self::Delete),
            3 => Ok(Self::Checkpoint),
            4 => Ok(Self::Commit),
            other => Err(WalError::UnknownRecordType(other)),
        }
    }
}

/// One logical WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Record kind.
    pub record_type: WalRecordType,
    /// Sequence number of the mutation (checkpoint: flushed-through
    /// sequence).
    pub seq: u64,
    /// Wall-clock nanoseconds since the UNIX epoch.
    pub timestamp: u64,
    /// Key bytes; empty for checkpoint/commit records.
    pub key: Vec<u8>,
    /// Value bytes; empty for tombstones and markers.
    pub value: Vec<u8>,
}

impl WalRecord {
    /// Builds a put record.
    pub fn put(seq: u64, key: &[u8], value: &[u8]) -> Self {
        Self {
            record_type: WalRecordType::Put,
            seq,
            timestamp: now_nanos(),
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    /// Builds a tombstone record.
    pub fn delete(seq: u64, key: &[u8]) -> Self {
        Self {
            record_type: WalRecordType::Delete,
            seq,
            timestamp: now_nanos(),
            key: key.to_vec(),
            value: Vec::new(),
        }
    }

    /// Builds a checkpoint record covering everything up to `seq`.
    pub fn checkpoint(seq: u64) -> Self {
        Self {
            record_type: WalRecordType::Checkpoint,
            seq,
            timestamp: now_nanos(),
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Builds a commit-boundary record (reserved).
    pub fn commit(seq: u64) -> Self {
        Self {
            record_type: WalRecordType::Commit,
            seq,
            timestamp: now_nanos(),
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Total encoded size of this record.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.key.len() + self.value.len()
    }

    /// Serializes the record, computing and splicing the CRC.
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.record_type.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        hasher.update(&self.key);
        hasher.update(&self.value);
        let crc = hasher.finalize();

        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }
}

/// Current wall-clock time in nanoseconds since the UNIX epoch.
fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

// ------------------------------------------------------------------------------------------------
// Wal
// ------------------------------------------------------------------------------------------------

struct WalInner {
    file: File,
    segment_seq: u64,
    written: u64,
    /// Segment holding the most recent checkpoint record.
    checkpoint_segment: Option<u64>,
}

/// Segmented write-ahead log rooted at one directory.
pub struct Wal {
    dir: PathBuf,
    size_limit: u64,
    sync_writes: bool,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Opens (or creates) a WAL in `dir`, continuing the highest
    /// existing segment.
    pub fn open(dir: impl AsRef<Path>, size_limit: u64, sync_writes: bool) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut segments = list_segments(&dir)?;
        segments.sort_unstable();
        let segment_seq = segments.last().copied().unwrap_or(0);

        let path = segment_path(&dir, segment_seq);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let written = file.metadata()?.len();

        info!(path = %path.display(), segment = segment_seq, written, "WAL opened");

        Ok(Self {
            dir,
            size_limit: size_limit.max(1),
            sync_writes,
            inner: Mutex::new(WalInner {
                file,
                segment_seq,
                written,
                checkpoint_segment: None,
            }),
        })
    }

    /// Appends one record, rotating the segment first when the size
    /// limit would be crossed.
    pub fn append(&self, record: &WalRecord) -> Result<(), WalError> {
        let payload = record.key.len() + record.value.len();
        if payload > MAX_RECORD_PAYLOAD {
            return Err(WalError::RecordTooLarge(payload));
        }

        let bytes = record.encode();
        let mut inner = self.inner.lock();

        if inner.written > 0 && inner.written + bytes.len() as u64 > self.size_limit {
            self.rotate_locked(&mut inner)?;
        }

        inner.file.write_all(&bytes)?;
        inner.written += bytes.len() as u64;
        if self.sync_writes {
            inner.file.sync_all()?;
        }

        trace!(
            seq = record.seq,
            kind = ?record.record_type,
            len = bytes.len(),
            "WAL record appended"
        );

        if record.record_type == WalRecordType::Checkpoint {
            inner.checkpoint_segment = Some(inner.segment_seq);
        }
        Ok(())
    }

    /// Appends a checkpoint for `seq`, fsyncs, and unlinks segments
    /// older than the one holding the checkpoint.
    pub fn checkpoint(&self, seq: u64) -> Result<(), WalError> {
        self.append(&WalRecord::checkpoint(seq))?;
        self.sync()?;
        self.prune_obsolete()
    }

    /// Flushes the active segment to stable storage.
    pub fn sync(&self) -> Result<(), WalError> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    /// Starts a new segment, fsyncing the previous one first.
    pub fn rotate(&self) -> Result<u64, WalError> {
        let mut inner = self.inner.lock();
        self.rotate_locked(&mut inner)?;
        Ok(inner.segment_seq)
    }

    fn rotate_locked(&self, inner: &mut WalInner) -> Result<(), WalError> {
        inner.file.sync_all()?;
        let next = inner.segment_seq + 1;
        let path = segment_path(&self.dir, next);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        debug!(segment = next, path = %path.display(), "WAL segment rotated");
        inner.file = file;
        inner.segment_seq = next;
        inner.written = 0;
        Ok(())
    }

    /// Unlinks every segment older than the one holding the latest
    /// checkpoint. A no-op when no checkpoint has been written.
    pub fn prune_obsolete(&self) -> Result<(), WalError> {
        let keep_from = match self.inner.lock().checkpoint_segment {
            Some(seg) => seg,
            None => return Ok(()),
        };
        for seg in list_segments(&self.dir)? {
            if seg < keep_from {
                let path = segment_path(&self.dir, seg);
                match fs::remove_file(&path) {
                    Ok(()) => debug!(segment = seg, "WAL segment pruned"),
                    Err(e) => warn!(segment = seg, error = %e, "failed to prune WAL segment"),
                }
            }
        }
        Ok(())
    }

    /// Replays every decodable record, segments in ascending order.
    ///
    /// A truncated record at a segment tail is treated as a clean EOF.
    /// A checksum mismatch stops the whole replay at the prior record
    /// (later data may depend on the lost record).
    pub fn replay(&self) -> Result<Vec<WalRecord>, WalError> {
        let mut segments = list_segments(&self.dir)?;
        segments.sort_unstable();

        let mut records = Vec::new();
        'segments: for seg in segments {
            let path = segment_path(&self.dir, seg);
            let mut file = File::open(&path)?;
            let mut offset = 0u64;
            loop {
                match read_record(&mut file, &path, offset) {
                    Ok(Some((record, len))) => {
                        offset += len;
                        if record.record_type == WalRecordType::Checkpoint {
                            self.inner.lock().checkpoint_segment = Some(seg);
                        }
                        records.push(record);
                    }
                    Ok(None) => break, // clean EOF or truncated tail
                    Err(WalError::ChecksumMismatch { segment, offset }) => {
                        warn!(%segment, offset, "WAL checksum mismatch, truncating replay");
                        break 'segments;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        debug!(count = records.len(), "WAL replay finished");
        Ok(records)
    }

    /// Active segment sequence number.
    pub fn active_segment(&self) -> u64 {
        self.inner.lock().segment_seq
    }

    /// Bytes written to the active segment.
    pub fn active_segment_size(&self) -> u64 {
        self.inner.lock().written
    }

    /// Segment sequence numbers currently on disk, ascending.
    pub fn segments(&self) -> Result<Vec<u64>, WalError> {
        let mut segments = list_segments(&self.dir)?;
        segments.sort_unstable();
        Ok(segments)
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.inner.lock().file.sync_all() {
            error!(dir = %self.dir.display(), error = %e, "WAL sync failed on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Segment helpers
// ------------------------------------------------------------------------------------------------

fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("wal-{seq:06}.log"))
}

/// Parses `wal-<seq>.log` names, ignoring anything else in the
/// directory.
fn parse_segment_name(name: &OsStr) -> Option<u64> {
    let name = name.to_str()?;
    name.strip_prefix("wal-")?
        .strip_suffix(".log")?
        .parse::<u64>()
        .ok()
}

fn list_segments(dir: &Path) -> Result<Vec<u64>, WalError> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(seq) = parse_segment_name(&entry.file_name()) {
            segments.push(seq);
        }
    }
    Ok(segments)
}

// ------------------------------------------------------------------------------------------------
// Record I/O
// ------------------------------------------------------------------------------------------------

/// Reads one record at the current position.
///
/// Returns `Ok(None)` on clean EOF *or* a truncated trailing record;
/// the distinction does not matter to replay — an unfinished append
/// was never acknowledged.
fn read_record(
    file: &mut File,
    path: &Path,
    offset: u64,
) -> Result<Option<(WalRecord, u64)>, WalError> {
    let mut header = [0u8; RECORD_HEADER_SIZE];
    match read_exact_or_eof(file, &mut header)? {
        ReadOutcome::Full => {}
        ReadOutcome::Eof => return Ok(None),
        ReadOutcome::Partial => {
            trace!(path = %path.display(), offset, "partial record header at WAL tail");
            return Ok(None);
        }
    }

    let mut cursor = 0;
    let (type_tag, n) = u32::decode_from(&header[cursor..])?;
    cursor += n;
    let (seq, n) = u64::decode_from(&header[cursor..])?;
    cursor += n;
    let (timestamp, n) = u64::decode_from(&header[cursor..])?;
    cursor += n;
    let (key_len, n) = u32::decode_from(&header[cursor..])?;
    cursor += n;
    let (value_len, n) = u32::decode_from(&header[cursor..])?;
    cursor += n;
    let (stored_crc, _) = u32::decode_from(&header[cursor..])?;
    let (key_len, value_len) = (key_len as usize, value_len as usize);

    if key_len + value_len > MAX_RECORD_PAYLOAD {
        // A length this absurd is corruption, not a legal record.
        return Err(WalError::ChecksumMismatch {
            segment: path.display().to_string(),
            offset,
        });
    }

    let mut payload = vec![0u8; key_len + value_len];
    match read_exact_or_eof(file, &mut payload)? {
        ReadOutcome::Full => {}
        ReadOutcome::Eof | ReadOutcome::Partial => {
            trace!(path = %path.display(), offset, "partial record payload at WAL tail");
            return Ok(None);
        }
    }

    let mut hasher = Crc32::new();
    hasher.update(&header[..RECORD_HEADER_SIZE - 4]);
    hasher.update(&payload);
    if hasher.finalize() != stored_crc {
        return Err(WalError::ChecksumMismatch {
            segment: path.display().to_string(),
            offset,
        });
    }

    let value = payload.split_off(key_len);
    let record = WalRecord {
        record_type: WalRecordType::from_u32(type_tag)?,
        seq,
        timestamp,
        key: payload,
        value,
    };
    let len = (RECORD_HEADER_SIZE + key_len + value_len) as u64;
    Ok(Some((record, len)))
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// `read_exact` that distinguishes "no bytes at all" from "some but
/// not enough".
fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<ReadOutcome, WalError> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WalError::Io(e)),
        }
    }
    Ok(ReadOutcome::Full)
}
