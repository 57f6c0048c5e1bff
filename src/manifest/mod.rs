//! # Manifest Component
//!
//! Durable snapshot of the tree's structural state: manifest version,
//! next file id, active memtable identifier, and per-level file
//! counts.
//!
//! # On-disk layout (little-endian)
//!
//! ```text
//! [version u64][next_file_id u64][active_memtable_id 32 bytes]
//! [file_count u32 x MAX_LEVELS][crc32 u32]
//! ```
//!
//! The file is replaced atomically: write `MANIFEST.tmp`, fsync,
//! rename to `MANIFEST`, fsync the directory. A crash leaves either
//! the old or the new snapshot, never a torn one.
//!
//! Level **membership** is deliberately not stored — table file names
//! embed `(level, file_id)`, so recovery re-derives membership from
//! the directory and cross-checks it against the stored counts (a
//! mismatch is logged, not fatal: the filesystem is the source of
//! truth for membership, the manifest for ids and versioning).

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::MAX_LEVELS;
use crate::encoding::{Decode, Encode, EncodingError};
use crate::error::{ErrorKind, KindError, io_error_kind};

/// Snapshot file name.
pub const MANIFEST_FILE: &str = "MANIFEST";

const TMP_SUFFIX: &str = ".tmp";

/// Encoded snapshot size: `version + next_file_id + memtable id +
/// counts + crc`.
pub const MANIFEST_SIZE: usize = 8 + 8 + 32 + 4 * MAX_LEVELS + 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Wire-format decode failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The snapshot failed an integrity check.
    #[error("corrupted manifest: {0}")]
    Corrupted(String),
}

impl KindError for ManifestError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => io_error_kind(e),
            Self::Encoding(_) | Self::Corrupted(_) => ErrorKind::Corrupted,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshot state
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestState {
    version: u64,
    next_file_id: u64,
    active_memtable_id: [u8; 32],
    file_counts: [u32; MAX_LEVELS],
}

impl Default for ManifestState {
    fn default() -> Self {
        Self {
            version: 0,
            next_file_id: 1,
            active_memtable_id: [0; 32],
            file_counts: [0; MAX_LEVELS],
        }
    }
}

impl ManifestState {
    fn encode(&self) -> Result<Vec<u8>, ManifestError> {
        let mut buf = Vec::with_capacity(MANIFEST_SIZE);
        self.version.encode_to(&mut buf)?;
        self.next_file_id.encode_to(&mut buf)?;
        self.active_memtable_id.encode_to(&mut buf)?;
        for count in &self.file_counts {
            count.encode_to(&mut buf)?;
        }
        let mut hasher = Crc32::new();
        hasher.update(&buf);
        hasher.finalize().encode_to(&mut buf)?;
        Ok(buf)
    }

    fn decode(buf: &[u8]) -> Result<Self, ManifestError> {
        if buf.len() != MANIFEST_SIZE {
            return Err(ManifestError::Corrupted(format!(
                "snapshot must be {MANIFEST_SIZE} bytes, got {}",
                buf.len()
            )));
        }

        let mut off = 0;
        let (version, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (next_file_id, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (active_memtable_id, n) = <[u8; 32]>::decode_from(&buf[off..])?;
        off += n;
        let mut file_counts = [0u32; MAX_LEVELS];
        for slot in &mut file_counts {
            let (count, n) = u32::decode_from(&buf[off..])?;
            off += n;
            *slot = count;
        }
        let (stored_crc, _) = u32::decode_from(&buf[off..])?;

        let mut hasher = Crc32::new();
        hasher.update(&buf[..MANIFEST_SIZE - 4]);
        if hasher.finalize() != stored_crc {
            return Err(ManifestError::Corrupted("snapshot checksum mismatch".into()));
        }

        Ok(Self {
            version,
            next_file_id,
            active_memtable_id,
            file_counts,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest
// ------------------------------------------------------------------------------------------------

/// Handle to the durable manifest in one data directory.
pub struct Manifest {
    dir: PathBuf,
    state: Mutex<ManifestState>,
}

impl Manifest {
    /// Opens the manifest under `dir`, loading the snapshot when one
    /// exists.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let path = dir.join(MANIFEST_FILE);
        let state = if path.exists() {
            let mut buf = Vec::new();
            File::open(&path)?.read_to_end(&mut buf)?;
            let state = ManifestState::decode(&buf)?;
            info!(
                version = state.version,
                next_file_id = state.next_file_id,
                "manifest loaded"
            );
            state
        } else {
            debug!(dir = %dir.display(), "no manifest, starting fresh");
            ManifestState::default()
        };

        Ok(Self {
            dir,
            state: Mutex::new(state),
        })
    }

    /// Persists the snapshot: bump the version, write to a temp file,
    /// fsync, rename into place, fsync the directory.
    pub fn save(&self) -> Result<(), ManifestError> {
        let encoded = {
            let mut state = self.state.lock();
            state.version += 1;
            state.encode()?
        };

        let final_path = self.dir.join(MANIFEST_FILE);
        let tmp_path = self.dir.join(format!("{MANIFEST_FILE}{TMP_SUFFIX}"));

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;
        if let Ok(dir) = File::open(&self.dir) {
            dir.sync_all()?;
        }

        debug!(version = self.version(), "manifest saved");
        Ok(())
    }

    /// Allocates the next unique table file id.
    pub fn allocate_file_id(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_file_id;
        state.next_file_id += 1;
        id
    }

    /// Raises `next_file_id` to at least `floor` (used after recovery
    /// discovers files the last snapshot never recorded).
    pub fn ensure_next_file_id(&self, floor: u64) {
        let mut state = self.state.lock();
        if state.next_file_id < floor {
            state.next_file_id = floor;
        }
    }

    /// Records the active memtable identifier.
    pub fn set_active_memtable(&self, id: u64) {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&id.to_le_bytes());
        self.state.lock().active_memtable_id = bytes;
    }

    /// The recorded active memtable identifier.
    pub fn active_memtable(&self) -> u64 {
        let bytes = self.state.lock().active_memtable_id;
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(id)
    }

    /// Records the per-level file counts.
    pub fn set_file_counts(&self, counts: [u32; MAX_LEVELS]) {
        self.state.lock().file_counts = counts;
    }

    /// The recorded per-level file counts.
    pub fn file_counts(&self) -> [u32; MAX_LEVELS] {
        self.state.lock().file_counts
    }

    /// Monotonic snapshot version.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Next file id that would be allocated.
    pub fn next_file_id(&self) -> u64 {
        self.state.lock().next_file_id
    }
}
