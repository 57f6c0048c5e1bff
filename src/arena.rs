//! Block arena backing memtable entry storage.
//!
//! The arena copies caller bytes into large shared blocks and hands
//! back [`Bytes`] handles that alias the block allocation, so a
//! memtable's keys and values share a handful of heap regions instead
//! of one allocation per entry. Freeing is wholesale: dropping the
//! arena together with all outstanding handles releases the blocks.
//!
//! Statistics are tracked per power-of-two size class, which is what
//! the memtable reports through `memory_usage`.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

/// Default size of one arena block.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Number of power-of-two size classes tracked by [`ArenaStats`].
/// Class `i` covers allocations in `(2^(i-1), 2^i]`; class 0 covers
/// zero- and one-byte allocations.
pub const SIZE_CLASS_COUNT: usize = 32;

/// Allocation statistics for one arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaStats {
    /// Total bytes handed out to callers.
    pub allocated_bytes: usize,

    /// Total bytes reserved from the allocator (block capacity).
    pub reserved_bytes: usize,

    /// Number of blocks created.
    pub block_count: usize,

    /// Number of allocations served.
    pub alloc_count: u64,

    /// Allocation counts per power-of-two size class.
    pub size_class_counts: [u64; SIZE_CLASS_COUNT],
}

impl Default for ArenaStats {
    fn default() -> Self {
        Self {
            allocated_bytes: 0,
            reserved_bytes: 0,
            block_count: 0,
            alloc_count: 0,
            size_class_counts: [0; SIZE_CLASS_COUNT],
        }
    }
}

impl ArenaStats {
    fn record(&mut self, len: usize) {
        self.allocated_bytes += len;
        self.alloc_count += 1;
        self.size_class_counts[size_class(len)] += 1;
    }
}

/// Size class index for an allocation of `len` bytes.
fn size_class(len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let bits = usize::BITS - (len - 1).leading_zeros();
    (bits as usize).min(SIZE_CLASS_COUNT - 1)
}

struct ArenaInner {
    /// Spare capacity of the current block. Always logically empty:
    /// each allocation writes into it and immediately splits the
    /// written prefix off as a frozen handle.
    current: BytesMut,
    stats: ArenaStats,
    block_size: usize,
}

/// Append-only byte arena handing out [`Bytes`] slices.
pub struct Arena {
    inner: Mutex<ArenaInner>,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    /// Creates an arena with the default block size.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Creates an arena whose blocks hold `block_size` bytes each.
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            inner: Mutex::new(ArenaInner {
                current: BytesMut::new(),
                stats: ArenaStats::default(),
                block_size: block_size.max(1),
            }),
        }
    }

    /// Copies `data` into the arena and returns a handle aliasing the
    /// backing block.
    ///
    /// Allocations larger than the block size get a dedicated block.
    pub fn alloc(&self, data: &[u8]) -> Bytes {
        let mut inner = self.inner.lock();

        if data.len() > inner.block_size {
            inner.stats.reserved_bytes += data.len();
            inner.stats.block_count += 1;
            inner.stats.record(data.len());
            return Bytes::copy_from_slice(data);
        }

        if inner.current.capacity() < data.len() {
            let block_size = inner.block_size;
            inner.current = BytesMut::with_capacity(block_size);
            inner.stats.reserved_bytes += block_size;
            inner.stats.block_count += 1;
        }

        inner.current.extend_from_slice(data);
        let piece = inner.current.split_to(data.len());
        inner.stats.record(data.len());
        piece.freeze()
    }

    /// Snapshot of the allocation statistics.
    pub fn stats(&self) -> ArenaStats {
        self.inner.lock().stats.clone()
    }
}
