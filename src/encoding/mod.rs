//! Wire primitives for ConcordKV's persisted structures.
//!
//! Everything this crate writes to disk — WAL records, SSTable block
//! headers, index entries, footers, the manifest snapshot — is
//! assembled from a small set of fixed-width little-endian fields.
//! [`Encode`] and [`Decode`] pin those fields in-crate: the
//! durability formats answer to this module alone, so no dependency
//! upgrade can move a byte under a CRC.
//!
//! # Forms
//!
//! All fields are fixed-width (little-endian where multi-byte):
//!
//! - `u32` — four bytes (lengths, tags, CRCs)
//! - `u64` — eight bytes (offsets, sequences, timestamps)
//! - `bool` — one byte, strictly `0x00` or `0x01` (tombstone flags)
//! - `[u8; N]` — `N` raw bytes (magic strings, fixed identifiers)
//!
//! There is deliberately no prefixed byte-string form: every
//! ConcordKV structure places its variable-length payloads (keys,
//! values, bit arrays) behind explicit length fields at fixed offsets
//! in its own layout, with bounds enforced by the owning format.
//!
//! # Contract
//!
//! Encoding is deterministic — equal values always produce equal
//! bytes, which the CRC layers above depend on. Decoding never
//! panics and never reads past the slice it was given; every failure
//! comes back as an [`EncodingError`]. `decode_from` reports how many
//! bytes it consumed so multi-field structures can walk a buffer with
//! a running offset.

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Why a wire field could not be read.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ended before the field did.
    #[error("wire data ends early: field wants {wanted} bytes, {remaining} remain")]
    Truncated {
        /// Bytes the field occupies.
        wanted: usize,
        /// Bytes actually left in the buffer.
        remaining: usize,
    },

    /// A boolean slot held something other than `0x00`/`0x01`.
    #[error("byte 0x{0:02X} is not a boolean")]
    NotABool(u8),
}

// ------------------------------------------------------------------------------------------------
// Traits
// ------------------------------------------------------------------------------------------------

/// Append `self`'s wire form to a buffer.
///
/// Deterministic by contract: the same value must always append the
/// same bytes, because checksums upstream are computed over the
/// output.
pub trait Encode {
    /// Append the wire form of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Read one value from the front of a slice.
///
/// On success returns the value and the number of bytes it occupied,
/// so callers decoding a multi-field structure advance a cursor field
/// by field.
pub trait Decode: Sized {
    /// Decode one value from `buf[0..]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

// ------------------------------------------------------------------------------------------------
// Fixed-width core
// ------------------------------------------------------------------------------------------------

/// Copies the leading `N` bytes of `buf` out as an array, or reports
/// how short the buffer fell. Every fixed-width decoder bottoms out
/// here.
#[inline]
fn take<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    match buf.get(..N) {
        Some(head) => {
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(head);
            Ok(bytes)
        }
        None => Err(EncodingError::Truncated {
            wanted: N,
            remaining: buf.len(),
        }),
    }
}

impl Encode for u32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((u32::from_le_bytes(take::<4>(buf)?), 4))
    }
}

impl Encode for u64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((u64::from_le_bytes(take::<8>(buf)?), 8))
    }
}

impl Encode for bool {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(u8::from(*self));
        Ok(())
    }
}

impl Decode for bool {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        match take::<1>(buf)? {
            [0x00] => Ok((false, 1)),
            [0x01] => Ok((true, 1)),
            [other] => Err(EncodingError::NotABool(other)),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((take::<N>(buf)?, N))
    }
}
