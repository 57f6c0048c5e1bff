//! Crate-wide error base.
//!
//! Every fallible operation in ConcordKV reports one kind from the
//! closed [`ErrorKind`] set. Subsystems keep their own `thiserror`
//! enums (richer context, `#[from]` chaining) and map into a kind via
//! [`KindError::kind`]; callers that only care about the class of a
//! failure match on the kind, callers that need detail format the
//! error itself.
//!
//! There is no process-wide "last error" slot: errors are structured
//! values that travel with `?`, and diagnostics go through `tracing`.

use thiserror::Error;

/// The closed set of error kinds surfaced across the public API.
///
/// Classes (see [`ErrorKind::is_transient`] and friends):
///
/// - transient — retry may succeed (`Busy`, `Timeout`, `LockFailure`)
/// - structural — the operation can never succeed as issued
///   (`Corrupted`, `InvalidParam`)
/// - resource — pressure must clear first (`OutOfMemory`, `DiskFull`)
/// - data — normal control flow, not logged (`NotFound`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An argument was empty, out of range, or malformed.
    InvalidParam,
    /// An allocation was refused or a memory budget was exhausted.
    OutOfMemory,
    /// An underlying I/O operation failed.
    Io,
    /// The key does not exist (or is shadowed by a tombstone).
    NotFound,
    /// The key or resource already exists.
    AlreadyExists,
    /// A deadline elapsed while waiting for a lock or condition.
    Timeout,
    /// A lock could not be acquired (poisoned or detector-aborted).
    LockFailure,
    /// The component is busy; the caller may retry.
    Busy,
    /// The engine does not implement this optional operation.
    NotSupported,
    /// On-disk or in-memory state failed an integrity check.
    Corrupted,
    /// The filesystem reported no space left.
    DiskFull,
    /// A transactional operation conflicted with another.
    TransactionConflict,
    /// The enclosing transaction was aborted.
    TransactionAborted,
    /// The operation is declared but not implemented.
    NotImplemented,
    /// A compaction task failed; the scheduler stays up.
    CompactionFailed,
}

impl ErrorKind {
    /// True for failures a caller may simply retry.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Busy | Self::Timeout | Self::LockFailure)
    }

    /// True for failures caused by resource pressure; the LSM refuses
    /// further writes until the pressure clears.
    pub fn is_resource(self) -> bool {
        matches!(self, Self::OutOfMemory | Self::DiskFull)
    }

    /// Stable lowercase name, used by metrics labels and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParam => "invalid_param",
            Self::OutOfMemory => "out_of_memory",
            Self::Io => "io_error",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Timeout => "timeout",
            Self::LockFailure => "lock_failure",
            Self::Busy => "busy",
            Self::NotSupported => "not_supported",
            Self::Corrupted => "corrupted",
            Self::DiskFull => "disk_full",
            Self::TransactionConflict => "transaction_conflict",
            Self::TransactionAborted => "transaction_aborted",
            Self::NotImplemented => "not_implemented",
            Self::CompactionFailed => "compaction_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every subsystem error enum so callers can collapse
/// rich errors into the closed [`ErrorKind`] set.
pub trait KindError {
    /// The kind this error surfaces as.
    fn kind(&self) -> ErrorKind;
}

/// Maps an [`std::io::Error`] onto the closed kind set.
///
/// `StorageFull`/`QuotaExceeded` become [`ErrorKind::DiskFull`] so the
/// write gate can distinguish disk pressure from ordinary I/O faults.
pub fn io_error_kind(err: &std::io::Error) -> ErrorKind {
    match err.kind() {
        std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => ErrorKind::DiskFull,
        std::io::ErrorKind::OutOfMemory => ErrorKind::OutOfMemory,
        _ => ErrorKind::Io,
    }
}

/// Top-level error for the public engine surface.
///
/// Subsystem errors convert into this with `#[from]`; the original
/// error is preserved as the source for diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure that is fully described by its kind and message.
    #[error("{kind}: {message}")]
    Op {
        /// The kind of failure.
        kind: ErrorKind,
        /// Human-readable context.
        message: String,
    },
}

impl Error {
    /// Builds an error from a kind and message.
    pub fn op(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Op {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`ErrorKind::InvalidParam`].
    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::op(ErrorKind::InvalidParam, message)
    }

    /// Shorthand for [`ErrorKind::NotSupported`].
    pub fn not_supported(op_name: &str) -> Self {
        Self::op(ErrorKind::NotSupported, op_name)
    }
}

impl KindError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => io_error_kind(e),
            Self::Op { kind, .. } => *kind,
        }
    }
}

/// Crate-wide result alias for the public surface.
pub type Result<T> = std::result::Result<T, Error>;
