//! Disk Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Whether an error is fatal depends on *where* it is raised, not on its
//! kind: a [`Format`](ErrorKind::Format) error on the index header aborts the
//! run, the same kind on a single entry record only fails that entry.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A disk cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for disk cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A cache file could not be opened or read.
    #[display("cannot read {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// A header or record violates the structure of the format (bad magic,
    /// unknown version, declared lengths beyond the record).
    #[display("malformed cache data: {_0}")]
    Format(#[error(not(source))] String),
    /// The structure is fine but the content doesn't add up (checksum
    /// mismatch, block range past the end of a file, missing storage).
    #[display("corrupted cache data: {_0}")]
    Corruption(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // The cache may still be in use by the application that owns it.
        matches!(self, Self::Io(_))
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption(message.into())
    }
}
