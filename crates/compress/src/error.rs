//! Compression Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A compression error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for compression operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failed to initialize an encoder/decoder for requested compression format.
    Encoder,
    /// Data is corrupt or malformed. Don't retry with the same input. Used for reading/decoding.
    #[display("invalid or corrupted data")]
    InvalidData,
    /// The encoding is not one we know how to decode (e.g. `compress`).
    #[display("unsupported encoding: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The encoding is supported but its feature is not enabled.
    #[display("disabled encoding: {_0}")]
    DisabledFormat(#[error(not(source))] String),
    /// An I/O operation failed. Used for writing/encoding.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }

    /// Returns `true` if the input should be kept as-is because no decoder
    /// exists for it (as opposed to the decoder choking on the input).
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ErrorKind::UnsupportedFormat(_) | ErrorKind::DisabledFormat(_))
    }
}
