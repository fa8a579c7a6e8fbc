//! Export Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Only [`CacheRoot`](ErrorKind::CacheRoot) and
//! [`OutputRoot`](ErrorKind::OutputRoot) ever end a run. Everything else is
//! scoped to one entry and ends up as a [`Failed`](crate::Outcome::Failed)
//! outcome.

use derive_more::{Display, Error};
use newmonkey_diskcache::error::{Error as CacheError, ErrorKind as CacheErrorKind};
use newmonkey_storage::error::Error as StorageError;
use std::path::PathBuf;

/// An export error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The cache directory is missing, unreadable, or not a Chromium cache.
    #[display("cannot open cache at {}", _0.display())]
    CacheRoot(#[error(not(source))] PathBuf),
    /// The output directory can't be created or written to.
    #[display("cannot open output directory {}", _0.display())]
    OutputRoot(#[error(not(source))] PathBuf),
    /// An entry could not be read from the cache.
    #[display("{_0}")]
    Cache(#[error(not(source))] CacheErrorKind),
    /// The payload stream broke off.
    #[display("cannot read payload: {_0}")]
    Payload(#[error(not(source))] String),
    /// The extracted file could not be written.
    #[display("cannot write output: {_0}")]
    Output(#[error(not(source))] String),
    /// A content-type filter pattern isn't of the form `type/subtype`.
    #[display("invalid content type pattern: {_0:?}")]
    Pattern(#[error(not(source))] String),
    #[display("unknown layout: {_0:?}")]
    Layout(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cache(kind) => kind.is_retryable(),
            Self::Output(_) => true,
            _ => false,
        }
    }

    /// Wrap a cache error, keeping its frame as a child in the error tree.
    #[track_caller]
    pub(crate) fn cache(err: CacheError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Cache(inner))
    }

    #[track_caller]
    pub(crate) fn output(err: StorageError) -> Error {
        let reason = (*err).to_string();
        err.raise(ErrorKind::Output(reason))
    }

    #[track_caller]
    pub(crate) fn payload(err: std::io::Error) -> Error {
        Error::from(ErrorKind::Payload(err.to_string()))
    }
}
