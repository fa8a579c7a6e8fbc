//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An explicitly requested configuration file does not exist.
    #[display("configuration file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// A layer could not be parsed or has values of the wrong type.
    #[display("cannot load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// Values parse but make no sense together.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
}

impl ErrorKind {
    /// Configuration errors need the user to fix something first.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
