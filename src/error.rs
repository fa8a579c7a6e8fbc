//! Run-scoped failures: the only errors that make newmonkey exit non-zero.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("{_0}")]
    Config(#[error(not(source))] String),
    #[display("cannot find Discord's cache directory, pass it with --discord-cache-dir")]
    NoCache,
    #[display("{_0}")]
    Export(#[error(not(source))] String),
}

pub fn config(err: newmonkey_config::error::Error) -> Error {
    let message = (*err).to_string();
    err.raise(ErrorKind::Config(message))
}

pub fn export(err: newmonkey_export::error::Error) -> Error {
    let message = (*err).to_string();
    err.raise(ErrorKind::Export(message))
}
