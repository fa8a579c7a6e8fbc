//! # Output Storage
//!
//! Everything newmonkey writes goes through an [`OutputRoot`]:
//!
//! - paths are validated so nothing escapes the root ([`validate_path`]),
//! - names are reserved atomically so concurrent writers never pick the same
//!   one ([`OutputRoot::reserve`]),
//! - files are written to a temporary sibling and renamed into place on
//!   [`PendingFile::commit`], so an abandoned write never leaves a truncated
//!   file behind.

pub mod error;
mod output;
mod path;

pub use crate::output::{OutputRoot, PendingFile, Reservation, disambiguate, write_all};
pub use crate::path::validate as validate_path;
