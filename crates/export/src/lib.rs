//! # Cache Export
//!
//! Turns the entries of a Chromium disk cache into plain files: each payload
//! has its content encoding undone, gets a content type (declared or
//! sniffed), a safe file name derived from its URL, and is written
//! atomically under the output root.
//!
//! [`Exporter::run`] drives the whole thing as a stream of [`ExportEvent`]s,
//! processing entries concurrently and finishing with a [`Summary`]. A single
//! broken entry never ends a run; only failing to open the cache or the
//! output directory does.

pub mod error;
mod entry;
pub mod mime;
mod models;
pub mod naming;
mod options;
mod payload;
mod stream;
mod summary;

pub use crate::models::{EntryReport, ExtractedFile, Outcome, SkipReason};
pub use crate::options::{ContentTypeFilter, Layout, MimePattern, Options, default_workers};
pub use crate::stream::{ExportEvent, Exporter};
pub use crate::summary::{Failure, Summary};
