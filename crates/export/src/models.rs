//! Per-entry results.

use derive_more::Display;
use newmonkey_diskcache::EntryHash;
use std::path::PathBuf;

/// A file written to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub source_hash: EntryHash,
    /// Name picked from the URL, content type or hash, before disambiguation.
    pub suggested_name: String,
    /// Where the file ended up.
    pub final_path: PathBuf,
    /// `final_path` relative to the output root.
    pub relative_path: PathBuf,
    pub byte_size: u64,
    pub content_type: String,
    /// Set when the payload was written but not quite as intended, e.g. left
    /// encoded because no decoder could handle it.
    pub warning: Option<String>,
}

/// Why an entry was deliberately not exported.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Part of a sparse parent's payload; exported with the parent.
    #[display("sparse child")]
    SparseChild,
    /// The stored response is not a 2xx.
    #[display("HTTP status {_0}")]
    HttpStatus(u16),
    #[display("empty payload")]
    Empty,
    /// Excluded by the content-type filter.
    #[display("content type {_0} not selected")]
    ContentType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Extracted(ExtractedFile),
    Skipped(SkipReason),
    /// The entry could not be exported; the message says why.
    Failed(String),
}

/// What happened to one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    /// `None` when the index itself couldn't say which entry this was.
    pub hash: Option<EntryHash>,
    /// `None` when the entry failed before its key was read.
    pub url: Option<String>,
    pub outcome: Outcome,
}

impl EntryReport {
    pub(crate) fn failed(hash: Option<EntryHash>, url: Option<String>, reason: impl Into<String>) -> Self {
        Self { hash, url, outcome: Outcome::Failed(reason.into()) }
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self.outcome, Outcome::Extracted(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    pub fn extracted(&self) -> Option<&ExtractedFile> {
        match &self.outcome {
            Outcome::Extracted(file) => Some(file),
            _ => None,
        }
    }
}
