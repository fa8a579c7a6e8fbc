//! End-of-run aggregate.

use crate::models::{EntryReport, Outcome, SkipReason};
use crate::naming;
use newmonkey_diskcache::EntryHash;
use std::collections::BTreeMap;

/// An entry that could not be exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub hash: Option<EntryHash>,
    pub url: Option<String>,
    pub reason: String,
}

/// Totals for a run.
///
/// Built by a single aggregator as reports stream in, so it needs no
/// locking. Per-type and per-host counts only cover extracted files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub extracted: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Extracted files that carry a warning.
    pub warnings: u64,
    /// Bytes written across all extracted files.
    pub bytes: u64,
    pub failures: Vec<Failure>,
    pub content_types: BTreeMap<String, u64>,
    pub hosts: BTreeMap<String, u64>,
    pub skip_reasons: BTreeMap<String, u64>,
    /// The run was stopped before every entry was dispatched.
    pub cancelled: bool,
}

impl Summary {
    pub fn record(&mut self, report: &EntryReport) {
        match &report.outcome {
            Outcome::Extracted(file) => {
                self.extracted += 1;
                self.bytes += file.byte_size;
                if file.warning.is_some() {
                    self.warnings += 1;
                }
                *self.content_types.entry(file.content_type.clone()).or_default() += 1;
                let host = report.url.as_deref().and_then(naming::host).unwrap_or_else(|| "(none)".to_string());
                *self.hosts.entry(host).or_default() += 1;
            },
            Outcome::Skipped(reason) => {
                self.skipped += 1;
                // Group by kind, not by the exact status or type.
                let key = match reason {
                    SkipReason::HttpStatus(_) => "HTTP status",
                    SkipReason::ContentType(_) => "content type",
                    SkipReason::SparseChild => "sparse child",
                    SkipReason::Empty => "empty payload",
                };
                *self.skip_reasons.entry(key.to_string()).or_default() += 1;
            },
            Outcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push(Failure { hash: report.hash, url: report.url.clone(), reason: reason.clone() });
            },
        }
    }

    /// Entries accounted for.
    pub fn total(&self) -> u64 {
        self.extracted + self.skipped + self.failed
    }
}
