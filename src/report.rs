//! Terminal output: a progress bar while exporting, a summary afterwards.

use indicatif::{ProgressBar, ProgressStyle};
use newmonkey_export::{EntryReport, Summary};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

/// Failures listed individually before the rest are only counted.
const MAX_LISTED_FAILURES: usize = 20;

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} entries {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

pub struct Progress {
    bar: ProgressBar,
    extracted: u64,
}

impl Progress {
    pub fn new(silent: bool) -> Self {
        let bar = if silent { ProgressBar::hidden() } else { ProgressBar::new(0) };
        bar.set_style(progress_style());
        Self { bar, extracted: 0 }
    }

    pub fn start(&self, estimated: u64) {
        self.bar.set_length(estimated);
        self.bar.enable_steady_tick(Duration::from_millis(200));
    }

    pub fn entry(&mut self, report: &EntryReport) {
        self.bar.inc(1);
        // The index count is only an estimate.
        if self.bar.length().is_some_and(|len| self.bar.position() > len) {
            self.bar.set_length(self.bar.position());
        }
        if report.is_extracted() {
            self.extracted += 1;
            self.bar.set_message(format!("({} extracted)", self.extracted));
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// The end-of-run summary. With `stats`, per-type and per-host tables too.
pub fn render(summary: &Summary, output: &Path, stats: bool) -> String {
    let mut out = String::new();
    if summary.cancelled {
        let _ = writeln!(out, "Interrupted: not every cache entry was looked at.");
    }
    let _ = writeln!(
        out,
        "Extracted {} files ({}) to {}",
        summary.extracted,
        human_bytes(summary.bytes),
        output.display()
    );
    let _ = writeln!(out, "Skipped {}, failed {}", summary.skipped, summary.failed);
    if summary.warnings > 0 {
        let _ = writeln!(out, "{} files were kept as stored because they could not be decoded", summary.warnings);
    }
    if !summary.failures.is_empty() {
        let _ = writeln!(out, "\nFailures:");
        for failure in summary.failures.iter().take(MAX_LISTED_FAILURES) {
            let hash = failure.hash.map_or_else(|| "-".to_string(), |hash| hash.to_string());
            let url = failure.url.as_deref().unwrap_or("(unknown url)");
            let _ = writeln!(out, "  {hash} {url}: {}", failure.reason);
        }
        if summary.failures.len() > MAX_LISTED_FAILURES {
            let _ = writeln!(out, "  ... and {} more", summary.failures.len() - MAX_LISTED_FAILURES);
        }
    }
    if stats {
        table(&mut out, "Types", &summary.content_types);
        table(&mut out, "Domains", &summary.hosts);
        table(&mut out, "Skipped", &summary.skip_reasons);
    }
    out
}

/// Counts, largest first.
fn table(out: &mut String, title: &str, counts: &BTreeMap<String, u64>) {
    if counts.is_empty() {
        return;
    }
    let mut rows: Vec<_> = counts.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    let _ = writeln!(out, "\n{title}:");
    for (name, count) in rows {
        let _ = writeln!(out, "  {name:<width$}  {count:>6}");
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
