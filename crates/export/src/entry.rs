//! Exporting a single entry, start to finish.

use crate::error::{ErrorKind, Result};
use crate::mime::{self, OCTET_STREAM};
use crate::models::{EntryReport, ExtractedFile, Outcome, SkipReason};
use crate::naming;
use crate::options::Options;
use crate::payload::Payload;
use newmonkey_diskcache::{CacheEntry, CacheHandle, EntryRef};
use newmonkey_storage::OutputRoot;
use tracing::instrument;

/// State shared by every worker of a run.
pub(crate) struct Context {
    pub cache: CacheHandle,
    pub output: OutputRoot,
    pub options: Options,
}

/// Decode, filter, name and write one entry. Never fails: errors become a
/// [`Failed`](Outcome::Failed) outcome.
#[instrument(level = "debug", skip_all, fields(hash = %entry_ref.hash))]
pub(crate) fn process(ctx: &Context, entry_ref: &EntryRef) -> EntryReport {
    let hash = Some(entry_ref.hash);
    let entry = match ctx.cache.open_entry(entry_ref) {
        Ok(entry) => entry,
        Err(err) => {
            let err = ErrorKind::cache(err);
            tracing::warn!(hash = %entry_ref.hash, error = %*err, "cannot decode entry");
            return EntryReport::failed(hash, None, (*err).to_string());
        },
    };
    let outcome = match export(ctx, &entry) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(hash = %entry.hash, url = %entry.url, error = %*err, "cannot export entry");
            Outcome::Failed((*err).to_string())
        },
    };
    match &outcome {
        Outcome::Extracted(file) => {
            tracing::debug!(url = %entry.url, path = %file.relative_path.display(), bytes = file.byte_size, "extracted")
        },
        Outcome::Skipped(reason) => tracing::debug!(url = %entry.url, %reason, "skipped"),
        Outcome::Failed(_) => {},
    }
    EntryReport { hash, url: Some(entry.url), outcome }
}

fn export(ctx: &Context, entry: &CacheEntry) -> Result<Outcome> {
    if entry.sparse_child {
        return Ok(Outcome::Skipped(SkipReason::SparseChild));
    }
    if let Some(status) = entry.status()
        && !(200..300).contains(&status)
    {
        return Ok(Outcome::Skipped(SkipReason::HttpStatus(status)));
    }
    if entry.payload.is_empty() {
        return Ok(Outcome::Skipped(SkipReason::Empty));
    }

    // A declared type lets us skip without touching the payload.
    let declared = entry.content_type().and_then(mime::essence);
    if let Some(content_type) = &declared
        && !selected(&ctx.options, content_type)
    {
        return Ok(Outcome::Skipped(SkipReason::ContentType(content_type.clone())));
    }

    let payload = Payload::open(ctx.cache.as_ref(), entry)?;
    if payload.head().is_empty() {
        return Ok(Outcome::Skipped(SkipReason::Empty));
    }
    let content_type = match declared {
        Some(content_type) => content_type,
        None => {
            let sniffed = mime::sniff(payload.head()).unwrap_or(OCTET_STREAM).to_string();
            if !selected(&ctx.options, &sniffed) {
                return Ok(Outcome::Skipped(SkipReason::ContentType(sniffed)));
            }
            sniffed
        },
    };
    if let Some(warning) = payload.warning() {
        tracing::debug!(hash = %entry.hash, warning, "payload degraded");
    }

    let suggested_name = naming::suggest_name(&entry.url, &entry.hash, &content_type);
    let candidate = naming::relative_path(ctx.options.layout, &content_type, &entry.url, &suggested_name);
    let reservation = ctx.output.reserve(&candidate).map_err(ErrorKind::output)?;
    let mut file = ctx.output.create(&reservation).map_err(ErrorKind::output)?;
    // Dropping `file` on any error below removes the temporary file.
    let written = payload.write_to(&mut file)?;
    file.commit().map_err(ErrorKind::output)?;

    Ok(Outcome::Extracted(ExtractedFile {
        source_hash: entry.hash,
        suggested_name,
        final_path: reservation.path,
        relative_path: reservation.relative,
        byte_size: written.bytes,
        content_type,
        warning: written.warning,
    }))
}

fn selected(options: &Options, content_type: &str) -> bool {
    options.content_types.as_ref().is_none_or(|filter| filter.matches(content_type))
}
