//! Cache backend trait.

use crate::PayloadReader;
use crate::error::Result;
use crate::models::{CacheEntry, CacheFormat, EntryRef};
use std::path::Path;

/// Lazy sequence of entry descriptors. Item errors only concern one entry.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<EntryRef>> + Send + 'a>;

/// Unified read-only interface over the on-disk cache layouts.
///
/// Every method takes `&self` and opens its own file handles, so a backend
/// behind an [`Arc`](std::sync::Arc) can be shared by any number of worker
/// threads.
///
/// # Examples
///
/// ```no_run
/// use newmonkey_diskcache::{CacheBackend, error::Result};
/// use std::io::Read;
///
/// fn total_payload_bytes(cache: &dyn CacheBackend) -> Result<u64> {
///     let mut total = 0;
///     for entry in cache.entries() {
///         let entry = cache.open_entry(&entry?)?;
///         let mut reader = cache.payload(&entry)?;
///         total += std::io::copy(&mut reader, &mut std::io::sink()).unwrap_or(0);
///     }
///     Ok(total)
/// }
/// ```
pub trait CacheBackend: Send + Sync {
    fn format(&self) -> CacheFormat;

    /// The cache root this backend was opened on.
    fn root(&self) -> &Path;

    /// Rough entry count for progress reporting; never used for control flow.
    fn estimated_entries(&self) -> u64;

    /// Enumerate live entries. Evicted and doomed entries are never yielded.
    fn entries(&self) -> EntryIter<'_>;

    /// Read and decode one entry: key, URL, response info and payload location.
    fn open_entry(&self, entry: &EntryRef) -> Result<CacheEntry>;

    /// Open the stored (possibly still content-encoded) payload of an entry.
    ///
    /// Errors discovered while reading, such as a checksum mismatch at the
    /// end of the stream, surface as [`std::io::Error`]s from the reader.
    fn payload(&self, entry: &CacheEntry) -> Result<PayloadReader<'_>>;
}
