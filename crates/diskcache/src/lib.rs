//! # Chromium Disk Cache Reader
//!
//! Read-only access to the on-disk HTTP cache of Chromium-based applications
//! (Discord, Electron apps, browsers). Both layouts Chromium ships are
//! supported: the **blockfile** cache (`index`, `data_N`, `f_XXXXXX`) and
//! the **simple** cache (one `{hash}_0` file per entry).
//!
//! ## Example
//!
//! ```no_run
//! use newmonkey_diskcache::error::Result;
//!
//! fn list_urls(root: &std::path::Path) -> Result<Vec<String>> {
//!     let cache = newmonkey_diskcache::open(root)?;
//!     let mut urls = Vec::new();
//!     for entry in cache.entries() {
//!         // A single broken entry doesn't poison the rest.
//!         match entry.and_then(|e| cache.open_entry(&e)) {
//!             Ok(entry) => urls.push(entry.url),
//!             Err(err) => tracing::warn!(error = %*err, "skipping entry"),
//!         }
//!     }
//!     Ok(urls)
//! }
//! ```
//!
//! The cache is never written to. Nothing here guesses where a cache lives:
//! callers pass the directory holding the `index` file.

pub mod addr;
mod backend;
pub mod blockfile;
pub mod error;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
mod hash;
mod http;
mod models;
pub mod simple;

pub use crate::addr::EntryAddress;
pub use crate::backend::{CacheBackend, EntryIter};
pub use crate::blockfile::BlockfileCache;
pub use crate::hash::persistent_hash;
pub use crate::http::{ResponseInfo, url_from_key};
pub use crate::models::{
    CacheEntry, CacheFormat, EntryHash, EntryLocation, EntryRef, PayloadRef, RawRecord, SparseRange, SparseRef,
    StreamRef,
};
pub use crate::simple::SimpleCache;
use crate::error::{ErrorKind, Result};
use byteorder::{ByteOrder, LittleEndian};
use exn::ResultExt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// A payload byte stream, as stored (content-encoding not undone).
pub type PayloadReader<'a> = Box<dyn Read + Send + 'a>;
pub type CacheHandle = Arc<dyn CacheBackend>;

/// Name of the file every cache layout keeps at its root.
pub const INDEX_FILE: &str = "index";

/// Detect the layout of the cache at `root` from the magic number of its
/// `index` file and open it.
///
/// Fails with [`Io`](ErrorKind::Io) if the index can't be read and with
/// [`Format`](ErrorKind::Format) if it isn't a recognized cache index.
pub fn open(root: impl AsRef<Path>) -> Result<CacheHandle> {
    let root = root.as_ref();
    Ok(match detect(root)? {
        CacheFormat::Blockfile => Arc::new(BlockfileCache::open(root)?),
        CacheFormat::Simple => Arc::new(SimpleCache::open(root)?),
    })
}

/// Identify the cache layout at `root` without opening it.
pub fn detect(root: impl AsRef<Path>) -> Result<CacheFormat> {
    let path = root.as_ref().join(INDEX_FILE);
    let mut magic = Vec::with_capacity(8);
    std::fs::File::open(&path)
        .and_then(|file| file.take(8).read_to_end(&mut magic))
        .or_raise(|| ErrorKind::Io(path.clone()))?;
    if magic.len() >= 4 && LittleEndian::read_u32(&magic) == blockfile::INDEX_MAGIC {
        return Ok(CacheFormat::Blockfile);
    }
    if magic.len() == 8 && LittleEndian::read_u64(&magic) == simple::INDEX_MAGIC {
        return Ok(CacheFormat::Simple);
    }
    exn::bail!(ErrorKind::format(format!("{} is not a Chromium cache index", path.display())))
}
