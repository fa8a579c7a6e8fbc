//! Cache models.
//!
//! These types describe entries as they come out of a cache backend. They are
//! plain data: nothing here holds a file handle.

use crate::addr::EntryAddress;
use crate::http::ResponseInfo;
use derive_more::Display;
use std::path::PathBuf;

/// The two on-disk layouts a Chromium disk cache can use.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum CacheFormat {
    /// `index` + `data_N` block files + `f_XXXXXX` external files.
    #[display("blockfile")]
    Blockfile,
    /// One `{hash}_0` file per entry.
    #[display("simple")]
    Simple,
}

/// Hash identifying an entry within its cache.
///
/// Rendered as lowercase hex: this is the name used for hash-based output
/// files and in failure reports.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryHash {
    #[display("{_0:08x}")]
    Block(u32),
    #[display("{_0:016x}")]
    Simple(u64),
}

/// Where an entry's record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryLocation {
    Block(EntryAddress),
    File(PathBuf),
}

/// An entry descriptor yielded by the index, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    pub hash: EntryHash,
    pub location: EntryLocation,
}

/// Record bytes reassembled from one or more blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord(pub Vec<u8>);

impl RawRecord {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for RawRecord {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A stream stored at a cache address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRef {
    pub address: EntryAddress,
    pub size: u64,
}

/// A sparse (range-request) payload split across child entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseRef {
    /// Key of the parent entry, from which child keys are derived.
    pub key: String,
    pub signature: i64,
    /// Indices of the children marked present in the parent's bitmap, ascending.
    pub children: Vec<u32>,
}

/// One stored range of a simple-cache sparse file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseRange {
    /// Position in the stitched body.
    pub offset: u64,
    /// Where the range's bytes start in the `_s` file.
    pub file_offset: u64,
    pub len: u64,
    pub crc32: u32,
}

/// Location of an entry's body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadRef {
    Empty,
    Stream(StreamRef),
    Sparse(SparseRef),
    /// A byte range of a simple-cache entry file.
    File { path: PathBuf, offset: u64, size: u64, crc32: Option<u32> },
    /// Ranges of a simple-cache `_s` file, ordered by body offset.
    Ranges { path: PathBuf, ranges: Vec<SparseRange> },
}

impl PayloadRef {
    /// Declared size, if known without reading anything.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Stream(stream) => Some(stream.size),
            Self::Sparse(_) | Self::Ranges { .. } => None,
            Self::File { size, .. } => Some(*size),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == Some(0)
    }
}

/// A fully decoded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub hash: EntryHash,
    /// The raw cache key, including any partitioning prefix.
    pub key: String,
    /// Request URL recovered from the key.
    pub url: String,
    /// `None` when the entry has no stored response info.
    pub response: Option<ResponseInfo>,
    pub content_encoding: Option<String>,
    pub payload: PayloadRef,
    /// Set on the range entries that make up a sparse parent's body.
    pub sparse_child: bool,
}

impl CacheEntry {
    /// HTTP status of the stored response, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// `Content-Type` header value, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.header("content-type"))
    }
}
