//! The blockfile cache layout.
//!
//! An `index` file hashes keys into a bucket table of [`EntryAddress`]es.
//! Entry records and small streams live in the shared `data_N` block files;
//! streams too large for a block file get their own `f_XXXXXX` file.

mod block;
mod entry;
mod index;
mod sparse;

pub use self::block::{BLOCK_HEADER_SIZE, BLOCK_MAGIC, BlockFileHeader, BlockFiles};
pub use self::entry::{
    ENTRY_BLOCK_SIZE, EntryState, EntryStore, FLAG_CHILD, FLAG_PARENT, KEY_OFFSET, STREAM_BODY, STREAM_RESPONSE_INFO,
    STREAM_SPARSE,
};
pub use self::index::{INDEX_HEADER_SIZE, INDEX_MAGIC, Index, IndexEntries, IndexHeader};
pub use self::sparse::{CHILD_SIZE, SPARSE_HEADER_SIZE, SPARSE_MAGIC, SparseHeader, child_key, child_offset};
use self::entry::KeyLocation;
pub(crate) use self::sparse::{Segment, SparseReader};
use crate::addr::EntryAddress;
use crate::backend::{CacheBackend, EntryIter};
use crate::error::{ErrorKind, Result};
use crate::http::{ResponseInfo, url_from_key};
use crate::models::{CacheEntry, CacheFormat, EntryHash, EntryLocation, EntryRef, PayloadRef, SparseRef, StreamRef};
use crate::PayloadReader;
use std::io;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// A blockfile cache opened for reading.
#[derive(Debug)]
pub struct BlockfileCache {
    root: PathBuf,
    index: Index,
    blocks: BlockFiles,
}

impl BlockfileCache {
    /// Open the cache rooted at `root`. The index header and the block file
    /// headers are validated here; entries are only read on demand.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let index = Index::open(&root.join("index"))?;
        let blocks = BlockFiles::open(&root)?;
        tracing::info!(
            root = %root.display(),
            entries = index.header.num_entries,
            version = index.header.version,
            "opened blockfile cache"
        );
        Ok(Self { root, index, blocks })
    }

    #[must_use]
    pub fn header(&self) -> &IndexHeader {
        &self.index.header
    }

    fn decode(&self, address: &EntryAddress) -> Result<CacheEntry> {
        let record = self.blocks.read_blocks(address)?;
        let record = record.as_ref();
        let store = EntryStore::parse(record)?;
        store.verify(record)?;
        let key = read_key(&self.blocks, &store, record)?;
        store.verify_key(&key)?;
        let key = String::from_utf8_lossy(&key).into_owned();

        let response = match store.stream(STREAM_RESPONSE_INFO)? {
            Some(stream) => {
                let info = self.blocks.read(&stream.address, stream.size)?;
                Some(ResponseInfo::from_pickle(info.as_ref())?)
            },
            None => None,
        };
        let payload = match store.is_parent() {
            true => match store.stream(STREAM_SPARSE)? {
                Some(stream) => {
                    let header = SparseHeader::parse(self.blocks.read(&stream.address, stream.size)?.as_ref())?;
                    PayloadRef::Sparse(SparseRef {
                        key: key.clone(),
                        signature: header.signature,
                        children: header.children,
                    })
                },
                None => PayloadRef::Empty,
            },
            false => store.stream(STREAM_BODY)?.map_or(PayloadRef::Empty, PayloadRef::Stream),
        };
        let content_encoding = response.as_ref().and_then(|r| r.header("content-encoding")).map(str::to_string);
        Ok(CacheEntry {
            hash: EntryHash::Block(store.hash),
            url: url_from_key(&key).to_string(),
            key,
            response,
            content_encoding,
            payload,
            sparse_child: store.is_child(),
        })
    }

    /// Resolve the children of a sparse parent into reader segments.
    ///
    /// Children are looked up eagerly (one record each) but their bodies are
    /// only opened while reading. A child that can't be found is skipped and
    /// its range reads as zeros, unless it is the last one.
    fn sparse_segments(&self, sparse: &SparseRef) -> Vec<Segment<'_>> {
        let mut segments = Vec::new();
        let mut position = 0;
        for &child in &sparse.children {
            let key = child_key(&sparse.key, sparse.signature, child);
            let stream = match self.index.find(&self.blocks, &key).and_then(|found| match found {
                Some((_, store)) => store.stream(STREAM_BODY),
                None => Ok(None),
            }) {
                Ok(Some(stream)) => stream,
                Ok(None) => {
                    tracing::warn!(%key, "sparse child missing");
                    continue;
                },
                Err(err) => {
                    tracing::warn!(%key, error = %*err, "sparse child unreadable");
                    continue;
                },
            };
            let offset = child_offset(child);
            if offset > position {
                segments.push(Segment::Gap(offset - position));
            }
            let size = stream.size.min(CHILD_SIZE);
            let blocks = &self.blocks;
            segments.push(Segment::Child(Box::new(move || blocks.stream(&stream.address, size))));
            position = offset + size;
        }
        segments
    }
}

impl CacheBackend for BlockfileCache {
    fn format(&self) -> CacheFormat {
        CacheFormat::Blockfile
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn estimated_entries(&self) -> u64 {
        u64::try_from(self.index.header.num_entries).unwrap_or(0)
    }

    fn entries(&self) -> EntryIter<'_> {
        Box::new(self.index.entries(&self.blocks))
    }

    #[instrument(level = "debug", skip(self), fields(hash = %entry.hash))]
    fn open_entry(&self, entry: &EntryRef) -> Result<CacheEntry> {
        match &entry.location {
            EntryLocation::Block(address) => self.decode(address),
            EntryLocation::File(path) => {
                exn::bail!(ErrorKind::format(format!("{} is not a blockfile entry", path.display())))
            },
        }
    }

    fn payload(&self, entry: &CacheEntry) -> Result<PayloadReader<'_>> {
        match &entry.payload {
            PayloadRef::Empty => Ok(Box::new(io::empty())),
            PayloadRef::Stream(StreamRef { address, size }) => self.blocks.stream(address, *size),
            PayloadRef::Sparse(sparse) => Ok(Box::new(SparseReader::new(self.sparse_segments(sparse)))),
            PayloadRef::File { path, .. } | PayloadRef::Ranges { path, .. } => {
                exn::bail!(ErrorKind::format(format!("{} is not a blockfile payload", path.display())))
            },
        }
    }
}

/// Read the key of a record, wherever it is stored.
pub(crate) fn read_key(blocks: &BlockFiles, store: &EntryStore, record: &[u8]) -> Result<Vec<u8>> {
    match store.key_location(record)? {
        KeyLocation::Inline(range) => Ok(record[range].to_vec()),
        KeyLocation::External { address, len } => Ok(blocks.read(&address, len as u64)?.into_inner()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{BlockfileBuilder, FixtureEntry};
    use std::io::Read;

    fn read_all(cache: &BlockfileCache, entry: &CacheEntry) -> Vec<u8> {
        let mut out = Vec::new();
        cache.payload(entry).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        BlockfileBuilder::new()
            .entry(FixtureEntry::new("https://cdn.example.com/a.png").header("Content-Type", "image/png").body(b"PNG!"))
            .entry(FixtureEntry::new("https://cdn.example.com/b.txt").body(vec![7u8; 3000]))
            .write(dir.path())
            .unwrap();
        let cache = BlockfileCache::open(dir.path()).unwrap();
        let refs: Vec<_> = cache.entries().collect::<Result<_>>().unwrap();
        assert_eq!(refs.len(), 2);
        let mut bodies: Vec<_> = refs
            .iter()
            .map(|r| {
                let entry = cache.open_entry(r).unwrap();
                (entry.url.clone(), read_all(&cache, &entry))
            })
            .collect();
        bodies.sort();
        assert_eq!(bodies[0], ("https://cdn.example.com/a.png".to_string(), b"PNG!".to_vec()));
        assert_eq!(bodies[1], ("https://cdn.example.com/b.txt".to_string(), vec![7u8; 3000]));
    }

    #[test]
    fn test_response_info_decoded() {
        let dir = tempfile::tempdir().unwrap();
        BlockfileBuilder::new()
            .entry(
                FixtureEntry::new("https://cdn.example.com/a.png")
                    .status(206)
                    .header("Content-Encoding", "gzip")
                    .header("Set-Cookie", "a=1")
                    .header("Set-Cookie", "b=2")
                    .body(b"x"),
            )
            .write(dir.path())
            .unwrap();
        let cache = BlockfileCache::open(dir.path()).unwrap();
        let entry_ref = cache.entries().next().unwrap().unwrap();
        let entry = cache.open_entry(&entry_ref).unwrap();
        assert_eq!(entry.status(), Some(206));
        assert_eq!(entry.content_encoding.as_deref(), Some("gzip"));
        let response = entry.response.unwrap();
        assert_eq!(response.headers_named("set-cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_inactive_entries_never_yielded() {
        let dir = tempfile::tempdir().unwrap();
        BlockfileBuilder::new()
            .entry(FixtureEntry::new("https://a.test/live").body(b"live"))
            .entry(FixtureEntry::new("https://a.test/evicted").body(b"gone").state(EntryState::Evicted))
            .entry(FixtureEntry::new("https://a.test/doomed").body(b"gone").state(EntryState::Doomed))
            .write(dir.path())
            .unwrap();
        let cache = BlockfileCache::open(dir.path()).unwrap();
        let refs: Vec<_> = cache.entries().collect::<Result<_>>().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(cache.open_entry(&refs[0]).unwrap().url, "https://a.test/live");
    }

    #[test]
    fn test_shared_bucket_chain() {
        let dir = tempfile::tempdir().unwrap();
        // A two-cell table forces chains.
        BlockfileBuilder::new()
            .table_len(2)
            .entry(FixtureEntry::new("https://a.test/1").body(b"1"))
            .entry(FixtureEntry::new("https://a.test/2").body(b"2"))
            .entry(FixtureEntry::new("https://a.test/3").body(b"3"))
            .entry(FixtureEntry::new("https://a.test/4").body(b"4"))
            .write(dir.path())
            .unwrap();
        let cache = BlockfileCache::open(dir.path()).unwrap();
        assert_eq!(cache.entries().filter(|r| r.is_ok()).count(), 4);
    }

    #[test]
    fn test_corrupt_checksum_fails_only_that_entry() {
        let dir = tempfile::tempdir().unwrap();
        BlockfileBuilder::new()
            .table_len(2)
            .entry(FixtureEntry::new("https://a.test/1").body(b"1"))
            .entry(FixtureEntry::new("https://a.test/2").body(b"2").corrupt_checksum())
            .entry(FixtureEntry::new("https://a.test/3").body(b"3"))
            .write(dir.path())
            .unwrap();
        let cache = BlockfileCache::open(dir.path()).unwrap();
        let results: Vec<_> = cache.entries().map(|r| cache.open_entry(&r.unwrap())).collect();
        assert_eq!(results.len(), 3);
        let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(&**failures[0], ErrorKind::Corruption(_)));
    }

    #[test]
    fn test_external_and_long_key() {
        let dir = tempfile::tempdir().unwrap();
        let long_path = "x".repeat(1000);
        let body: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
        BlockfileBuilder::new()
            .entry(FixtureEntry::new(format!("https://a.test/{long_path}")).body(body.clone()).external())
            .write(dir.path())
            .unwrap();
        let cache = BlockfileCache::open(dir.path()).unwrap();
        let entry = cache.open_entry(&cache.entries().next().unwrap().unwrap()).unwrap();
        assert!(entry.url.ends_with(&long_path));
        assert!(matches!(entry.payload, PayloadRef::Stream(StreamRef { address: EntryAddress::External { .. }, .. })));
        assert_eq!(read_all(&cache, &entry), body);
    }

    #[test]
    fn test_sparse_stitching() {
        let dir = tempfile::tempdir().unwrap();
        let first = vec![1u8; CHILD_SIZE as usize];
        let third = b"tail".to_vec();
        BlockfileBuilder::new()
            .entry(FixtureEntry::new("https://a.test/v.mp4").sparse(vec![(0, first.clone()), (2, third.clone())]))
            .write(dir.path())
            .unwrap();
        let cache = BlockfileCache::open(dir.path()).unwrap();
        let entries: Vec<_> =
            cache.entries().map(|r| cache.open_entry(&r.unwrap()).unwrap()).filter(|e| !e.sparse_child).collect();
        assert_eq!(entries.len(), 1);
        let body = read_all(&cache, &entries[0]);
        assert_eq!(body.len(), 2 * CHILD_SIZE as usize + third.len());
        assert_eq!(&body[..first.len()], &first[..]);
        assert!(body[first.len()..2 * CHILD_SIZE as usize].iter().all(|b| *b == 0));
        assert_eq!(&body[2 * CHILD_SIZE as usize..], &third[..]);
    }
}
