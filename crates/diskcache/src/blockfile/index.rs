//! The blockfile `index`: header and bucket table.

use crate::addr::EntryAddress;
use crate::blockfile::block::BlockFiles;
use crate::blockfile::entry::{EntryState, EntryStore};
use crate::error::{ErrorKind, Result};
use crate::models::{EntryHash, EntryLocation, EntryRef};
use byteorder::{LittleEndian, ReadBytesExt};
use exn::{OptionExt, ResultExt};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use tracing::instrument;

pub const INDEX_MAGIC: u32 = 0xC103_CAC3;
pub const SUPPORTED_VERSIONS: [u32; 3] = [0x2_0000, 0x2_0001, 0x3_0000];
pub const INDEX_HEADER_SIZE: usize = 368;
pub const DEFAULT_TABLE_LEN: u32 = 0x1_0000;

/// The index header, read once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub version: u32,
    pub num_entries: i32,
    pub last_file: i32,
    pub table_len: u32,
    pub create_time: u64,
}

impl IndexHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_HEADER_SIZE {
            exn::bail!(ErrorKind::format(format!("index header is {} bytes", bytes.len())));
        }
        let mut cursor = Cursor::new(bytes);
        let truncated = || ErrorKind::format("truncated index header");
        let magic = cursor.read_u32::<LittleEndian>().or_raise(truncated)?;
        if magic != INDEX_MAGIC {
            exn::bail!(ErrorKind::format(format!("bad index magic {magic:#010x}")));
        }
        let version = cursor.read_u32::<LittleEndian>().or_raise(truncated)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            exn::bail!(ErrorKind::format(format!("unsupported index version {version:#x}")));
        }
        let num_entries = cursor.read_i32::<LittleEndian>().or_raise(truncated)?;
        cursor.set_position(16);
        let last_file = cursor.read_i32::<LittleEndian>().or_raise(truncated)?;
        cursor.set_position(28);
        let table_len = match cursor.read_i32::<LittleEndian>().or_raise(truncated)? {
            0 => DEFAULT_TABLE_LEN,
            len => u32::try_from(len)
                .ok()
                .filter(|len| len.is_power_of_two())
                .ok_or_raise(|| ErrorKind::format(format!("bucket table length {len} is not a power of two")))?,
        };
        cursor.set_position(40);
        let create_time = cursor.read_u64::<LittleEndian>().or_raise(truncated)?;
        Ok(Self { version, num_entries, last_file, table_len, create_time })
    }
}

/// Header plus bucket table, loaded from the `index` file.
#[derive(Debug)]
pub struct Index {
    pub header: IndexHeader,
    table: Vec<u32>,
}

impl Index {
    /// Load the index. Cells missing from a truncated table read as empty.
    ///
    /// Only the cells the file actually holds are kept in memory, whatever
    /// length the header declares.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), version, table_len, present))]
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        let header = IndexHeader::parse(&data)?;
        let stored = &data[INDEX_HEADER_SIZE..];
        let present = (header.table_len as usize).min(stored.len() / 4);
        let table: Vec<u32> = stored
            .chunks_exact(4)
            .take(present)
            .map(|cell| u32::from_le_bytes([cell[0], cell[1], cell[2], cell[3]]))
            .collect();
        if present < header.table_len as usize {
            tracing::warn!(present, expected = header.table_len, "bucket table is truncated");
        }
        let span = tracing::Span::current();
        span.record("version", format!("{:#x}", header.version));
        span.record("table_len", header.table_len);
        span.record("present", present);
        Ok(Self { header, table })
    }

    #[must_use]
    pub fn bucket(&self, hash: u32) -> u32 {
        self.table.get((hash & (self.header.table_len - 1)) as usize).copied().unwrap_or(0)
    }

    /// Walk every chain of the table.
    pub fn entries<'a>(&'a self, blocks: &'a BlockFiles) -> IndexEntries<'a> {
        IndexEntries { table: &self.table, blocks, bucket: 0, next: None, visited: HashSet::new(), inactive: 0 }
    }

    /// Find the record stored under `key`, following the chain of its bucket.
    pub fn find(&self, blocks: &BlockFiles, key: &str) -> Result<Option<(EntryAddress, EntryStore)>> {
        let hash = crate::hash::persistent_hash(key.as_bytes());
        let mut visited = HashSet::new();
        let mut raw = self.bucket(hash);
        while let Some(address) = EntryAddress::from_raw(raw)? {
            if !visited.insert(raw) {
                break;
            }
            let record = blocks.read_blocks(&address)?;
            let store = EntryStore::parse(record.as_ref())?;
            if store.hash == hash && store.state == EntryState::Normal {
                let stored = super::read_key(blocks, &store, record.as_ref())?;
                if stored == key.as_bytes() {
                    return Ok(Some((address, store)));
                }
            }
            raw = store.next;
        }
        Ok(None)
    }
}

/// Lazy enumeration of the live entries of an index.
///
/// Evicted and doomed records are stepped over (their `next` link is still
/// followed) and never decoded further. A record that can't be read ends its
/// chain: the error is yielded once and the walk resumes at the next bucket.
pub struct IndexEntries<'a> {
    table: &'a [u32],
    blocks: &'a BlockFiles,
    bucket: usize,
    next: Option<u32>,
    visited: HashSet<u32>,
    inactive: u64,
}

impl IndexEntries<'_> {
    fn next_raw(&mut self) -> Option<u32> {
        if let Some(raw) = self.next.take() {
            return Some(raw);
        }
        while let Some(&cell) = self.table.get(self.bucket) {
            self.bucket += 1;
            if cell != 0 {
                return Some(cell);
            }
        }
        None
    }
}

impl Iterator for IndexEntries<'_> {
    type Item = Result<EntryRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(raw) = self.next_raw() else {
                tracing::debug!(inactive = self.inactive, "index walk complete");
                return None;
            };
            let address = match EntryAddress::from_raw(raw) {
                Ok(Some(address)) => address,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(raw, "broken chain link");
                    return Some(Err(err));
                },
            };
            if !self.visited.insert(raw) {
                tracing::warn!(%address, "cycle in bucket chain");
                continue;
            }
            let store = match self.blocks.read_blocks(&address).and_then(|r| EntryStore::parse(r.as_ref())) {
                Ok(store) => store,
                Err(err) => {
                    tracing::warn!(%address, error = %*err, "unreadable entry ends its chain");
                    return Some(Err(err));
                },
            };
            if store.next != 0 {
                self.next = Some(store.next);
            }
            match store.state {
                EntryState::Normal => {
                    return Some(Ok(EntryRef {
                        hash: EntryHash::Block(store.hash),
                        location: EntryLocation::Block(address),
                    }));
                },
                state => {
                    tracing::trace!(%address, ?state, "skipping inactive entry");
                    self.inactive += 1;
                },
            }
        }
    }
}
