//! Synthetic caches for tests.
//!
//! Enabled with the `fixture` feature, intended for use in other crates'
//! dev dependencies. The builders write byte-exact blockfile and simple
//! caches so readers can be tested without a real Chromium profile.
//!
//! ```
//! use newmonkey_diskcache::fixture::{BlockfileBuilder, FixtureEntry};
//!
//! let dir = tempfile::tempdir().unwrap();
//! BlockfileBuilder::new()
//!     .entry(FixtureEntry::new("https://cdn.example.com/cat.png").header("Content-Type", "image/png").body(b"meow"))
//!     .write(dir.path())
//!     .unwrap();
//! let cache = newmonkey_diskcache::open(dir.path()).unwrap();
//! assert_eq!(cache.entries().count(), 1);
//! ```

use crate::addr::EntryAddress;
use crate::blockfile::{
    BLOCK_HEADER_SIZE, BLOCK_MAGIC, ENTRY_BLOCK_SIZE, EntryState, FLAG_CHILD, FLAG_PARENT, INDEX_HEADER_SIZE,
    INDEX_MAGIC, KEY_OFFSET, SPARSE_HEADER_SIZE, SPARSE_MAGIC, child_key, child_offset,
};
use crate::hash::persistent_hash;
use crate::simple;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

const FIXTURE_INDEX_VERSION: u32 = 0x3_0000;
const FIXTURE_SIMPLE_VERSION: u32 = 9;
const FIXTURE_SPARSE_SIGNATURE: i64 = 0x5EED;
const MAX_INLINE_BLOCKS: usize = 4;

/// Serialize response info the way Chromium pickles it.
pub fn response_pickle(status_line: &str, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(status_line.as_bytes());
    raw.push(0);
    for (name, value) in headers {
        raw.extend_from_slice(format!("{name}: {value}").as_bytes());
        raw.push(0);
    }
    raw.push(0);

    let mut payload = Vec::new();
    // Version 3, no optional fields.
    payload.extend_from_slice(&3i32.to_le_bytes());
    payload.extend_from_slice(&13_300_000_000_000_000i64.to_le_bytes());
    payload.extend_from_slice(&13_300_000_000_100_000i64.to_le_bytes());
    payload.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    payload.extend_from_slice(&raw);
    payload.resize(payload.len().next_multiple_of(4), 0);

    let mut pickle = (payload.len() as u32).to_le_bytes().to_vec();
    pickle.extend_from_slice(&payload);
    pickle
}

/// A block file: header followed by `blocks`.
pub fn block_file(id: u8, entry_size: u32, max_entries: u32, blocks: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; BLOCK_HEADER_SIZE as usize];
    data[0..4].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
    data[4..8].copy_from_slice(&0x2_0000u32.to_le_bytes());
    data[8..10].copy_from_slice(&i16::from(id).to_le_bytes());
    data[12..16].copy_from_slice(&entry_size.to_le_bytes());
    data[16..20].copy_from_slice(&((blocks.len() as u32) / entry_size).to_le_bytes());
    data[20..24].copy_from_slice(&max_entries.to_le_bytes());
    data.extend_from_slice(blocks);
    data
}

/// An index file with the given non-empty bucket cells.
pub fn index_file(version: u32, table_len: u32, cells: &[(usize, u32)]) -> Vec<u8> {
    let mut data = vec![0u8; INDEX_HEADER_SIZE + table_len as usize * 4];
    data[0..4].copy_from_slice(&INDEX_MAGIC.to_le_bytes());
    data[4..8].copy_from_slice(&version.to_le_bytes());
    data[8..12].copy_from_slice(&(cells.len() as i32).to_le_bytes());
    data[28..32].copy_from_slice(&(table_len as i32).to_le_bytes());
    for &(bucket, cell) in cells {
        let offset = INDEX_HEADER_SIZE + bucket * 4;
        data[offset..offset + 4].copy_from_slice(&cell.to_le_bytes());
    }
    data
}

/// Stream 2 of a sparse parent: header plus child bitmap.
pub fn sparse_stream(signature: i64, parent_key_len: i32, children: &[u32]) -> Vec<u8> {
    let bits = children.iter().max().map_or(0, |max| *max as usize + 1);
    let mut data = vec![0u8; SPARSE_HEADER_SIZE + bits.div_ceil(32) * 4];
    data[0..8].copy_from_slice(&signature.to_le_bytes());
    data[8..12].copy_from_slice(&SPARSE_MAGIC.to_le_bytes());
    data[12..16].copy_from_slice(&parent_key_len.to_le_bytes());
    for &child in children {
        data[SPARSE_HEADER_SIZE + child as usize / 8] |= 1 << (child % 8);
    }
    data
}

/// An entry record, checksummed unless told otherwise.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    key: Vec<u8>,
    state: EntryState,
    next: u32,
    long_key: u32,
    data_size: [i32; 4],
    data_addr: [u32; 4],
    flags: u32,
    corrupt: bool,
}

impl RecordBuilder {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
            state: EntryState::Normal,
            next: 0,
            long_key: 0,
            data_size: [0; 4],
            data_addr: [0; 4],
            flags: 0,
            corrupt: false,
        }
    }

    pub fn stream(mut self, index: usize, address: u32, size: i32) -> Self {
        self.data_addr[index] = address;
        self.data_size[index] = size;
        self
    }

    pub fn body_stream(self, address: u32, size: i32) -> Self {
        self.stream(1, address, size)
    }

    pub fn state(mut self, state: EntryState) -> Self {
        self.state = state;
        self
    }

    pub fn next(mut self, next: u32) -> Self {
        self.next = next;
        self
    }

    /// Store the key out of line at `address`.
    pub fn long_key(mut self, address: u32) -> Self {
        self.long_key = address;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn corrupt_checksum(mut self) -> Self {
        self.corrupt = true;
        self
    }

    /// Number of 256-byte blocks the record needs.
    pub fn blocks(&self) -> usize {
        match self.long_key {
            0 => (KEY_OFFSET + self.key.len() + 1).div_ceil(ENTRY_BLOCK_SIZE).clamp(1, MAX_INLINE_BLOCKS),
            _ => 1,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut record = vec![0u8; self.blocks() * ENTRY_BLOCK_SIZE];
        let mut put = |offset: usize, bytes: &[u8]| record[offset..offset + bytes.len()].copy_from_slice(bytes);
        put(0, &persistent_hash(&self.key).to_le_bytes());
        put(4, &self.next.to_le_bytes());
        let state: i32 = match self.state {
            EntryState::Normal => 0,
            EntryState::Evicted => 1,
            EntryState::Doomed => 2,
            EntryState::Unknown(value) => value,
        };
        put(20, &state.to_le_bytes());
        put(24, &13_300_000_000_000_000u64.to_le_bytes());
        put(32, &(self.key.len() as i32).to_le_bytes());
        put(36, &self.long_key.to_le_bytes());
        for i in 0..4 {
            put(40 + i * 4, &self.data_size[i].to_le_bytes());
            put(56 + i * 4, &self.data_addr[i].to_le_bytes());
        }
        put(72, &self.flags.to_le_bytes());
        if self.long_key == 0 {
            put(KEY_OFFSET, &self.key);
        }
        let mut checksum = persistent_hash(&record[..92]);
        if self.corrupt {
            checksum ^= 0xDEAD_BEEF;
        }
        record[92..96].copy_from_slice(&checksum.to_le_bytes());
        record
    }
}

/// A cache entry to write into a synthetic cache.
#[derive(Debug, Clone)]
pub struct FixtureEntry {
    key: String,
    status_line: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    external: bool,
    state: EntryState,
    corrupt: bool,
    sparse: Option<Vec<(u32, Vec<u8>)>>,
}

impl FixtureEntry {
    /// An entry stored under `key` (usually just the URL) with a `200 OK`
    /// response, no headers and an empty body.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status_line: Some("HTTP/1.1 200 OK".to_string()),
            headers: Vec::new(),
            body: Vec::new(),
            external: false,
            state: EntryState::Normal,
            corrupt: false,
            sparse: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status_line = Some(format!("HTTP/1.1 {status} Fixture"));
        self
    }

    /// Store no response info at all.
    pub fn no_response(mut self) -> Self {
        self.status_line = None;
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Force the body into its own external file.
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    pub fn state(mut self, state: EntryState) -> Self {
        self.state = state;
        self
    }

    /// Store a checksum that doesn't match: the record checksum for a
    /// blockfile cache, the body CRC32 for a simple cache.
    pub fn corrupt_checksum(mut self) -> Self {
        self.corrupt = true;
        self
    }

    /// Split the body into 1 MiB-aligned children of a sparse parent, or
    /// ranges of a `_s` file in a simple cache.
    pub fn sparse(mut self, children: Vec<(u32, Vec<u8>)>) -> Self {
        self.sparse = Some(children);
        self
    }

    fn response_info(&self) -> Vec<u8> {
        match &self.status_line {
            Some(status_line) => {
                let headers: Vec<_> = self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
                response_pickle(status_line, &headers)
            },
            None => Vec::new(),
        }
    }
}

/// Appends blocks of one size to a block file being built.
struct BlockAlloc {
    id: u8,
    block_size: u32,
    data: Vec<u8>,
}

impl BlockAlloc {
    fn new(id: u8, block_size: u32) -> Self {
        Self { id, block_size, data: Vec::new() }
    }

    fn reserve(&mut self, count: usize) -> EntryAddress {
        let start = self.data.len() / self.block_size as usize;
        self.data.resize(self.data.len() + count * self.block_size as usize, 0);
        EntryAddress::Inline { file: self.id, block_size: self.block_size, start: start as u16, count: count as u8 }
    }

    fn put(&mut self, address: &EntryAddress, bytes: &[u8]) {
        if let EntryAddress::Inline { start, .. } = address {
            let offset = usize::from(*start) * self.block_size as usize;
            self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
    }

    fn file(&self) -> Vec<u8> {
        let blocks = (self.data.len() / self.block_size as usize) as u32;
        block_file(self.id, self.block_size, blocks.max(1), &self.data)
    }
}

struct Storage {
    records: BlockAlloc,
    small: BlockAlloc,
    large: BlockAlloc,
    external: BTreeMap<u32, Vec<u8>>,
}

impl Storage {
    fn new() -> Self {
        Self {
            records: BlockAlloc::new(1, 256),
            small: BlockAlloc::new(2, 1024),
            large: BlockAlloc::new(3, 4096),
            external: BTreeMap::new(),
        }
    }

    /// Store a stream, returning its raw address (0 when empty).
    fn stream(&mut self, data: &[u8], external: bool) -> u32 {
        if data.is_empty() {
            return 0;
        }
        let alloc = match data.len() {
            _ if external => None,
            len if len <= 4 * 256 => Some(&mut self.records),
            len if len <= 4 * 1024 => Some(&mut self.small),
            len if len <= 4 * 4096 => Some(&mut self.large),
            _ => None,
        };
        match alloc {
            Some(alloc) => {
                let count = data.len().div_ceil(alloc.block_size as usize);
                let address = alloc.reserve(count);
                alloc.put(&address, data);
                address.to_raw()
            },
            None => {
                let file = self.external.len() as u32 + 1;
                self.external.insert(file, data.to_vec());
                EntryAddress::External { file }.to_raw()
            },
        }
    }
}

/// Writes a blockfile cache.
#[derive(Debug, Clone)]
pub struct BlockfileBuilder {
    table_len: u32,
    entries: Vec<FixtureEntry>,
    truncate_table: Option<usize>,
}

impl Default for BlockfileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockfileBuilder {
    pub fn new() -> Self {
        Self { table_len: 256, entries: Vec::new(), truncate_table: None }
    }

    /// Bucket table length; must be a power of two.
    pub fn table_len(mut self, table_len: u32) -> Self {
        self.table_len = table_len;
        self
    }

    pub fn entry(mut self, entry: FixtureEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Cut the index file after `cells` bucket cells.
    pub fn truncate_table(mut self, cells: usize) -> Self {
        self.truncate_table = Some(cells);
        self
    }

    pub fn write(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut storage = Storage::new();

        // Sparse children become entries of their own.
        let mut records = Vec::new();
        for entry in &self.entries {
            let info = entry.response_info();
            let info_address = storage.stream(&info, false);
            let mut record =
                RecordBuilder::new(&entry.key).state(entry.state).stream(0, info_address, info.len() as i32);
            match &entry.sparse {
                Some(children) => {
                    let indices: Vec<u32> = children.iter().map(|(i, _)| *i).collect();
                    let stream = sparse_stream(FIXTURE_SPARSE_SIGNATURE, entry.key.len() as i32, &indices);
                    let address = storage.stream(&stream, false);
                    record = record.stream(2, address, stream.len() as i32).flags(FLAG_PARENT);
                    for (index, data) in children {
                        let address = storage.stream(data, false);
                        let child = RecordBuilder::new(child_key(&entry.key, FIXTURE_SPARSE_SIGNATURE, *index))
                            .body_stream(address, data.len() as i32)
                            .flags(FLAG_CHILD);
                        records.push(child);
                    }
                },
                None => {
                    let address = storage.stream(&entry.body, entry.external);
                    record = record.body_stream(address, entry.body.len() as i32);
                },
            }
            if KEY_OFFSET + entry.key.len() + 1 > MAX_INLINE_BLOCKS * ENTRY_BLOCK_SIZE {
                let address = storage.stream(entry.key.as_bytes(), false);
                record = record.long_key(address);
            }
            if entry.corrupt {
                record = record.corrupt_checksum();
            }
            records.push(record);
        }

        // Reserve every record, then link each bucket's chain.
        let addresses: Vec<EntryAddress> = records.iter().map(|r| storage.records.reserve(r.blocks())).collect();
        let mut heads: BTreeMap<usize, u32> = BTreeMap::new();
        for (record, address) in records.into_iter().zip(&addresses).rev() {
            let bucket = (persistent_hash(&record.key) & (self.table_len - 1)) as usize;
            let next = heads.insert(bucket, address.to_raw()).unwrap_or(0);
            storage.records.put(address, &record.next(next).build());
        }

        let cells: Vec<(usize, u32)> = heads.into_iter().collect();
        let mut index = index_file(FIXTURE_INDEX_VERSION, self.table_len, &cells);
        index[8..12].copy_from_slice(&(addresses.len() as i32).to_le_bytes());
        if let Some(cells) = self.truncate_table {
            index.truncate(INDEX_HEADER_SIZE + cells * 4);
        }
        std::fs::write(dir.join("index"), index)?;
        for alloc in [&storage.records, &storage.small, &storage.large] {
            std::fs::write(dir.join(format!("data_{}", alloc.id)), alloc.file())?;
        }
        for (file, data) in &storage.external {
            std::fs::write(dir.join(EntryAddress::External { file: *file }.file_name()), data)?;
        }
        Ok(())
    }
}

/// Writes a simple cache.
#[derive(Debug, Clone, Default)]
pub struct SimpleCacheBuilder {
    entries: Vec<FixtureEntry>,
    key_sha256: bool,
}

impl SimpleCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: FixtureEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Append a (zeroed) key SHA-256 to every entry.
    pub fn key_sha256(mut self, enabled: bool) -> Self {
        self.key_sha256 = enabled;
        self
    }

    pub fn write(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut index = simple::INDEX_MAGIC.to_le_bytes().to_vec();
        index.extend_from_slice(&FIXTURE_SIMPLE_VERSION.to_le_bytes());
        index.extend_from_slice(&[0; 8]);
        std::fs::write(dir.join("index"), index)?;

        for (i, entry) in self.entries.iter().enumerate() {
            let hash = (u64::from(persistent_hash(entry.key.as_bytes())) << 32) | i as u64;
            let info = entry.response_info();
            // Sparse bodies live in the `_s` file.
            let body: &[u8] = match entry.sparse {
                Some(_) => &[],
                None => &entry.body,
            };
            let mut body_crc = crc32fast::hash(body);
            if entry.corrupt {
                body_crc ^= 0xDEAD_BEEF;
            }

            let mut file = Vec::new();
            file.extend_from_slice(&simple_file_header(&entry.key));
            file.extend_from_slice(body);
            file.extend_from_slice(&eof_record(simple::FLAG_HAS_CRC32, body_crc, body.len() as u32));
            file.extend_from_slice(&info);
            let mut flags = simple::FLAG_HAS_CRC32;
            if self.key_sha256 {
                file.extend_from_slice(&[0; simple::KEY_SHA256_SIZE as usize]);
                flags |= simple::FLAG_HAS_KEY_SHA256;
            }
            file.extend_from_slice(&eof_record(flags, crc32fast::hash(&info), info.len() as u32));
            std::fs::write(dir.join(format!("{hash:016x}_0")), file)?;

            if let Some(children) = &entry.sparse {
                let mut sparse = simple_file_header(&entry.key);
                for (i, (index, data)) in children.iter().enumerate() {
                    let mut crc = crc32fast::hash(data);
                    if entry.corrupt && i == 0 {
                        crc ^= 0xDEAD_BEEF;
                    }
                    sparse.extend_from_slice(&simple::SPARSE_RANGE_MAGIC.to_le_bytes());
                    sparse.extend_from_slice(&(child_offset(*index) as i64).to_le_bytes());
                    sparse.extend_from_slice(&(data.len() as i64).to_le_bytes());
                    sparse.extend_from_slice(&crc.to_le_bytes());
                    sparse.extend_from_slice(&[0; 4]);
                    sparse.extend_from_slice(data);
                }
                std::fs::write(dir.join(format!("{hash:016x}_s")), sparse)?;
            }
        }
        Ok(())
    }
}

/// Header and key opening both `_0` and `_s` files.
fn simple_file_header(key: &str) -> Vec<u8> {
    let mut header = simple::ENTRY_MAGIC.to_le_bytes().to_vec();
    header.extend_from_slice(&FIXTURE_SIMPLE_VERSION.to_le_bytes());
    header.extend_from_slice(&(key.len() as u32).to_le_bytes());
    header.extend_from_slice(&persistent_hash(key.as_bytes()).to_le_bytes());
    header.extend_from_slice(&[0; 4]);
    header.extend_from_slice(key.as_bytes());
    header
}

fn eof_record(flags: u32, crc32: u32, stream_size: u32) -> Vec<u8> {
    let mut record = simple::EOF_MAGIC.to_le_bytes().to_vec();
    record.extend_from_slice(&flags.to_le_bytes());
    record.extend_from_slice(&crc32.to_le_bytes());
    record.extend_from_slice(&stream_size.to_le_bytes());
    record.extend_from_slice(&[0; 4]);
    record
}
