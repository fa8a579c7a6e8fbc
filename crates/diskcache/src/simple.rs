//! The simple cache layout.
//!
//! Every entry is a file named `{hash:016x}_0` holding, in order: a fixed
//! header, the key, the body (stream 1), an EOF record, the response info
//! (stream 0), an optional SHA-256 of the key and a final EOF record. Stream
//! sizes are only known from the EOF records, so the layout is resolved from
//! the end of the file backwards.
//!
//! Range-fetched bodies are kept apart in `{hash:016x}_s`: the same header
//! and key, then ranges, each a fixed record followed by its bytes.

use crate::PayloadReader;
use crate::backend::{CacheBackend, EntryIter};
use crate::blockfile::{Segment, SparseReader};
use crate::error::{ErrorKind, Result};
use crate::http::{ResponseInfo, url_from_key};
use crate::models::{CacheEntry, CacheFormat, EntryHash, EntryLocation, EntryRef, PayloadRef, SparseRange};
use byteorder::{ByteOrder, LittleEndian};
use exn::ResultExt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Magic of the `index` file at the cache root.
pub const INDEX_MAGIC: u64 = 0x656E_7465_7220_796F;
/// Magic opening every entry file.
pub const ENTRY_MAGIC: u64 = 0xFCFB_6D1B_A772_5C30;
/// Magic of the record closing each stream.
pub const EOF_MAGIC: u64 = 0xF4FA_6F45_970D_41D8;
/// Magic of each range record in a `_s` file.
pub const SPARSE_RANGE_MAGIC: u64 = 0xEB97_BF01_6553_676B;
pub const SUPPORTED_VERSIONS: RangeInclusive<u32> = 5..=9;

pub const HEADER_SIZE: u64 = 24;
pub const EOF_SIZE: u64 = 24;
pub const SPARSE_RANGE_HEADER_SIZE: u64 = 32;
pub const KEY_SHA256_SIZE: u64 = 32;
pub const FLAG_HAS_CRC32: u32 = 1;
pub const FLAG_HAS_KEY_SHA256: u32 = 2;

const ENTRY_SUFFIX: &str = "_0";
const SPARSE_SUFFIX: &str = "_s";
const BUFFER_SIZE: usize = 64 * 1024;

/// A simple cache opened for reading.
#[derive(Debug)]
pub struct SimpleCache {
    root: PathBuf,
    version: u32,
    estimated: u64,
}

impl SimpleCache {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let path = root.join(crate::INDEX_FILE);
        let mut header = [0u8; 12];
        File::open(&path).and_then(|mut f| f.read_exact(&mut header)).or_raise(|| ErrorKind::Io(path.clone()))?;
        let magic = LittleEndian::read_u64(&header);
        if magic != INDEX_MAGIC {
            exn::bail!(ErrorKind::format(format!("bad simple index magic {magic:#018x}")));
        }
        let version = LittleEndian::read_u32(&header[8..]);
        if !SUPPORTED_VERSIONS.contains(&version) {
            exn::bail!(ErrorKind::format(format!("unsupported simple cache version {version}")));
        }
        let estimated = entry_files(&root)?.len() as u64;
        tracing::info!(root = %root.display(), version, entries = estimated, "opened simple cache");
        Ok(Self { root, version, estimated })
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// Entry files in the cache root, sorted by hash.
fn entry_files(root: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(root).or_raise(|| ErrorKind::Io(root.to_path_buf()))? {
        let entry = entry.or_raise(|| ErrorKind::Io(root.to_path_buf()))?;
        let name = entry.file_name();
        let Some(hash) = name.to_str().and_then(parse_entry_name) else {
            continue;
        };
        files.push((hash, entry.path()));
    }
    files.sort_unstable();
    Ok(files)
}

fn parse_entry_name(name: &str) -> Option<u64> {
    let hex = name.strip_suffix(ENTRY_SUFFIX)?;
    match hex.len() == 16 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        true => u64::from_str_radix(hex, 16).ok(),
        false => None,
    }
}

/// A decoded EOF record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EofRecord {
    flags: u32,
    crc32: u32,
    stream_size: u32,
}

impl EofRecord {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let magic = LittleEndian::read_u64(bytes);
        if magic != EOF_MAGIC {
            exn::bail!(ErrorKind::format(format!("bad EOF record magic {magic:#018x}")));
        }
        Ok(Self {
            flags: LittleEndian::read_u32(&bytes[8..]),
            crc32: LittleEndian::read_u32(&bytes[12..]),
            stream_size: LittleEndian::read_u32(&bytes[16..]),
        })
    }

    fn crc32(&self) -> Option<u32> {
        (self.flags & FLAG_HAS_CRC32 != 0).then_some(self.crc32)
    }
}

fn read_at(file: &mut File, path: &Path, offset: u64, len: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset)).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let mut buffer = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut buffer).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    if (buffer.len() as u64) < len {
        exn::bail!(ErrorKind::format(format!("{} ends early", path.display())));
    }
    Ok(buffer)
}

#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
fn decode(hash: u64, path: &Path) -> Result<CacheEntry> {
    let mut file = File::open(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let file_len = file.metadata().or_raise(|| ErrorKind::Io(path.to_path_buf()))?.len();
    if file_len < HEADER_SIZE + 2 * EOF_SIZE {
        exn::bail!(ErrorKind::format(format!("entry file is {file_len} bytes")));
    }

    let header = read_at(&mut file, path, 0, HEADER_SIZE)?;
    let magic = LittleEndian::read_u64(&header);
    if magic != ENTRY_MAGIC {
        exn::bail!(ErrorKind::format(format!("bad entry magic {magic:#018x}")));
    }
    let version = LittleEndian::read_u32(&header[8..]);
    if !SUPPORTED_VERSIONS.contains(&version) {
        exn::bail!(ErrorKind::format(format!("unsupported entry version {version}")));
    }
    let key_len = u64::from(LittleEndian::read_u32(&header[12..]));
    let body_offset = HEADER_SIZE + key_len;

    // Stream 0 and its EOF record sit at the very end.
    let eof0_offset = file_len - EOF_SIZE;
    let eof0 = EofRecord::parse(&read_at(&mut file, path, eof0_offset, EOF_SIZE)?)?;
    let sha_len = match eof0.flags & FLAG_HAS_KEY_SHA256 != 0 {
        true => KEY_SHA256_SIZE,
        false => 0,
    };
    let info_size = u64::from(eof0.stream_size);
    let Some(info_offset) = eof0_offset.checked_sub(sha_len + info_size) else {
        exn::bail!(ErrorKind::format(format!("stream 0 of {info_size} bytes does not fit the file")));
    };
    let Some(eof1_offset) = info_offset.checked_sub(EOF_SIZE).filter(|o| *o >= body_offset) else {
        exn::bail!(ErrorKind::format("inconsistent stream sizes"));
    };
    let eof1 = EofRecord::parse(&read_at(&mut file, path, eof1_offset, EOF_SIZE)?)?;
    let body_size = eof1_offset - body_offset;
    if eof1.stream_size != 0 && u64::from(eof1.stream_size) != body_size {
        exn::bail!(ErrorKind::format(format!(
            "stream 1 declares {} bytes but spans {body_size}",
            eof1.stream_size
        )));
    }

    let key = read_at(&mut file, path, HEADER_SIZE, key_len)?;
    let key = String::from_utf8_lossy(&key).into_owned();
    let response = match info_size {
        0 => None,
        size => {
            let info = read_at(&mut file, path, info_offset, size)?;
            if let Some(expected) = eof0.crc32()
                && crc32fast::hash(&info) != expected
            {
                exn::bail!(ErrorKind::corruption("stream 0 checksum mismatch"));
            }
            Some(ResponseInfo::from_pickle(&info)?)
        },
    };
    let content_encoding = response.as_ref().and_then(|r| r.header("content-encoding")).map(str::to_string);
    let payload = match body_size {
        0 => sparse_payload(hash, path)?,
        size => PayloadRef::File { path: path.to_path_buf(), offset: body_offset, size, crc32: eof1.crc32() },
    };
    Ok(CacheEntry {
        hash: EntryHash::Simple(hash),
        url: url_from_key(&key).to_string(),
        key,
        response,
        content_encoding,
        payload,
        sparse_child: false,
    })
}

/// The ranges of the `_s` file next to an entry file, if there is one.
fn sparse_payload(hash: u64, path: &Path) -> Result<PayloadRef> {
    let sparse = path.with_file_name(format!("{hash:016x}{SPARSE_SUFFIX}"));
    if !sparse.is_file() {
        return Ok(PayloadRef::Empty);
    }
    let ranges = sparse_ranges(&sparse)?;
    tracing::debug!(path = %sparse.display(), ranges = ranges.len(), "entry has a sparse body");
    Ok(match ranges.is_empty() {
        true => PayloadRef::Empty,
        false => PayloadRef::Ranges { path: sparse, ranges },
    })
}

/// Read the range records of a `_s` file, ordered by body offset.
///
/// A range cut short by the end of the file ends the list. Ranges overlapping
/// an earlier one are dropped.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
fn sparse_ranges(path: &Path) -> Result<Vec<SparseRange>> {
    let mut file = File::open(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let file_len = file.metadata().or_raise(|| ErrorKind::Io(path.to_path_buf()))?.len();
    let header = read_at(&mut file, path, 0, HEADER_SIZE)?;
    let magic = LittleEndian::read_u64(&header);
    if magic != ENTRY_MAGIC {
        exn::bail!(ErrorKind::format(format!("bad sparse file magic {magic:#018x}")));
    }
    let mut position = HEADER_SIZE + u64::from(LittleEndian::read_u32(&header[12..]));

    let mut ranges = Vec::new();
    while position + SPARSE_RANGE_HEADER_SIZE <= file_len {
        let record = read_at(&mut file, path, position, SPARSE_RANGE_HEADER_SIZE)?;
        let magic = LittleEndian::read_u64(&record);
        if magic != SPARSE_RANGE_MAGIC {
            exn::bail!(ErrorKind::format(format!("bad sparse range magic {magic:#018x} at {position}")));
        }
        let (Ok(offset), Ok(len)) =
            (u64::try_from(LittleEndian::read_i64(&record[8..])), u64::try_from(LittleEndian::read_i64(&record[16..])))
        else {
            exn::bail!(ErrorKind::format(format!("negative sparse range at {position}")));
        };
        let file_offset = position + SPARSE_RANGE_HEADER_SIZE;
        if file_offset.checked_add(len).is_none_or(|end| end > file_len) {
            tracing::warn!(offset, len, "sparse range runs past the end of the file");
            break;
        }
        ranges.push(SparseRange { offset, file_offset, len, crc32: LittleEndian::read_u32(&record[24..]) });
        position = file_offset + len;
    }

    ranges.sort_by_key(|range| range.offset);
    let mut end = 0;
    ranges.retain(|range| {
        if range.offset < end {
            tracing::warn!(offset = range.offset, "dropping overlapping sparse range");
            return false;
        }
        end = range.offset.saturating_add(range.len);
        true
    });
    Ok(ranges)
}

fn open_range<'a>(path: &Path, range: SparseRange) -> Result<PayloadReader<'a>> {
    let mut file = File::open(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    file.seek(SeekFrom::Start(range.file_offset)).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let reader = BufReader::with_capacity(BUFFER_SIZE, file).take(range.len);
    Ok(Box::new(CrcReader::new(reader, range.crc32)))
}

impl CacheBackend for SimpleCache {
    fn format(&self) -> CacheFormat {
        CacheFormat::Simple
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn estimated_entries(&self) -> u64 {
        self.estimated
    }

    fn entries(&self) -> EntryIter<'_> {
        match entry_files(&self.root) {
            Ok(files) => Box::new(files.into_iter().map(|(hash, path)| {
                Ok(EntryRef { hash: EntryHash::Simple(hash), location: EntryLocation::File(path) })
            })),
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }

    fn open_entry(&self, entry: &EntryRef) -> Result<CacheEntry> {
        match (&entry.location, entry.hash) {
            (EntryLocation::File(path), EntryHash::Simple(hash)) => decode(hash, path),
            _ => exn::bail!(ErrorKind::format(format!("{} is not a simple cache entry", entry.hash))),
        }
    }

    fn payload(&self, entry: &CacheEntry) -> Result<PayloadReader<'_>> {
        match &entry.payload {
            PayloadRef::Empty => Ok(Box::new(io::empty())),
            PayloadRef::File { path, offset, size, crc32 } => {
                let mut file = File::open(path).or_raise(|| ErrorKind::Io(path.clone()))?;
                file.seek(SeekFrom::Start(*offset)).or_raise(|| ErrorKind::Io(path.clone()))?;
                let reader = BufReader::with_capacity(BUFFER_SIZE, file).take(*size);
                Ok(match crc32 {
                    Some(expected) => Box::new(CrcReader::new(reader, *expected)),
                    None => Box::new(reader),
                })
            },
            PayloadRef::Ranges { path, ranges } => {
                let mut segments = Vec::with_capacity(ranges.len() * 2);
                let mut position = 0;
                for &range in ranges {
                    if range.offset > position {
                        segments.push(Segment::Gap(range.offset - position));
                    }
                    let path = path.clone();
                    segments.push(Segment::Child(Box::new(move || open_range(&path, range))));
                    position = range.offset + range.len;
                }
                Ok(Box::new(SparseReader::new(segments)))
            },
            _ => exn::bail!(ErrorKind::format(format!("{} is not a simple cache payload", entry.hash))),
        }
    }
}

/// Checks a CRC32 of everything read once the inner reader is exhausted.
/// A mismatch is reported instead of the final end-of-stream.
struct CrcReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    expected: u32,
    done: bool,
}

impl<R: Read> CrcReader<R> {
    fn new(inner: R, expected: u32) -> Self {
        Self { inner, hasher: crc32fast::Hasher::new(), expected, done: false }
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
        } else if !buf.is_empty() && !self.done {
            self.done = true;
            let actual = self.hasher.clone().finalize();
            if actual != self.expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("stream checksum {actual:08x} does not match stored {:08x}", self.expected),
                ));
            }
        }
        Ok(n)
    }
}
