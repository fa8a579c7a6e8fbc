//! Sparse entries.
//!
//! Media fetched with range requests is stored as a parent entry whose
//! stream 2 holds a header and a bitmap of 1 MiB children. Each child is an
//! ordinary entry with a derived key, holding its slice of the body in
//! stream 1.

use crate::error::{ErrorKind, Result};
use crate::PayloadReader;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;
use std::io::{self, Read};

pub const SPARSE_MAGIC: u32 = 0xC103_CAC3;
pub const SPARSE_HEADER_SIZE: usize = 64;
pub const CHILD_SHIFT: u32 = 20;
pub const CHILD_SIZE: u64 = 1 << CHILD_SHIFT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseHeader {
    pub signature: i64,
    pub parent_key_len: i32,
    /// Present children, ascending.
    pub children: Vec<u32>,
}

impl SparseHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < SPARSE_HEADER_SIZE {
            exn::bail!(ErrorKind::format(format!("sparse header is {} bytes", data.len())));
        }
        let magic = LittleEndian::read_u32(&data[8..]);
        if magic != SPARSE_MAGIC {
            exn::bail!(ErrorKind::format(format!("bad sparse header magic {magic:#010x}")));
        }
        let children = data[SPARSE_HEADER_SIZE..]
            .iter()
            .enumerate()
            .flat_map(|(byte, bits)| {
                (0..8).filter(move |bit| bits & (1 << bit) != 0).map(move |bit| (byte * 8 + bit) as u32)
            })
            .collect();
        Ok(Self {
            signature: LittleEndian::read_i64(data),
            parent_key_len: LittleEndian::read_i32(&data[12..]),
            children,
        })
    }
}

/// Key of child `index` of the parent stored under `parent_key`.
///
/// ```
/// use newmonkey_diskcache::blockfile::child_key;
///
/// assert_eq!(child_key("https://example.com/v.mp4", 0x1f, 10), "Range_https://example.com/v.mp4:1f:a");
/// ```
#[must_use]
pub fn child_key(parent_key: &str, signature: i64, index: u32) -> String {
    format!("Range_{parent_key}:{signature:x}:{index:x}")
}

/// Byte offset of child `index` in the stitched body.
#[must_use]
pub fn child_offset(index: u32) -> u64 {
    u64::from(index) << CHILD_SHIFT
}

/// One piece of a stitched sparse body.
pub enum Segment<'a> {
    /// Bytes nobody stored, emitted as zeros.
    Gap(u64),
    /// A child whose reader is opened only once the previous segments are
    /// drained.
    Child(Box<dyn FnOnce() -> Result<PayloadReader<'a>> + Send + 'a>),
}

/// Concatenates segments, opening each child lazily.
pub struct SparseReader<'a> {
    segments: VecDeque<Segment<'a>>,
    current: Option<PayloadReader<'a>>,
}

impl<'a> SparseReader<'a> {
    pub fn new(segments: impl IntoIterator<Item = Segment<'a>>) -> Self {
        Self { segments: segments.into_iter().collect(), current: None }
    }
}

impl Read for SparseReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                match reader.read(buf)? {
                    0 => self.current = None,
                    n => return Ok(n),
                }
            }
            match self.segments.pop_front() {
                None => return Ok(0),
                Some(Segment::Gap(len)) => self.current = Some(Box::new(io::repeat(0).take(len))),
                Some(Segment::Child(open)) => {
                    let reader = open().map_err(|err| io::Error::new(io::ErrorKind::InvalidData, (*err).to_string()))?;
                    self.current = Some(reader);
                },
            }
        }
    }
}
