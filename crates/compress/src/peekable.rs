//! Buffer the start of a decoded payload so its type can be sniffed before
//! the whole thing is streamed to disk.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::{Chain, Cursor, Read};

/// A [`Read`]er whose first bytes can be inspected without being lost.
///
/// ```
/// use newmonkey_compress::{Compression, PeekableReader};
/// use std::io::{Cursor, Read};
///
/// let body = Compression::Gzip.compress(b"\x89PNG\r\n\x1a\n...").unwrap();
/// let mut reader = PeekableReader::new(Compression::Gzip.wrap_reader(Cursor::new(body)).unwrap());
/// assert!(reader.peek(8).unwrap().starts_with(b"\x89PNG"));
///
/// let mut decoded = Vec::new();
/// reader.into_reader().read_to_end(&mut decoded).unwrap();
/// assert_eq!(decoded, b"\x89PNG\r\n\x1a\n...");
/// ```
pub struct PeekableReader<R> {
    inner: R,
    head: Vec<u8>,
}

impl<R: Read> PeekableReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, head: Vec::new() }
    }

    /// Buffer up to `limit` bytes and return them. Shorter only at the end
    /// of the stream; asking again for less than is buffered reads nothing.
    ///
    /// Any read failure is [`InvalidData`](ErrorKind::InvalidData): behind a
    /// decoder, a corrupt stream and a failing read look the same.
    pub fn peek(&mut self, limit: usize) -> Result<&[u8]> {
        if self.head.len() < limit {
            let wanted = (limit - self.head.len()) as u64;
            (&mut self.inner).take(wanted).read_to_end(&mut self.head).or_raise(|| ErrorKind::InvalidData)?;
        }
        Ok(&self.head[..self.head.len().min(limit)])
    }

    /// Everything buffered so far.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Replay the buffered head, then continue with the rest of the stream.
    pub fn into_reader(self) -> Chain<Cursor<Vec<u8>>, R> {
        Cursor::new(self.head).chain(self.inner)
    }
}
