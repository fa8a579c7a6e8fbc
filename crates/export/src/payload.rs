//! Payload extraction: undo the content encoding, sniff, stream to disk.
//!
//! A payload that won't decode is never lost. If the decoders can't be built,
//! choke on the first bytes, or fail halfway through, whatever was written is
//! thrown away and the stored bytes are written instead, with a warning.

use crate::error::{ErrorKind, Result};
use crate::mime::SNIFF_LEN;
use newmonkey_compress::{Compression, PeekableReader};
use newmonkey_diskcache::{CacheBackend, CacheEntry, PayloadReader};
use newmonkey_storage::PendingFile;
use std::io;
use tracing::instrument;

/// An open payload with its first [`SNIFF_LEN`] bytes buffered.
pub(crate) struct Payload<'a> {
    cache: &'a dyn CacheBackend,
    entry: &'a CacheEntry,
    reader: PeekableReader<PayloadReader<'a>>,
    /// Whether `reader` runs through content decoders.
    decoded: bool,
    warning: Option<String>,
}

/// What ended up on disk.
#[derive(Debug)]
pub(crate) struct Written {
    pub bytes: u64,
    pub warning: Option<String>,
}

impl<'a> Payload<'a> {
    /// Open the payload of `entry`, decoding it if the stored response says
    /// it is content-encoded.
    #[instrument(level = "trace", skip_all, fields(hash = %entry.hash, encoding = entry.content_encoding.as_deref()))]
    pub(crate) fn open(cache: &'a dyn CacheBackend, entry: &'a CacheEntry) -> Result<Self> {
        let Some(encoding) = entry.content_encoding.as_deref() else {
            return Self::raw(cache, entry, None);
        };
        let chain = match Compression::from_content_encoding(encoding) {
            Ok(chain) if chain.is_empty() => return Self::raw(cache, entry, None),
            Ok(chain) => chain,
            Err(err) => {
                tracing::warn!(hash = %entry.hash, encoding, error = %*err, "keeping payload as stored");
                return Self::raw(cache, entry, Some(format!("{}, kept encoded bytes", *err)));
            },
        };

        let stored = cache.payload(entry).map_err(ErrorKind::cache)?;
        let failure = match Compression::wrap_reader_chain(&chain, stored) {
            Ok(decoder) => {
                let mut reader = PeekableReader::new(decoder);
                match reader.peek(SNIFF_LEN).map(|_| ()) {
                    Ok(()) => return Ok(Self { cache, entry, reader, decoded: true, warning: None }),
                    Err(err) => (*err).to_string(),
                }
            },
            Err(err) => (*err).to_string(),
        };
        tracing::warn!(hash = %entry.hash, encoding, error = %failure, "cannot decode payload, keeping it as stored");
        Self::raw(cache, entry, Some(format!("cannot decode {encoding} ({failure}), kept encoded bytes")))
    }

    fn raw(cache: &'a dyn CacheBackend, entry: &'a CacheEntry, warning: Option<String>) -> Result<Self> {
        let stored = cache.payload(entry).map_err(ErrorKind::cache)?;
        let mut reader = PeekableReader::new(stored);
        if let Err(err) = reader.peek(SNIFF_LEN) {
            exn::bail!(ErrorKind::Payload((*err).to_string()));
        }
        Ok(Self { cache, entry, reader, decoded: false, warning })
    }

    /// Up to [`SNIFF_LEN`] bytes from the start of the (decoded) payload.
    pub(crate) fn head(&self) -> &[u8] {
        self.reader.head()
    }

    pub(crate) fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// Stream the whole payload into `file`.
    ///
    /// A decoder failing part way through restarts the file from scratch
    /// with the stored bytes.
    pub(crate) fn write_to(self, file: &mut PendingFile) -> Result<Written> {
        let Self { cache, entry, reader, decoded, warning } = self;
        match io::copy(&mut reader.into_reader(), file) {
            Ok(bytes) => Ok(Written { bytes, warning }),
            Err(err) if decoded => {
                tracing::warn!(hash = %entry.hash, error = %err, "payload stopped decoding, keeping it as stored");
                file.truncate().map_err(ErrorKind::output)?;
                let mut stored = cache.payload(entry).map_err(ErrorKind::cache)?;
                let bytes = io::copy(&mut stored, file).map_err(ErrorKind::payload)?;
                let encoding = entry.content_encoding.as_deref().unwrap_or_default();
                Ok(Written { bytes, warning: Some(format!("cannot decode {encoding} ({err}), kept encoded bytes")) })
            },
            Err(err) => Err(ErrorKind::payload(err)),
        }
    }
}
