//! Encoders and decoders behind [`Compression`].

use crate::Compression;
use crate::error::{ErrorKind, Result};
use crate::util::is_zlib_header;
#[cfg(feature = "brotli")]
use brotli::{CompressorWriter as BrotliEncoder, Decompressor as BrotliDecoder};
use exn::ResultExt;
use flate2::Compression as FlateLevel;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io::{BufRead, BufReader, Read, Write};
use tracing::instrument;
#[cfg(feature = "zstd")]
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

#[cfg(feature = "brotli")]
const BROTLI_BUFFER_SIZE: usize = 4096;
#[cfg(feature = "brotli")]
const BROTLI_QUALITY: u32 = 5;
#[cfg(feature = "brotli")]
const BROTLI_WINDOW_BITS: u32 = 22;

/// A decoder stacked over a payload stream.
pub type DecodingReader<'a> = Box<dyn Read + Send + 'a>;

impl Compression {
    /// Encode `input` in memory, the way a server would before sending it.
    ///
    /// Only cache fixtures need this; nothing is ever written back encoded.
    ///
    /// ```
    /// use newmonkey_compress::Compression;
    ///
    /// let encoded = Compression::Gzip.compress(b"cached body").unwrap();
    /// assert!(encoded.starts_with(&[0x1F, 0x8B]));
    /// ```
    #[instrument(level = "trace", skip(input), fields(format = %self, input_size = input.len()))]
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match self {
            Self::None => output.extend_from_slice(input),
            #[cfg(feature = "brotli")]
            Self::Brotli => {
                let mut encoder =
                    BrotliEncoder::new(&mut output, BROTLI_BUFFER_SIZE, BROTLI_QUALITY, BROTLI_WINDOW_BITS);
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                // Finished on drop.
                drop(encoder);
            },
            // HTTP `deflate` means a zlib stream.
            Self::Deflate => {
                let mut encoder = ZlibEncoder::new(&mut output, FlateLevel::default());
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?;
            },
            Self::Gzip => {
                let mut encoder = GzEncoder::new(&mut output, FlateLevel::default());
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?;
            },
            #[cfg(feature = "zstd")]
            Self::Zstd => {
                let mut encoder = ZstdEncoder::new(&mut output, 0).or_raise(|| ErrorKind::Encoder)?;
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?;
            },
        }
        Ok(output)
    }

    /// Put a decoder for this encoding in front of `reader`.
    ///
    /// Decoding errors only show up once the returned reader is read from.
    /// For [`Deflate`](Self::Deflate) the first bytes decide between a zlib
    /// stream and the raw deflate some servers send instead.
    ///
    /// ```
    /// use newmonkey_compress::Compression;
    /// use std::io::{Cursor, Read};
    ///
    /// let encoded = Compression::Deflate.compress(b"cached body").unwrap();
    /// let mut decoded = Vec::new();
    /// Compression::Deflate.wrap_reader(Cursor::new(encoded)).unwrap().read_to_end(&mut decoded).unwrap();
    /// assert_eq!(decoded, b"cached body");
    /// ```
    pub fn wrap_reader<'a, R: Read + Send + 'a>(&self, reader: R) -> Result<DecodingReader<'a>> {
        Ok(match self {
            Self::None => Box::new(reader),
            #[cfg(feature = "brotli")]
            Self::Brotli => Box::new(BrotliDecoder::new(reader, BROTLI_BUFFER_SIZE)),
            Self::Deflate => {
                let mut buffered = BufReader::new(reader);
                if is_zlib_header(buffered.fill_buf().or_raise(|| ErrorKind::InvalidData)?) {
                    Box::new(ZlibDecoder::new(buffered))
                } else {
                    Box::new(DeflateDecoder::new(buffered))
                }
            },
            Self::Gzip => Box::new(GzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Self::Zstd => Box::new(ZstdDecoder::new(reader).or_raise(|| ErrorKind::Encoder)?),
        })
    }

    /// Stack decoders for a chain of encodings in the order they were
    /// applied (see [`from_content_encoding`](Self::from_content_encoding)),
    /// so the last one applied is undone first.
    pub fn wrap_reader_chain<'a>(chain: &[Compression], reader: DecodingReader<'a>) -> Result<DecodingReader<'a>> {
        chain.iter().rev().try_fold(reader, |reader, format| format.wrap_reader(reader))
    }
}
