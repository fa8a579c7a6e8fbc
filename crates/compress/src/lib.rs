//! Decoding of HTTP `Content-Encoding`s.
//!
//! Chromium stores response bodies exactly as they came off the wire, so a
//! cached script or image is frequently still gzip/brotli/zstd encoded. This
//! crate parses `Content-Encoding` header values into a chain of
//! [`Compression`]s ([`Compression::from_content_encoding`]), stacks the
//! matching decoders over a reader ([`Compression::wrap_reader_chain`]) and
//! lets the caller sniff the decoded head before streaming the rest
//! ([`PeekableReader`]). In-memory [`Compression::compress`] exists to build
//! encoded fixtures.
//!
//! Gzip and Deflate are always available. Brotli and Zstd are behind feature
//! flags (enabled by default).

mod construct;
pub mod error;
mod ops;
mod peekable;
mod util;

pub use crate::ops::DecodingReader;
pub use crate::peekable::PeekableReader;

/// A supported content encoding.
///
/// Variants gated behind feature flags (`brotli`, `zstd`) are only available
/// when the corresponding feature is enabled. Defaults to
/// [`None`](Self::None) (`identity`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Not encoded (`identity`)
    #[default]
    None,
    /// Brotli (`br`)
    #[cfg(feature = "brotli")]
    Brotli,
    /// Zlib-wrapped or raw deflate (`deflate`)
    Deflate,
    /// Gzip (`gzip`, `x-gzip`)
    Gzip,
    /// Zstandard (`zstd`)
    #[cfg(feature = "zstd")]
    Zstd,
}

#[cfg(test)]
mod tests {
    use crate::Compression;

    #[test]
    fn compression_default() {
        assert_eq!(Compression::default(), Compression::None);
    }
}
