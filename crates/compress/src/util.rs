use crate::Compression;
use crate::error::{Error, ErrorKind, Result};
use std::str::FromStr;

impl FromStr for Compression {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "identity" | "none" => Ok(Compression::None),
            #[cfg(feature = "brotli")]
            "br" | "brotli" => Ok(Compression::Brotli),
            #[cfg(not(feature = "brotli"))]
            "br" | "brotli" => exn::bail!(ErrorKind::DisabledFormat(s.to_string())),
            "deflate" => Ok(Compression::Deflate),
            "gzip" | "x-gzip" => Ok(Compression::Gzip),
            #[cfg(feature = "zstd")]
            "zstd" => Ok(Compression::Zstd),
            #[cfg(not(feature = "zstd"))]
            "zstd" => exn::bail!(ErrorKind::DisabledFormat(s.to_string())),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}
impl Compression {
    /// Parse a `Content-Encoding` header value into the list of encodings in
    /// the order they were *applied*. `identity` tokens are dropped, so an
    /// empty list means the body is stored as-is.
    ///
    /// Decoding must walk the list in reverse.
    ///
    /// ```
    /// use newmonkey_compress::Compression;
    ///
    /// let chain = Compression::from_content_encoding("deflate, gzip").unwrap();
    /// assert_eq!(chain, vec![Compression::Deflate, Compression::Gzip]);
    /// assert!(Compression::from_content_encoding("identity").unwrap().is_empty());
    /// assert!(Compression::from_content_encoding("sdch").is_err());
    /// ```
    pub fn from_content_encoding(value: &str) -> Result<Vec<Self>> {
        let mut chain = Vec::new();
        for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token.parse::<Compression>()? {
                Compression::None => {},
                format => chain.push(format),
            }
        }
        Ok(chain)
    }
}

/// HTTP `deflate` should be zlib-wrapped, but some servers send raw
/// deflate. A zlib stream starts with CMF/FLG: compression method 8 and a header
/// checksum making the big-endian pair a multiple of 31.
pub(crate) fn is_zlib_header(bytes: &[u8]) -> bool {
    match bytes {
        [cmf, flg, ..] => cmf & 0x0F == 8 && cmf >> 4 <= 7 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}
