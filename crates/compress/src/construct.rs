use crate::Compression;
use std::fmt::{Display, Formatter, Result as FmtResult};

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl Compression {
    /// Returns the `Content-Encoding` token for this format.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "identity",
            #[cfg(feature = "brotli")]
            Compression::Brotli => "br",
            Compression::Deflate => "deflate",
            Compression::Gzip => "gzip",
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zstd",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case(Compression::None, "identity")]
    #[case(Compression::Deflate, "deflate")]
    #[case(Compression::Gzip, "gzip")]
    #[cfg_attr(feature = "brotli", case(Compression::Brotli, "br"))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd, "zstd"))]
    fn test_as_str(#[case] format: Compression, #[case] expected: &str) {
        assert_eq!(format.as_str(), expected);
        assert_eq!(format.to_string(), expected);
    }
}
