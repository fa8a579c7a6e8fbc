//! Options consumed by the [`Exporter`](crate::Exporter).

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::str::FromStr;

/// How extracted files are arranged under the output root.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Everything in the root directory.
    #[default]
    #[display("flat")]
    Flat,
    /// `{type}/{discord kind}/{name}` (e.g. `image/attachments/cat.png`), or
    /// `{type}/other/{host}/{name}` for anything not served by Discord.
    #[display("grouped")]
    Grouped,
}

impl FromStr for Layout {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "grouped" => Ok(Self::Grouped),
            _ => exn::bail!(ErrorKind::Layout(s.to_string())),
        }
    }
}

/// One `type/subtype` pattern. Either half may be `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePattern {
    kind: String,
    subtype: String,
}

impl MimePattern {
    pub fn matches(&self, content_type: &str) -> bool {
        let (kind, subtype) = content_type.split_once('/').unwrap_or((content_type, ""));
        (self.kind == "*" || self.kind.eq_ignore_ascii_case(kind))
            && (self.subtype == "*" || self.subtype.eq_ignore_ascii_case(subtype))
    }
}

impl FromStr for MimePattern {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ErrorKind::Pattern(s.to_string());
        let (kind, subtype) = s.trim().split_once('/').ok_or_else(invalid)?;
        let valid = |part: &str| !part.is_empty() && !part.contains(['/', ';', ' ']);
        if !valid(kind) || !valid(subtype) || (kind == "*" && subtype != "*") {
            exn::bail!(invalid());
        }
        Ok(Self { kind: kind.to_ascii_lowercase(), subtype: subtype.to_ascii_lowercase() })
    }
}

/// The set of content types to export. An entry is kept if any pattern
/// matches.
///
/// ```
/// use newmonkey_export::ContentTypeFilter;
///
/// let filter = ContentTypeFilter::new(["image/*", "video/mp4"]).unwrap();
/// assert!(filter.matches("image/webp"));
/// assert!(filter.matches("video/mp4"));
/// assert!(!filter.matches("video/webm"));
/// assert!(ContentTypeFilter::new(["image"]).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeFilter(Vec<MimePattern>);

impl ContentTypeFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns.into_iter().map(|p| p.as_ref().parse()).collect::<Result<Vec<MimePattern>>>()?;
        Ok(Self(patterns))
    }

    /// Only `image/*`: what newmonkey exports unless told otherwise.
    pub fn images() -> Self {
        Self(vec![MimePattern { kind: "image".to_string(), subtype: "*".to_string() }])
    }

    pub fn matches(&self, content_type: &str) -> bool {
        self.0.iter().any(|pattern| pattern.matches(content_type))
    }
}

/// Everything the exporter needs to know besides where to read and write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Replace existing files instead of picking a `-N` name.
    pub overwrite: bool,
    /// `None` exports every content type.
    pub content_types: Option<ContentTypeFilter>,
    /// Entries processed at the same time.
    pub workers: NonZeroUsize,
    pub layout: Layout,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            overwrite: false,
            content_types: None,
            workers: default_workers(),
            layout: Layout::default(),
        }
    }
}

/// One worker per available core.
pub fn default_workers() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}
