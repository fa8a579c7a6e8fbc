//! Stored HTTP response info and cache keys.
//!
//! Stream 0 of every HTTP cache entry is a Chromium pickle of the response
//! metadata. Only the raw header block is of interest: it is a
//! length-prefixed string starting with `HTTP/`, holding NUL-separated lines.

use crate::error::{ErrorKind, Result};
use memchr::memmem;
use tracing::instrument;

const PICKLE_HEADER_SIZE: usize = 4;
const STATUS_PREFIX: &[u8] = b"HTTP/";

/// Response status and headers, in stored order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: u16,
    pub status_line: String,
    /// Duplicates (e.g. `Set-Cookie`) are kept, in the order they were stored.
    pub headers: Vec<(String, String)>,
}

impl ResponseInfo {
    /// First value of the named header, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// All values of the named header, case-insensitively, in order.
    pub fn headers_named<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.headers.iter().filter(move |(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode a serialized response info pickle.
    #[instrument(level = "trace", skip(data), fields(size = data.len()))]
    pub fn from_pickle(data: &[u8]) -> Result<Self> {
        let Some(size) = data.get(..PICKLE_HEADER_SIZE) else {
            exn::bail!(ErrorKind::format("response info shorter than its pickle header"));
        };
        let declared = u32::from_le_bytes([size[0], size[1], size[2], size[3]]) as usize;
        let Some(payload) = data.get(PICKLE_HEADER_SIZE..PICKLE_HEADER_SIZE.saturating_add(declared)) else {
            exn::bail!(ErrorKind::format(format!(
                "response info declares {declared} bytes but holds {}",
                data.len() - PICKLE_HEADER_SIZE
            )));
        };
        if let Some(flags) = payload.get(..4) {
            tracing::trace!(version = flags[0], "response info flags");
        }
        Self::from_raw_headers(find_raw_headers(payload)?)
    }

    /// Parse a NUL-separated raw header block.
    pub fn from_raw_headers(raw: &[u8]) -> Result<Self> {
        let mut lines = raw.split(|b| *b == 0).map(String::from_utf8_lossy);
        let status_line = lines.next().unwrap_or_default().trim().to_string();
        let status = parse_status(&status_line)?;
        let mut headers = Vec::new();
        for line in lines.take_while(|l| !l.is_empty()) {
            match line.split_once(':') {
                Some((name, value)) => headers.push((name.trim().to_string(), value.trim().to_string())),
                None => tracing::trace!(%line, "ignoring header line without a colon"),
            }
        }
        Ok(Self { status, status_line, headers })
    }
}

/// The header block is the first pickled string (4-byte aligned, u32
/// length-prefixed) whose contents start with `HTTP/`.
fn find_raw_headers(payload: &[u8]) -> Result<&[u8]> {
    for start in memmem::find_iter(payload, STATUS_PREFIX) {
        if start < 4 || start % 4 != 0 {
            continue;
        }
        let len = &payload[start - 4..start];
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        if let Some(raw) = payload.get(start..start.saturating_add(len)) {
            return Ok(raw);
        }
    }
    exn::bail!(ErrorKind::format("response info holds no HTTP header block"))
}

fn parse_status(line: &str) -> Result<u16> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next().map(str::parse::<u16>)) {
        (Some(version), Some(Ok(status))) if version.starts_with("HTTP/") => Ok(status),
        _ => exn::bail!(ErrorKind::format(format!("malformed status line {line:?}"))),
    }
}

/// Recover the request URL from a cache key.
///
/// Keys can be prefixed by `{digit}/{digit}/` flags and by a network
/// isolation key (`_dk_{site} {site} {url}`); the URL is always the last
/// space-separated token.
///
/// ```
/// use newmonkey_diskcache::url_from_key;
///
/// assert_eq!(url_from_key("https://example.com/a.png"), "https://example.com/a.png");
/// assert_eq!(
///     url_from_key("1/0/_dk_https://discord.com https://discord.com https://cdn.discordapp.com/x.png"),
///     "https://cdn.discordapp.com/x.png",
/// );
/// ```
#[must_use]
pub fn url_from_key(key: &str) -> &str {
    let token = key.split_whitespace().last().unwrap_or(key);
    let token = strip_numeric_prefix(token);
    token.strip_prefix("_dk_").unwrap_or(token)
}

fn strip_numeric_prefix(mut key: &str) -> &str {
    for _ in 0..2 {
        match key.split_once('/') {
            Some((head, tail)) if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) => key = tail,
            _ => break,
        }
    }
    key
}
