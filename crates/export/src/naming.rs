//! Output file names.
//!
//! Names come from the request URL, which is whatever the remote server or
//! the cache file says it is. Everything here assumes hostile input: the
//! result of [`sanitize`] is a single path component that is safe on every
//! platform we write to, and [`relative_path`] only ever joins such
//! components.

use crate::mime;
use crate::options::Layout;
use newmonkey_diskcache::EntryHash;
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use url::Url;

/// Longest file name we produce, in bytes. Most filesystems stop at 255.
pub const MAX_NAME_LEN: usize = 200;

/// Directory used in the grouped layout when a URL has no host.
const NO_HOST: &str = "unknown";
/// Grouped-layout directory for everything not served by Discord.
const OTHER: &str = "other";

const DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9", "LPT1", "LPT2",
    "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Turn an arbitrary string into a single, portable file name component.
///
/// Returns an empty string if nothing usable is left.
///
/// ```
/// use newmonkey_export::naming::sanitize;
///
/// assert_eq!(sanitize("cat.png"), "cat.png");
/// assert_eq!(sanitize("../../etc/passwd"), "_.._etc_passwd");
/// assert_eq!(sanitize("what?.gif"), "what_.gif");
/// assert_eq!(sanitize("con.txt"), "con_.txt");
/// assert_eq!(sanitize("..."), "");
/// ```
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let mut name = replaced.trim_start_matches('.').trim_end_matches(['.', ' ']).to_string();
    if name.trim().is_empty() {
        return String::new();
    }

    let stem_len = name.find('.').unwrap_or(name.len());
    if DEVICE_NAMES.iter().any(|device| name[..stem_len].eq_ignore_ascii_case(device)) {
        name.insert(stem_len, '_');
    }
    truncate(name)
}

/// Cap a name at [`MAX_NAME_LEN`] bytes on a character boundary, keeping a
/// short extension intact.
fn truncate(name: String) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let extension = match name.rfind('.') {
        Some(dot) if name.len() - dot <= 16 => &name[dot..],
        _ => "",
    };
    let stem = &name[..name.len() - extension.len()];
    let stem = &stem[..stem.floor_char_boundary(MAX_NAME_LEN - extension.len())];
    // Cutting may have exposed a trailing dot or space.
    format!("{}{extension}", stem.trim_end_matches(['.', ' ']))
}

/// The last path segment of a URL, percent-decoded. Query and fragment are
/// ignored.
fn last_segment(url: &str) -> String {
    let raw = match Url::parse(url) {
        Ok(parsed) => parsed.path_segments().and_then(|mut segments| segments.next_back()).unwrap_or("").to_string(),
        // Not every cache key is a well-formed URL.
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or("");
            path.rsplit('/').next().unwrap_or("").to_string()
        },
    };
    percent_decode_str(&raw).decode_utf8_lossy().into_owned()
}

/// Pick a file name for an entry.
///
/// In order of preference:
/// 1. the sanitized last URL path segment, with an extension for the
///    content type appended unless the segment already ends in a known one,
/// 2. `{hash}.{ext}` when the content type has a known extension,
/// 3. `{hash}`.
pub fn suggest_name(url: &str, hash: &EntryHash, content_type: &str) -> String {
    let extension = mime::extension(content_type);
    let name = sanitize(&last_segment(url));
    if !name.is_empty() {
        let has_extension = Path::new(&name).extension().and_then(|e| e.to_str()).is_some_and(mime::is_known_extension);
        return match extension {
            Some(extension) if !has_extension => truncate(format!("{name}.{extension}")),
            _ => name,
        };
    }
    match extension {
        Some(extension) => format!("{hash}.{extension}"),
        None => hash.to_string(),
    }
}

/// The URL's host, sanitized for use as a directory name.
pub fn host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = sanitize(parsed.host_str()?);
    match host.is_empty() {
        true => None,
        false => Some(host),
    }
}

/// What a Discord URL serves: the first path segment (`attachments`,
/// `avatars`, `emojis`, `stickers`…) of a Discord host. API calls and other
/// hosts have none.
pub fn discord_kind(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !parsed.host_str()?.to_ascii_lowercase().contains("discord") {
        return None;
    }
    let kind = sanitize(parsed.path_segments()?.next()?);
    match kind.as_str() {
        "" | "api" => None,
        _ => Some(kind),
    }
}

/// Where a file goes relative to the output root.
///
/// The grouped layout sorts by content category, then by Discord content
/// kind, with everything else under `other/{host}`.
///
/// ```
/// use newmonkey_export::Layout;
/// use newmonkey_export::naming::relative_path;
/// use std::path::Path;
///
/// let url = "https://media.discordapp.net/stickers/1.png";
/// assert_eq!(relative_path(Layout::Flat, "image/png", url, "1.png"), Path::new("1.png"));
/// assert_eq!(relative_path(Layout::Grouped, "image/png", url, "1.png"), Path::new("image/stickers/1.png"));
/// assert_eq!(
///     relative_path(Layout::Grouped, "image/png", "https://i.imgur.com/1.png", "1.png"),
///     Path::new("image/other/i.imgur.com/1.png"),
/// );
/// ```
pub fn relative_path(layout: Layout, content_type: &str, url: &str, name: &str) -> PathBuf {
    match layout {
        Layout::Flat => PathBuf::from(name),
        Layout::Grouped => {
            let category = match sanitize(mime::category(content_type)) {
                category if category.is_empty() => OTHER.to_string(),
                category => category,
            };
            match discord_kind(url) {
                Some(kind) => [category.as_str(), kind.as_str(), name].iter().collect(),
                None => {
                    let host = host(url).unwrap_or_else(|| NO_HOST.to_string());
                    [category.as_str(), OTHER, host.as_str(), name].iter().collect()
                },
            }
        },
    }
}
