//! Content types: header parsing, magic-byte sniffing and file extensions.

/// Fallback when neither the headers nor the bytes say what something is.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// How many decoded bytes are buffered for [`sniff`].
pub const SNIFF_LEN: usize = 512;

/// The `type/subtype` part of a `Content-Type` header value, lowercased.
///
/// ```
/// use newmonkey_export::mime::essence;
///
/// assert_eq!(essence("Image/PNG").as_deref(), Some("image/png"));
/// assert_eq!(essence("text/html; charset=utf-8").as_deref(), Some("text/html"));
/// assert_eq!(essence("garbage"), None);
/// ```
pub fn essence(header: &str) -> Option<String> {
    let value = header.split(';').next()?.trim().to_ascii_lowercase();
    let (kind, subtype) = value.split_once('/')?;
    let valid = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_graphic() && b != b'/');
    match valid(kind) && valid(subtype) {
        true => Some(value),
        false => None,
    }
}

/// The part before the slash: `image`, `video`, `text`…
pub fn category(content_type: &str) -> &str {
    content_type.split_once('/').map_or(content_type, |(kind, _)| kind)
}

type Signature = (&'static [u8], usize, &'static str);

// (magic, offset, content type), first match wins.
const SIGNATURES: &[Signature] = &[
    (b"\x89PNG\r\n\x1a\n", 0, "image/png"),
    (b"\xFF\xD8\xFF", 0, "image/jpeg"),
    (b"GIF87a", 0, "image/gif"),
    (b"GIF89a", 0, "image/gif"),
    (b"WEBP", 8, "image/webp"),
    (b"WAVE", 8, "audio/wav"),
    (b"AVI ", 8, "video/x-msvideo"),
    (b"ftypavif", 4, "image/avif"),
    (b"ftypheic", 4, "image/heic"),
    (b"ftypqt", 4, "video/quicktime"),
    (b"ftypM4A", 4, "audio/mp4"),
    (b"ftyp", 4, "video/mp4"),
    (b"\x1A\x45\xDF\xA3", 0, "video/webm"),
    (b"\x00\x00\x01\x00", 0, "image/x-icon"),
    (b"BM", 0, "image/bmp"),
    (b"OggS", 0, "audio/ogg"),
    (b"fLaC", 0, "audio/flac"),
    (b"ID3", 0, "audio/mpeg"),
    (b"%PDF-", 0, "application/pdf"),
    (b"PK\x03\x04", 0, "application/zip"),
    (b"\x1F\x8B", 0, "application/gzip"),
    (b"\x00asm", 0, "application/wasm"),
    (b"wOFF", 0, "font/woff"),
    (b"wOF2", 0, "font/woff2"),
    (b"OTTO", 0, "font/otf"),
    (b"\x00\x01\x00\x00\x00", 0, "font/ttf"),
];

/// Guess a content type from the first bytes of a payload.
///
/// Binary formats are matched on their magic numbers. Text is told apart by
/// its first non-blank characters (markup, JSON) or else reported as
/// `text/plain` if it is valid UTF-8 without control characters.
///
/// ```
/// use newmonkey_export::mime::sniff;
///
/// assert_eq!(sniff(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), Some("image/png"));
/// assert_eq!(sniff(b"  <svg xmlns=\"http://www.w3.org/2000/svg\"/>"), Some("image/svg+xml"));
/// assert_eq!(sniff(b"\x00\x13\x37"), None);
/// ```
pub fn sniff(head: &[u8]) -> Option<&'static str> {
    if head.is_empty() {
        return None;
    }
    for (magic, offset, content_type) in SIGNATURES {
        if head.len() >= offset + magic.len() && &head[*offset..offset + magic.len()] == *magic {
            // RIFF containers share the outer magic; the form type at 8 decides.
            if *offset == 8 && !head.starts_with(b"RIFF") {
                continue;
            }
            return Some(*content_type);
        }
    }
    // MPEG audio frame sync without an ID3 tag.
    if head.len() >= 2 && head[0] == 0xFF && head[1] & 0xE0 == 0xE0 {
        return Some("audio/mpeg");
    }
    sniff_text(head)
}

fn sniff_text(head: &[u8]) -> Option<&'static str> {
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        // The sniff window may cut a multi-byte character in half.
        Err(err) if err.error_len().is_none() => std::str::from_utf8(&head[..err.valid_up_to()]).ok()?,
        Err(_) => return None,
    };
    let text = text.trim_start_matches('\u{FEFF}').trim_start();
    if text.is_empty() || text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return None;
    }
    let lower = text.get(..text.len().min(64)).unwrap_or(text).to_ascii_lowercase();
    if lower.starts_with("<svg") || (lower.starts_with("<?xml") && text.contains("<svg")) {
        return Some("image/svg+xml");
    }
    if lower.starts_with("<!doctype html") || lower.starts_with("<html") || lower.starts_with("<head") {
        return Some("text/html");
    }
    if lower.starts_with("<?xml") {
        return Some("application/xml");
    }
    if lower.starts_with('{') || lower.starts_with('[') {
        return Some("application/json");
    }
    Some("text/plain")
}

/// Preferred file extension (without the dot) for a content type.
///
/// ```
/// use newmonkey_export::mime::extension;
///
/// assert_eq!(extension("image/jpeg"), Some("jpg"));
/// assert_eq!(extension("application/x-unheard-of"), None);
/// ```
pub fn extension(content_type: &str) -> Option<&'static str> {
    Some(match content_type {
        "image/png" | "image/apng" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/heic" => "heic",
        "image/bmp" => "bmp",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "image/svg+xml" => "svg",
        "image/tiff" => "tiff",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "video/x-msvideo" => "avi",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" => "m4a",
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/flac" => "flac",
        "text/html" => "html",
        "text/css" => "css",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "text/javascript" | "application/javascript" | "application/x-javascript" => "js",
        "application/json" | "application/manifest+json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/gzip" => "gz",
        "application/wasm" => "wasm",
        "font/woff" | "application/font-woff" => "woff",
        "font/woff2" => "woff2",
        "font/ttf" => "ttf",
        "font/otf" => "otf",
        _ => return None,
    })
}

/// Whether `extension` (without the dot, any case) names a file type we know.
///
/// ```
/// use newmonkey_export::mime::is_known_extension;
///
/// assert!(is_known_extension("PNG"));
/// assert!(is_known_extension("jpeg"));
/// assert!(!is_known_extension("2"));
/// ```
pub fn is_known_extension(extension: &str) -> bool {
    matches!(
        extension.to_ascii_lowercase().as_str(),
        "png" | "apng" | "jpg" | "jpeg" | "jpe" | "jfif" | "gif" | "webp" | "avif" | "heic" | "heif" | "bmp"
            | "ico" | "svg" | "tif" | "tiff" | "mp4" | "m4v" | "webm" | "mov" | "avi" | "mkv" | "mp3" | "m4a"
            | "aac" | "ogg" | "oga" | "ogv" | "opus" | "wav" | "flac" | "html" | "htm" | "css" | "txt" | "csv"
            | "js" | "mjs" | "json" | "map" | "xml" | "pdf" | "zip" | "gz" | "wasm" | "woff" | "woff2" | "ttf"
            | "otf" | "lottie"
    )
}
