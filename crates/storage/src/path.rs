//! Path validation.
//!
//! Output names are derived from URLs found in the cache, which are
//! attacker-controlled as far as we're concerned. Every relative path is
//! normalized here before it is joined onto the output root.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize a relative output path, refusing anything that would leave the
/// output root (`..` past the top, absolute prefixes, NUL bytes) or that
/// normalizes to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use newmonkey_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("image/cdn.discordapp.com/cat.png").is_ok());
/// assert!(validate_path("a/../cat.png").is_ok()); // (never leaves the root)
/// // Invalid paths
/// assert!(validate_path("../../etc/passwd").is_err());
/// assert!(validate_path("image/../../cat.png").is_err());
/// assert!(validate_path("cat\0.png").is_err());
/// // Paths get resolved
/// assert_eq!(validate_path("/image/./png//cat.png").unwrap(), Path::new("image/png/cat.png"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(path.to_path_buf());
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Slips through Path::components() on Unix, truncates in syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            // A leading slash is treated as the output root itself.
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.into_iter().collect()),
    }
}

/// Validate `relative` and join it onto `root`.
pub(crate) fn join_under(root: &Path, relative: impl AsRef<Path>) -> Result<(PathBuf, PathBuf)> {
    let relative = validate(relative)?;
    let absolute = root.join(&relative);
    if !absolute.starts_with(root) {
        exn::bail!(ErrorKind::InvalidPath(relative));
    }
    Ok((relative, absolute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("cat.png", "cat.png")]
    #[case("image/cdn.discordapp.com/cat.png", "image/cdn.discordapp.com/cat.png")]
    #[case("a//b//c.gif", "a/b/c.gif")]
    #[case("a/./b/./c.gif", "a/b/c.gif")]
    #[case("image/png/..", "image")]
    #[case("video/", "video")]
    #[case("/rooted.png", "rooted.png")]
    fn test_normalized(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[cfg(windows)]
    #[test]
    fn test_backslash_normalization() {
        assert_eq!(validate(Path::new("a\\b\\c.png")).unwrap(), Path::new("a/b/c.png"));
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("../../etc/passwd")]
    #[case("image/../../passwd")]
    #[case("..")]
    #[case("cat\0.png")]
    #[case("")]
    #[case(".")]
    #[case("./.")]
    #[case("//")]
    fn test_rejected(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_join_under() {
        let root = Path::new("/srv/out");
        let (relative, absolute) = join_under(root, "image/../cat.png").unwrap();
        assert_eq!(relative, Path::new("cat.png"));
        assert_eq!(absolute, Path::new("/srv/out/cat.png"));
        assert!(join_under(root, "../cat.png").is_err());
    }
}
