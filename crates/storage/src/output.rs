//! The output root: name reservation and atomic writes.

use crate::error::{ErrorKind, Result};
use crate::path::join_under;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::instrument;

/// Upper bound on `-N` suffixes tried before giving up on a name.
const MAX_DISAMBIGUATION: u32 = 100_000;

/// Directory that extracted files are written into.
///
/// Holds the output namespace: every relative path handed out during this
/// run. The namespace only ever grows.
#[derive(Debug)]
pub struct OutputRoot {
    root: PathBuf,
    overwrite: bool,
    namespace: Mutex<HashSet<PathBuf>>,
}

/// A name handed out by [`OutputRoot::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Path relative to the output root.
    pub relative: PathBuf,
    /// Absolute destination path.
    pub path: PathBuf,
}

impl OutputRoot {
    /// Open (creating if needed) the output directory.
    ///
    /// With `overwrite`, names are never disambiguated and existing files are
    /// replaced on commit.
    pub fn open(root: impl AsRef<Path>, overwrite: bool) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| ErrorKind::from_io(e, root))?;
        // Resolve symlinks once so the containment check compares like with like.
        let root = root.canonicalize().map_err(|e| ErrorKind::from_io(e, root))?;
        if !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        Ok(Self { root, overwrite, namespace: Mutex::new(HashSet::new()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Reserve a destination for `candidate`, a path relative to the root.
    ///
    /// Without overwrite, a name already handed out this run or already on
    /// disk gets a `-2`, `-3`, … suffix before its extension. The check and
    /// the insert happen under one lock, so concurrent callers always get
    /// distinct names.
    #[instrument(
        level = "debug",
        skip(self, candidate),
        fields(candidate = %candidate.as_ref().display(), reserved = tracing::field::Empty)
    )]
    pub fn reserve(&self, candidate: impl AsRef<Path>) -> Result<Reservation> {
        let (relative, path) = join_under(&self.root, candidate)?;
        let mut namespace = self.namespace.lock();
        if self.overwrite {
            namespace.insert(relative.clone());
            return Ok(Reservation { relative, path });
        }
        for n in 1..=MAX_DISAMBIGUATION {
            let relative = disambiguate(&relative, n);
            let path = self.root.join(&relative);
            if namespace.contains(&relative) || path.symlink_metadata().is_ok() {
                continue;
            }
            namespace.insert(relative.clone());
            tracing::Span::current().record("reserved", relative.display().to_string());
            return Ok(Reservation { relative, path });
        }
        exn::bail!(ErrorKind::AlreadyExists(path))
    }

    /// Number of names handed out so far.
    pub fn reserved(&self) -> usize {
        self.namespace.lock().len()
    }

    /// Start writing a reserved file. Parent directories are created; the
    /// bytes go to a temporary file next to the destination.
    pub fn create(&self, reservation: &Reservation) -> Result<PendingFile> {
        let parent = reservation.path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent).map_err(|e| ErrorKind::from_io(e, parent))?;
        let temp = tempfile::Builder::new()
            .prefix(".newmonkey-")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(|e| ErrorKind::from_io(e, parent))?;
        Ok(PendingFile { temp, target: reservation.path.clone(), overwrite: self.overwrite, written: 0 })
    }
}

/// Insert the `n`th disambiguator before the extension. `n == 1` is the name
/// itself.
///
/// ```
/// use std::path::Path;
/// use newmonkey_storage::disambiguate;
///
/// assert_eq!(disambiguate(Path::new("cat.png"), 1), Path::new("cat.png"));
/// assert_eq!(disambiguate(Path::new("image/cat.png"), 2), Path::new("image/cat-2.png"));
/// assert_eq!(disambiguate(Path::new("README"), 3), Path::new("README-3"));
/// ```
pub fn disambiguate(path: &Path, n: u32) -> PathBuf {
    if n <= 1 {
        return path.to_path_buf();
    }
    let mut name = OsString::from(path.file_stem().unwrap_or_default());
    name.push(format!("-{n}"));
    if let Some(extension) = path.extension() {
        name.push(".");
        name.push(extension);
    }
    path.with_file_name(name)
}

/// A file being written. Dropping it without [`commit`](Self::commit)ting
/// deletes the temporary file, leaving nothing behind.
#[derive(Debug)]
pub struct PendingFile {
    temp: NamedTempFile,
    target: PathBuf,
    overwrite: bool,
    written: u64,
}

impl PendingFile {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Throw away everything written and start again.
    pub fn truncate(&mut self) -> Result<()> {
        let file = self.temp.as_file_mut();
        file.set_len(0).map_err(|e| ErrorKind::from_io(e, &self.target))?;
        io::Seek::rewind(file).map_err(|e| ErrorKind::from_io(e, &self.target))?;
        self.written = 0;
        Ok(())
    }

    /// Flush and move the file into place, returning the bytes written.
    pub fn commit(mut self) -> Result<u64> {
        self.temp.flush().map_err(|e| ErrorKind::from_io(e, &self.target))?;
        let target = self.target;
        match self.overwrite {
            true => self.temp.persist(&target).map_err(|e| ErrorKind::from_io(e.error, &target))?,
            // Something outside this run may have created the file since it
            // was reserved.
            false => self.temp.persist_noclobber(&target).map_err(|e| ErrorKind::from_io(e.error, &target))?,
        };
        tracing::trace!(path = %target.display(), bytes = self.written, "committed");
        Ok(self.written)
    }
}

impl Write for PendingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.temp.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Write `data` to a reserved destination in one go.
pub fn write_all(root: &OutputRoot, reservation: &Reservation, data: &[u8]) -> Result<u64> {
    let mut file = root.create(reservation)?;
    file.write_all(data).map_err(|e| ErrorKind::from_io(e, &reservation.path))?;
    file.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_disambiguation_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let root = OutputRoot::open(dir.path(), false).unwrap();
        let names: Vec<_> = (0..3).map(|_| root.reserve("cat.png").unwrap().relative).collect();
        assert_eq!(names, vec![PathBuf::from("cat.png"), PathBuf::from("cat-2.png"), PathBuf::from("cat-3.png")]);
        assert_eq!(root.reserved(), 3);
    }

    #[test]
    fn test_existing_files_are_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cat.png"), b"earlier run").unwrap();
        let root = OutputRoot::open(dir.path(), false).unwrap();
        let reservation = root.reserve("cat.png").unwrap();
        assert_eq!(reservation.relative, Path::new("cat-2.png"));
        write_all(&root, &reservation, b"this run").unwrap();
        assert_eq!(std::fs::read(dir.path().join("cat.png")).unwrap(), b"earlier run");
        assert_eq!(std::fs::read(dir.path().join("cat-2.png")).unwrap(), b"this run");
    }

    #[test]
    fn test_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cat.png"), b"earlier run").unwrap();
        let root = OutputRoot::open(dir.path(), true).unwrap();
        let reservation = root.reserve("cat.png").unwrap();
        assert_eq!(reservation.relative, Path::new("cat.png"));
        write_all(&root, &reservation, b"this run").unwrap();
        assert_eq!(files_in(dir.path()), vec!["cat.png"]);
        assert_eq!(std::fs::read(dir.path().join("cat.png")).unwrap(), b"this run");
    }

    #[test]
    fn test_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = OutputRoot::open(dir.path().join("out"), false).unwrap();
        assert!(root.reserve("../../etc/passwd").is_err());
        let contained = root.reserve("image/../../out/x.png");
        assert!(contained.is_err());
    }

    #[test]
    fn test_concurrent_reservations_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let root = Arc::new(OutputRoot::open(dir.path(), false).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = Arc::clone(&root);
                std::thread::spawn(move || {
                    (0..25).map(|_| root.reserve("same.gif").unwrap().relative).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
        assert!(all.contains(&PathBuf::from("same.gif")));
        assert!(all.contains(&PathBuf::from("same-200.gif")));
    }

    #[test]
    fn test_dropped_file_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = OutputRoot::open(dir.path(), false).unwrap();
        let reservation = root.reserve("video/clip.mp4").unwrap();
        let mut pending = root.create(&reservation).unwrap();
        pending.write_all(&[0u8; 4096]).unwrap();
        assert_eq!(pending.written(), 4096);
        drop(pending);
        assert!(files_in(&dir.path().join("video")).is_empty());
    }

    #[test]
    fn test_truncate_then_commit() {
        let dir = tempfile::tempdir().unwrap();
        let root = OutputRoot::open(dir.path(), false).unwrap();
        let reservation = root.reserve("a.bin").unwrap();
        let mut pending = root.create(&reservation).unwrap();
        pending.write_all(b"garbage that will be discarded").unwrap();
        pending.truncate().unwrap();
        pending.write_all(b"kept").unwrap();
        assert_eq!(pending.commit().unwrap(), 4);
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"kept");
    }

    #[test]
    fn test_noclobber_commit() {
        let dir = tempfile::tempdir().unwrap();
        let root = OutputRoot::open(dir.path(), false).unwrap();
        let reservation = root.reserve("late.png").unwrap();
        let pending = root.create(&reservation).unwrap();
        std::fs::write(&reservation.path, b"someone else").unwrap();
        let err = pending.commit().unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(std::fs::read(&reservation.path).unwrap(), b"someone else");
    }
}
