//! Filesystem seam used by the store.
//!
//! Everything the store does to disk goes through [`Filesystem`] so tests can
//! inject failures (a rename that errors, a write that runs out of space)
//! without touching the real filesystem's behaviour.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// What kind of entry lives at a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// The filesystem operations the store needs.
pub trait Filesystem {
    /// Read a whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create or truncate `path`, write `bytes`, and fsync the file.
    fn write_synced(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Rename `from` over `to` (atomic on POSIX for same-filesystem paths).
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create `path` and any missing parents. Succeeds if it already exists.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a single file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory tree.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Inspect a path. `Ok(None)` means nothing exists there.
    fn kind(&self, path: &Path) -> io::Result<Option<EntryKind>>;

    /// List the entries of a directory, sorted by path.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Flush directory metadata (renames) to stable storage.
    fn sync_dir(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFs;

impl Filesystem for OsFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_synced(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Dir)),
            Ok(_) => Ok(Some(EntryKind::File)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    #[cfg(unix)]
    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        fs::File::open(path)?.sync_all()
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

impl<F: Filesystem + ?Sized> Filesystem for &F {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        (**self).read(path)
    }
    fn write_synced(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        (**self).write_synced(path, bytes)
    }
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        (**self).rename(from, to)
    }
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        (**self).create_dir_all(path)
    }
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        (**self).remove_file(path)
    }
    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        (**self).remove_dir_all(path)
    }
    fn kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        (**self).kind(path)
    }
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        (**self).read_dir(path)
    }
    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        (**self).sync_dir(path)
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn kind_reports_missing_file_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs;
        assert_eq!(fs.kind(dir.path()).unwrap(), Some(EntryKind::Dir));
        assert_eq!(fs.kind(&dir.path().join("nope")).unwrap(), None);
        fs.write_synced(&dir.path().join("a"), b"x").unwrap();
        assert_eq!(fs.kind(&dir.path().join("a")).unwrap(), Some(EntryKind::File));
    }

    #[test]
    fn read_dir_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs;
        for name in ["c", "a", "b"] {
            fs.write_synced(&dir.path().join(name), b"").unwrap();
        }
        let names: Vec<_> = fs
            .read_dir(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
