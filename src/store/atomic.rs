//! Per-file atomic writes: write-to-temp + fsync + rename.
//!
//! Writing happens in two phases so that an interruption can never leave a
//! target half-written:
//!
//! 1. [`AtomicWriter::stage`] writes every file to a sibling temp file
//!    (`.<name>.<pid>.tmp`) and fsyncs it. No target is touched.
//! 2. [`StagedWrite::commit`] renames each temp over its target, in path
//!    order, then fsyncs the parent directories.
//!
//! Dropping a [`StagedWrite`] without committing removes its temp files, so an
//! interruption after phase 1 leaves every target byte-identical to its
//! pre-call state. A failure *during* phase 2 stops at the failing file;
//! files already renamed in this call stay renamed. Whole-bundle atomicity is
//! layered on top by staging into a fresh directory (see [`super::swap`]).

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::fs::Filesystem;
use super::{AbortHandle, fp_store};
use crate::error::BundleError;

/// Writes a set of files under a root, each one atomically.
pub struct AtomicWriter<'a, F: Filesystem> {
    fs: &'a F,
    abort: Option<&'a AbortHandle>,
}

impl<'a, F: Filesystem> AtomicWriter<'a, F> {
    /// Create a writer over `fs`.
    #[must_use]
    pub const fn new(fs: &'a F) -> Self {
        Self { fs, abort: None }
    }

    /// Check `abort` between files while staging.
    #[must_use]
    pub const fn with_abort(mut self, abort: Option<&'a AbortHandle>) -> Self {
        self.abort = abort;
        self
    }

    /// Write every file to a temp sibling of its target and fsync it.
    ///
    /// `files` maps paths relative to `root` to their full content. Parent
    /// directories are created as needed.
    ///
    /// # Errors
    /// [`BundleError::Write`] naming the target whose temp could not be
    /// written, [`BundleError::Aborted`] if the abort handle fired. Temps
    /// written so far are removed before returning.
    pub fn stage(
        &self,
        files: &BTreeMap<PathBuf, Vec<u8>>,
        root: &Path,
    ) -> Result<StagedWrite<'a, F>, BundleError> {
        let mut staged = StagedWrite {
            fs: self.fs,
            pending: Vec::with_capacity(files.len()),
            committed: Vec::new(),
        };

        for (rel, bytes) in files {
            if self.abort.is_some_and(AbortHandle::is_aborted) {
                return Err(BundleError::Aborted);
            }
            let target = resolve_target(root, rel)?;
            let parent = target.parent().unwrap_or(root);
            self.fs
                .create_dir_all(parent)
                .map_err(|e| BundleError::write(parent, e))?;

            let tmp = temp_path_for(&target);
            if let Err(e) = self.fs.write_synced(&tmp, bytes) {
                let _ = self.fs.remove_file(&tmp);
                return Err(BundleError::write(&target, e));
            }
            staged.pending.push(PendingRename { tmp, target });
        }

        Ok(staged)
    }

    /// Stage and commit in one call.
    ///
    /// # Errors
    /// See [`Self::stage`] and [`StagedWrite::commit`].
    pub fn write_all(
        &self,
        files: &BTreeMap<PathBuf, Vec<u8>>,
        root: &Path,
    ) -> Result<Vec<PathBuf>, BundleError> {
        self.stage(files, root)?.commit()
    }
}

#[derive(Debug)]
struct PendingRename {
    tmp: PathBuf,
    target: PathBuf,
}

/// Temp files written and fsynced, waiting to be renamed over their targets.
pub struct StagedWrite<'a, F: Filesystem> {
    fs: &'a F,
    pending: Vec<PendingRename>,
    committed: Vec<PathBuf>,
}

impl<F: Filesystem> StagedWrite<'_, F> {
    /// Number of files waiting to be committed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The temp files currently on disk, in commit order.
    #[must_use]
    pub fn temp_paths(&self) -> Vec<&Path> {
        self.pending.iter().map(|p| p.tmp.as_path()).collect()
    }

    /// Rename every temp over its target, then fsync the touched directories.
    ///
    /// Returns the targets in the order they were renamed.
    ///
    /// # Errors
    /// [`BundleError::Write`] naming the first target that could not be
    /// renamed. Targets renamed before it are not rolled back; the remaining
    /// temps are removed.
    pub fn commit(mut self) -> Result<Vec<PathBuf>, BundleError> {
        fp_store("FP_WRITE_BEFORE_RENAME")?;

        let pending = std::mem::take(&mut self.pending);
        let mut remaining = pending.into_iter();
        while let Some(next) = remaining.next() {
            if let Err(e) = self.fs.rename(&next.tmp, &next.target) {
                let _ = self.fs.remove_file(&next.tmp);
                // Hand the rest back so Drop cleans their temps.
                self.pending = remaining.collect();
                return Err(BundleError::write(&next.target, e));
            }
            self.committed.push(next.target);
        }

        let dirs: BTreeSet<&Path> = self
            .committed
            .iter()
            .filter_map(|t| t.parent())
            .collect();
        for dir in dirs {
            self.fs
                .sync_dir(dir)
                .map_err(|e| BundleError::write(dir, e))?;
        }

        Ok(std::mem::take(&mut self.committed))
    }
}

impl<F: Filesystem> Drop for StagedWrite<'_, F> {
    fn drop(&mut self) {
        for p in &self.pending {
            if let Err(e) = self.fs.remove_file(&p.tmp) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %p.tmp.display(), error = %e, "failed to remove temp file");
                }
            }
        }
    }
}

/// Join `rel` onto `root`, refusing absolute paths and `..` escapes.
fn resolve_target(root: &Path, rel: &Path) -> Result<PathBuf, BundleError> {
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || rel.as_os_str().is_empty() {
        return Err(BundleError::write(
            root.join(rel),
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "artifact path must be relative and stay inside the bundle root",
            ),
        ));
    }
    Ok(root.join(rel))
}

/// `.<name>.<pid>.tmp` next to `target`.
fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_default());
    name.push(format!(".{}.tmp", std::process::id()));
    target.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::store::fs::{EntryKind, OsFs};
    use std::cell::RefCell;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<PathBuf, Vec<u8>> {
        entries
            .iter()
            .map(|(p, c)| (PathBuf::from(p), c.as_bytes().to_vec()))
            .collect()
    }

    fn listing(root: &Path) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push(path.strip_prefix(root).unwrap().display().to_string());
                }
            }
        }
        out.sort();
        out
    }

    #[test]
    fn write_all_creates_parents_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = AtomicWriter::new(&OsFs)
            .write_all(
                &files(&[("product.yaml", "p"), ("features/F-1.yaml", "f")]),
                dir.path(),
            )
            .unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("features/F-1.yaml")).unwrap(),
            "f"
        );
        assert_eq!(listing(dir.path()), ["features/F-1.yaml", "product.yaml"]);
    }

    #[test]
    fn dropped_stage_leaves_targets_untouched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("product.yaml"), "old").unwrap();

        let staged = AtomicWriter::new(&OsFs)
            .stage(
                &files(&[("product.yaml", "new"), ("idea.yaml", "i")]),
                dir.path(),
            )
            .unwrap();
        assert_eq!(staged.len(), 2);
        for tmp in staged.temp_paths() {
            assert!(tmp.exists());
        }
        drop(staged);

        assert_eq!(
            std::fs::read_to_string(dir.path().join("product.yaml")).unwrap(),
            "old"
        );
        assert_eq!(listing(dir.path()), ["product.yaml"]);
    }

    #[test]
    fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let err = AtomicWriter::new(&OsFs)
            .write_all(&files(&[("../evil.yaml", "x")]), dir.path())
            .unwrap_err();
        assert!(matches!(err, BundleError::Write { .. }));
    }

    #[test]
    fn abort_handle_stops_staging() {
        let dir = tempfile::tempdir().unwrap();
        let abort = AbortHandle::new();
        abort.abort();
        let err = AtomicWriter::new(&OsFs)
            .with_abort(Some(&abort))
            .stage(&files(&[("a.yaml", "a")]), dir.path())
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, BundleError::Aborted));
        assert!(listing(dir.path()).is_empty());
    }

    /// Fails the rename of one specific target.
    struct FailingRename {
        fail_on: &'static str,
        renames: RefCell<Vec<PathBuf>>,
    }

    impl Filesystem for FailingRename {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            OsFs.read(path)
        }
        fn write_synced(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
            OsFs.write_synced(path, bytes)
        }
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            if to.ends_with(self.fail_on) {
                return Err(io::Error::other("injected rename failure"));
            }
            self.renames.borrow_mut().push(to.to_path_buf());
            OsFs.rename(from, to)
        }
        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            OsFs.create_dir_all(path)
        }
        fn remove_file(&self, path: &Path) -> io::Result<()> {
            OsFs.remove_file(path)
        }
        fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            OsFs.remove_dir_all(path)
        }
        fn kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
            OsFs.kind(path)
        }
        fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
            OsFs.read_dir(path)
        }
        fn sync_dir(&self, path: &Path) -> io::Result<()> {
            OsFs.sync_dir(path)
        }
    }

    #[test]
    fn rename_failure_names_path_and_cleans_temps() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FailingRename {
            fail_on: "b.yaml",
            renames: RefCell::new(Vec::new()),
        };
        let err = AtomicWriter::new(&fs)
            .write_all(
                &files(&[("a.yaml", "a"), ("b.yaml", "b"), ("c.yaml", "c")]),
                dir.path(),
            )
            .unwrap_err();

        match err {
            BundleError::Write { path, .. } => assert!(path.ends_with("b.yaml")),
            other => panic!("unexpected error: {other}"),
        }
        // a.yaml was committed before the failure and is not rolled back;
        // no temp files survive.
        assert_eq!(listing(dir.path()), ["a.yaml"]);
        assert_eq!(fs.renames.borrow().len(), 1);
    }
}
