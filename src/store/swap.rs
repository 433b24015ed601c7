//! Whole-bundle commit by directory swap.
//!
//! An atomic save never writes into the live root. It builds the complete new
//! bundle in a sibling staging directory and then swaps directories:
//!
//! ```text
//! parent/
//!   shop/              live root
//!   .shop.staging/     new bundle, written and fsynced
//!   .shop.previous/    old root, present only during the swap
//! ```
//!
//! 1. `shop/` → `.shop.previous/`
//! 2. `.shop.staging/` → `shop/`
//! 3. remove `.shop.previous/`
//!
//! A reader sees either the old or the new tree. The only window with no
//! live root is between steps 1 and 2; [`recover`] repairs it and
//! [`readable_root`] lets a load read the backup meanwhile.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::codec::Layout;
use super::fp_store;
use super::fs::{EntryKind, Filesystem};
use crate::error::BundleError;

/// What [`recover`] found and repaired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Recovery {
    /// A staging directory from an interrupted save was removed.
    pub removed_staging: bool,
    /// The live root was missing and the backup was moved back into place.
    pub restored_backup: bool,
    /// A backup left after a completed swap was removed.
    pub removed_backup: bool,
}

impl Recovery {
    /// Returns `true` if nothing needed repair.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.removed_staging && !self.restored_backup && !self.removed_backup
    }
}

/// `.<name>.staging` next to `root`.
#[must_use]
pub fn staging_dir(root: &Path) -> PathBuf {
    sibling(root, "staging")
}

/// `.<name>.previous` next to `root`.
#[must_use]
pub fn backup_dir(root: &Path) -> PathBuf {
    sibling(root, "previous")
}

fn sibling(root: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(root.file_name().unwrap_or_default());
    name.push(".");
    name.push(suffix);
    root.with_file_name(name)
}

fn exists<F: Filesystem>(fs: &F, path: &Path) -> Result<bool, BundleError> {
    fs.kind(path)
        .map(|k| k.is_some())
        .map_err(|e| BundleError::read(path, e))
}

/// Remove a leftover sibling whether it is a directory or a stray file.
fn remove_entry<F: Filesystem>(fs: &F, path: &Path) -> std::io::Result<()> {
    match fs.kind(path)? {
        Some(EntryKind::File) => fs.remove_file(path),
        Some(EntryKind::Dir) => fs.remove_dir_all(path),
        None => Ok(()),
    }
}

/// Repair whatever an interrupted save left next to `root`.
///
/// # Errors
/// [`BundleError::Write`] if a leftover directory cannot be removed or the
/// backup cannot be moved back.
pub fn recover<F: Filesystem>(fs: &F, root: &Path) -> Result<Recovery, BundleError> {
    let mut report = Recovery::default();

    let staging = staging_dir(root);
    if exists(fs, &staging)? {
        remove_entry(fs, &staging).map_err(|e| BundleError::write(&staging, e))?;
        report.removed_staging = true;
    }

    let backup = backup_dir(root);
    if exists(fs, &backup)? {
        if exists(fs, root)? {
            remove_entry(fs, &backup).map_err(|e| BundleError::write(&backup, e))?;
            report.removed_backup = true;
        } else {
            fs.rename(&backup, root)
                .map_err(|e| BundleError::write(root, e))?;
            sync_parent(fs, root)?;
            report.restored_backup = true;
        }
    }

    if !report.is_clean() {
        tracing::info!(root = %root.display(), ?report, "recovered interrupted save");
    }
    Ok(report)
}

/// The directory a load should read: `root`, or its backup when an
/// interrupted swap left no live root.
#[must_use]
pub fn readable_root<F: Filesystem>(fs: &F, root: &Path) -> PathBuf {
    if matches!(fs.kind(root), Ok(Some(_))) {
        return root.to_path_buf();
    }
    let backup = backup_dir(root);
    if matches!(fs.kind(&backup), Ok(Some(EntryKind::Dir))) {
        tracing::warn!(root = %root.display(), "bundle root missing; reading interrupted-save backup");
        return backup;
    }
    root.to_path_buf()
}

/// Copy every top-level entry of `root` the store does not manage into
/// `staging`, so an atomic save keeps files such as exported reports.
///
/// # Errors
/// [`BundleError::Read`] / [`BundleError::Write`] naming the entry.
pub fn carry_over_unmanaged<F: Filesystem>(
    fs: &F,
    root: &Path,
    staging: &Path,
) -> Result<usize, BundleError> {
    if !matches!(fs.kind(root), Ok(Some(EntryKind::Dir))) {
        return Ok(0);
    }
    let mut copied = 0;
    for entry in fs.read_dir(root).map_err(|e| BundleError::read(root, e))? {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if Layout::is_managed_top_level(name) {
            continue;
        }
        let dest = staging.join(name);
        if exists(fs, &dest)? {
            continue;
        }
        copy_tree(fs, &entry, &dest)?;
        copied += 1;
    }
    Ok(copied)
}

fn copy_tree<F: Filesystem>(fs: &F, from: &Path, to: &Path) -> Result<(), BundleError> {
    match fs.kind(from).map_err(|e| BundleError::read(from, e))? {
        Some(EntryKind::Dir) => {
            fs.create_dir_all(to)
                .map_err(|e| BundleError::write(to, e))?;
            for child in fs.read_dir(from).map_err(|e| BundleError::read(from, e))? {
                if let Some(name) = child.file_name() {
                    copy_tree(fs, &child, &to.join(name))?;
                }
            }
            Ok(())
        }
        Some(EntryKind::File) => {
            let bytes = fs.read(from).map_err(|e| BundleError::read(from, e))?;
            fs.write_synced(to, &bytes)
                .map_err(|e| BundleError::write(to, e))
        }
        None => Ok(()),
    }
}

/// Move a complete `staging` directory into place as `root`.
///
/// # Errors
/// [`BundleError::Write`] naming the directory that could not be moved.
/// If the second rename fails the backup is left for [`recover`].
pub fn swap_in<F: Filesystem>(fs: &F, staging: &Path, root: &Path) -> Result<(), BundleError> {
    if exists(fs, root)? {
        let backup = backup_dir(root);
        fs.rename(root, &backup)
            .map_err(|e| BundleError::write(root, e))?;
        fp_store("FP_SAVE_AFTER_BACKUP")?;
        fs.rename(staging, root)
            .map_err(|e| BundleError::write(root, e))?;
        sync_parent(fs, root)?;
        if let Err(e) = remove_entry(fs, &backup) {
            tracing::warn!(path = %backup.display(), error = %e, "failed to remove previous bundle; next save will clean it");
        }
    } else {
        fs.rename(staging, root)
            .map_err(|e| BundleError::write(root, e))?;
        sync_parent(fs, root)?;
    }
    Ok(())
}

fn sync_parent<F: Filesystem>(fs: &F, path: &Path) -> Result<(), BundleError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs
            .sync_dir(parent)
            .map_err(|e| BundleError::write(parent, e)),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
