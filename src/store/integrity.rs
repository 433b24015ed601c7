//! Content hashing and checksum-table verification.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::fs::Filesystem;

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest.iter() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Verify a checksum table against the files under `root`.
///
/// Returns every path (as written in the table) whose current content does
/// not hash to the recorded digest, including files that are missing or
/// unreadable. An empty result means the bundle is intact. Paths come back in
/// table order (sorted), so callers can report them together.
pub fn verify<F: Filesystem>(
    fs: &F,
    table: &BTreeMap<PathBuf, String>,
    root: &Path,
) -> Vec<PathBuf> {
    let mut mismatched = Vec::new();
    for (rel, expected) in table {
        let path = root.join(rel);
        match fs.read(&path) {
            Ok(bytes) => {
                if !hash(&bytes).eq_ignore_ascii_case(expected) {
                    tracing::debug!(path = %rel.display(), "checksum mismatch");
                    mismatched.push(rel.clone());
                }
            }
            Err(e) => {
                tracing::debug!(path = %rel.display(), error = %e, "tracked artifact unreadable");
                mismatched.push(rel.clone());
            }
        }
    }
    mismatched
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::store::fs::OsFs;

    #[test]
    fn hash_matches_known_vector() {
        assert_eq!(
            hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash(b"").len(), 64);
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash(b"feature"), hash(b"feature"));
        assert_ne!(hash(b"feature"), hash(b"features"));
    }

    #[test]
    fn verify_reports_all_mismatches_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), b"a").unwrap();
        std::fs::write(dir.path().join("b.yaml"), b"b-changed").unwrap();

        let mut table = BTreeMap::new();
        table.insert(PathBuf::from("a.yaml"), hash(b"a"));
        table.insert(PathBuf::from("b.yaml"), hash(b"b"));
        table.insert(PathBuf::from("c.yaml"), hash(b"c"));

        let bad = verify(&OsFs, &table, dir.path());
        assert_eq!(bad, vec![PathBuf::from("b.yaml"), PathBuf::from("c.yaml")]);
    }

    #[test]
    fn verify_empty_table_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        assert!(verify(&OsFs, &BTreeMap::new(), dir.path()).is_empty());
    }
}
