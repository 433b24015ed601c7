//! On-disk layout detection.
//!
//! [`detect`] never fails: ambiguity is reported through [`Detection`] so the
//! caller can suggest a fix ("this file parses but has no `features` key").

use std::fmt;
use std::path::{Path, PathBuf};

use super::codec::{Encoding, MANIFEST_STEM};
use super::fs::{EntryKind, Filesystem};

/// Suffix (before the extension) of a monolithic bundle file.
pub const MONOLITHIC_SUFFIX: &str = ".bundle";

/// Recognized bundle layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// One file holding the whole tree.
    Monolithic,
    /// A directory of artifacts with a manifest.
    Modular,
    /// Nothing recognizable.
    Unknown,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monolithic => write!(f, "monolithic"),
            Self::Modular => write!(f, "modular"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of [`detect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Detection {
    /// The detected layout.
    pub format: Format,
    /// The file to decode: the manifest (modular) or the bundle file
    /// (monolithic). `None` when the format is unknown.
    pub location: Option<PathBuf>,
    /// Why the format is unknown (or a note about a legacy layout).
    pub diagnostic: Option<String>,
}

impl Detection {
    fn found(format: Format, location: PathBuf) -> Self {
        Self {
            format,
            location: Some(location),
            diagnostic: None,
        }
    }

    fn unknown(diagnostic: impl Into<String>) -> Self {
        Self {
            format: Format::Unknown,
            location: None,
            diagnostic: Some(diagnostic.into()),
        }
    }

    /// The directory that artifact paths are relative to.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.location.as_deref().and_then(Path::parent)
    }
}

/// Classify `path` as a monolithic bundle file, a modular bundle, or unknown.
pub fn detect<F: Filesystem>(fs: &F, path: &Path) -> Detection {
    match fs.kind(path) {
        Ok(None) => Detection::unknown(format!("{} does not exist", path.display())),
        Ok(Some(EntryKind::File)) => detect_file(fs, path),
        Ok(Some(EntryKind::Dir)) => detect_dir(fs, path),
        Err(e) => Detection::unknown(format!("cannot inspect {}: {e}", path.display())),
    }
}

fn detect_file<F: Filesystem>(fs: &F, path: &Path) -> Detection {
    let bytes = match fs.read(path) {
        Ok(b) => b,
        Err(e) => return Detection::unknown(format!("cannot read {}: {e}", path.display())),
    };
    // YAML is a superset of JSON, so one parser covers both encodings.
    let value: serde_yaml::Value = match serde_yaml::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            return Detection::unknown(format!(
                "{} is not a valid YAML/JSON document: {e}",
                path.display()
            ));
        }
    };
    let Some(map) = value.as_mapping() else {
        return Detection::unknown(format!(
            "{} parses, but its top level is not a mapping",
            path.display()
        ));
    };

    let has = |key: &str| map.contains_key(key);
    if has("features") && (has("idea") || has("product")) {
        return Detection::found(Format::Monolithic, path.to_path_buf());
    }
    if has("versions") || has("bundle") {
        return Detection::found(Format::Modular, path.to_path_buf());
    }

    let mut keys: Vec<String> = map
        .keys()
        .filter_map(|k| k.as_str().map(str::to_owned))
        .collect();
    keys.sort();
    Detection::unknown(format!(
        "{} parses, but has neither a full bundle shape (idea/product/features) nor a manifest shape (versions/bundle); top-level keys: [{}]",
        path.display(),
        keys.join(", ")
    ))
}

fn detect_dir<F: Filesystem>(fs: &F, dir: &Path) -> Detection {
    for encoding in Encoding::ALL {
        for ext in encoding.extensions() {
            let manifest = dir.join(format!("{MANIFEST_STEM}.{ext}"));
            if matches!(fs.kind(&manifest), Ok(Some(EntryKind::File))) {
                return Detection::found(Format::Modular, manifest);
            }
        }
    }

    let entries = match fs.read_dir(dir) {
        Ok(e) => e,
        Err(e) => return Detection::unknown(format!("cannot list {}: {e}", dir.display())),
    };
    let legacy: Vec<PathBuf> = entries
        .into_iter()
        .filter(|p| is_monolithic_name(p))
        .filter(|p| matches!(fs.kind(p), Ok(Some(EntryKind::File))))
        .collect();

    match legacy.as_slice() {
        [] => Detection::unknown(format!(
            "{} contains neither {MANIFEST_STEM}.<yaml|json> nor a <name>{MONOLITHIC_SUFFIX}.<yaml|json> file",
            dir.display()
        )),
        [single] => {
            let mut found = Detection::found(Format::Monolithic, single.clone());
            found.diagnostic = Some(format!(
                "legacy single-file layout: {}",
                single.display()
            ));
            found
        }
        several => Detection::unknown(format!(
            "{} contains several bundle files, pick one explicitly: {}",
            dir.display(),
            several
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

/// `<name>.bundle.<yaml|yml|json>`
pub(crate) fn is_monolithic_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    Encoding::ALL.iter().any(|enc| {
        enc.extensions().iter().any(|ext| {
            name.strip_suffix(&format!("{MONOLITHIC_SUFFIX}.{ext}"))
                .is_some_and(|stem| !stem.is_empty() && !stem.starts_with('.'))
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
