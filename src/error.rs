//! Error types for bundle persistence and section locking.
//!
//! Defines [`BundleError`], the error type for every load/save/lock
//! operation. Each variant carries the path(s) involved and its `Display`
//! output ends with a short, actionable hint so the calling command layer can
//! render it unchanged.
//!
//! Unresolved merge conflicts are *not* errors; they are returned as data in
//! [`crate::merge::MergeResult`].

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::model::types::{PersonaName, ValidationError};

// ---------------------------------------------------------------------------
// BundleError
// ---------------------------------------------------------------------------

/// Unified error type for bundle operations.
#[derive(Debug)]
pub enum BundleError {
    /// The path holds no recognizable bundle layout.
    Format {
        /// The path that was inspected.
        path: PathBuf,
        /// Why detection failed (parse error vs. shape mismatch vs. missing).
        diagnostic: String,
    },

    /// A save targeted a path that is a regular file; saves write a directory.
    NotADirectory {
        /// The file that was about to be replaced.
        path: PathBuf,
    },

    /// One or more artifacts no longer match the manifest's checksum table.
    Integrity {
        /// Bundle root directory.
        root: PathBuf,
        /// Every mismatched or missing artifact, relative to `root`.
        mismatched: Vec<PathBuf>,
    },

    /// A persona tried to lock a section it does not own.
    Authorization {
        /// The coarse section that was requested.
        section: String,
        /// The persona that asked.
        persona: PersonaName,
        /// The persona that actually owns the section, if any.
        owner: Option<PersonaName>,
    },

    /// Reading an artifact failed.
    Read {
        /// The file being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Writing, renaming, or creating a directory failed.
    Write {
        /// The file or directory being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// An artifact could not be decoded into its entity.
    Decode {
        /// The artifact that failed.
        path: PathBuf,
        /// Decoder message.
        detail: String,
    },

    /// An entity could not be encoded.
    Encode {
        /// What was being encoded (`manifest`, `feature FEATURE-001`, ...).
        what: String,
        /// Encoder message.
        detail: String,
    },

    /// The in-memory bundle violates a structural invariant.
    InvalidBundle {
        /// Description of the violation.
        detail: String,
    },

    /// The operation was cancelled between files via an
    /// [`crate::store::AbortHandle`].
    Aborted,

    /// An injected failpoint fired (only with the `failpoints` feature).
    #[cfg(feature = "failpoints")]
    Failpoint(String),
}

impl BundleError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Every path this error refers to, for callers that render their own
    /// messages.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        match self {
            Self::Format { path, .. }
            | Self::Read { path, .. }
            | Self::Write { path, .. }
            | Self::Decode { path, .. }
            | Self::NotADirectory { path } => vec![path.clone()],
            Self::Integrity { root, mismatched } => {
                mismatched.iter().map(|p| root.join(p)).collect()
            }
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for BundleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format { path, diagnostic } => {
                write!(
                    f,
                    "no recognizable bundle at '{}': {diagnostic}\n  To fix: point at a bundle directory containing bundle.manifest.yaml, or at a single <name>.bundle.yaml file.",
                    path.display()
                )
            }
            Self::NotADirectory { path } => {
                write!(
                    f,
                    "cannot save to '{}': it is a single-file bundle and saves write a bundle directory\n  To fix: save to a directory path instead (`specbundle migrate {} <dir>`).",
                    path.display(),
                    path.display()
                )
            }
            Self::Integrity { root, mismatched } => {
                write!(
                    f,
                    "integrity check failed for bundle '{}': {} artifact(s) do not match the manifest:",
                    root.display(),
                    mismatched.len()
                )?;
                for p in mismatched {
                    write!(f, "\n  - {}", p.display())?;
                }
                write!(
                    f,
                    "\n  To fix: restore the listed files from version control, or re-save the bundle from a trusted copy."
                )
            }
            Self::Authorization {
                section,
                persona,
                owner,
            } => {
                write!(f, "persona '{persona}' does not own section '{section}'")?;
                match owner {
                    Some(owner) => write!(
                        f,
                        "\n  To fix: ask '{owner}' (the owning persona) to take the lock."
                    ),
                    None => write!(
                        f,
                        "\n  To fix: no persona owns this section; add a pattern for it to the manifest's persona map."
                    ),
                }
            }
            Self::Read { path, source } => {
                write!(
                    f,
                    "failed to read '{}': {source}\n  To fix: check that the file exists and is readable.",
                    path.display()
                )
            }
            Self::Write { path, source } => {
                write!(
                    f,
                    "failed to write '{}': {source}\n  To fix: check file permissions and disk space, then save again.",
                    path.display()
                )
            }
            Self::Decode { path, detail } => {
                write!(
                    f,
                    "failed to decode '{}': {detail}\n  To fix: correct the file's syntax or field names.",
                    path.display()
                )
            }
            Self::Encode { what, detail } => {
                write!(f, "failed to encode {what}: {detail}")
            }
            Self::InvalidBundle { detail } => {
                write!(
                    f,
                    "invalid bundle: {detail}\n  To fix: keep feature keys, story keys and protocol names unique and confidence values finite."
                )
            }
            Self::Aborted => write!(f, "operation aborted between files; no file was left half-written"),
            #[cfg(feature = "failpoints")]
            Self::Failpoint(msg) => write!(f, "{msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for BundleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<ValidationError> for BundleError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidBundle {
            detail: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
