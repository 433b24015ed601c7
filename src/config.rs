//! Project configuration (`specbundle.toml`).
//!
//! ```toml
//! [store]
//! encoding = "yaml"        # or "json"
//! atomic = true            # staged directory swap on save
//! validate_hashes = true   # verify checksums on load
//!
//! [merge]
//! fallback = "none"        # or "ours" / "theirs"
//!
//! [personas.product-owner]
//! owns = ["idea", "business", "product", "features.*.stories"]
//! exports_to = "specs/*/spec.md"
//! ```
//!
//! Missing file → all defaults. The `[personas]` table, when present,
//! replaces the built-in persona map used for bundles whose manifest
//! declares none.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::merge::types::Side;
use crate::model::manifest::{PersonaMap, default_personas};
use crate::store::BundleStore;
use crate::store::codec::Encoding;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "specbundle.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    /// Persona map for bundles that declare none. Empty → built-in map.
    #[serde(default)]
    pub personas: PersonaMap,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Persistence settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Encoding for newly written artifacts.
    #[serde(default)]
    pub encoding: Encoding,

    /// Save through a staging directory and swap it in.
    #[serde(default = "default_true")]
    pub atomic: bool,

    /// Verify the checksum table on load.
    #[serde(default = "default_true")]
    pub validate_hashes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::default(),
            atomic: default_true(),
            validate_hashes: default_true(),
        }
    }
}

const fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Merge settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Side taken for conflicts no persona owns.
    #[serde(default)]
    pub fallback: Fallback,
}

/// What to do with a conflict nobody owns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fallback {
    /// Report it.
    #[default]
    None,
    Ours,
    Theirs,
}

impl Fallback {
    #[must_use]
    pub const fn side(self) -> Option<Side> {
        match self {
            Self::None => None,
            Self::Ours => Some(Side::Ours),
            Self::Theirs => Some(Side::Theirs),
        }
    }
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error loading or parsing the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl SpecConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }

    /// The persona map to use when a bundle declares none.
    #[must_use]
    pub fn personas(&self) -> PersonaMap {
        if self.personas.is_empty() {
            default_personas()
        } else {
            self.personas.clone()
        }
    }

    /// A store on the real filesystem configured from `[store]` and
    /// `[personas]`.
    #[must_use]
    pub fn store(&self) -> BundleStore {
        BundleStore::new()
            .with_encoding(self.store.encoding)
            .with_default_personas(self.personas())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
