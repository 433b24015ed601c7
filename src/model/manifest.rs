//! The bundle manifest (`bundle.manifest.<ext>`).
//!
//! The manifest is the only file of a modular bundle that is not itself
//! checksummed: it *holds* the checksum table for every other artifact, plus
//! the persona ownership map and the active section locks.
//!
//! ```yaml
//! versions: { schema: "1.1", project: "0.1.0" }
//! bundle: { format: modular, created_at: 1735000000, last_modified: 1735000500 }
//! checksums:
//!   algorithm: sha256
//!   files:
//!     product.yaml: 3b1f...
//!     features/FEATURE-001.yaml: 9ac0...
//! features: [{ key: FEATURE-001, title: Checkout, file: features/FEATURE-001.yaml }]
//! protocols: []
//! personas:
//!   product-owner: { owns: [idea, "features.*.stories"], exports_to: specs/*/spec.md }
//! locks: [{ section: idea, owner: product-owner, locked_at: 1735000400 }]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::bundle::SCHEMA_VERSION;
use super::types::{PersonaName, SectionKey};

/// Name of the only checksum algorithm this crate writes.
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// Persona ownership map: persona name → what it owns.
pub type PersonaMap = BTreeMap<PersonaName, PersonaMapping>;

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Persistence metadata for a bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub versions: Versions,
    #[serde(default)]
    pub bundle: BundleMeta,
    #[serde(default)]
    pub checksums: ChecksumTable,
    /// Feature index in bundle order.
    #[serde(default)]
    pub features: Vec<FeatureIndexEntry>,
    /// Protocol index in bundle order.
    #[serde(default)]
    pub protocols: Vec<ProtocolIndexEntry>,
    #[serde(default)]
    pub personas: PersonaMap,
    #[serde(default)]
    pub locks: Vec<SectionLock>,
}

impl Manifest {
    /// The manifest synthesized for a bundle loaded from a monolithic file:
    /// no checksums, no locks, and the built-in persona map.
    #[must_use]
    pub fn synthesized() -> Self {
        Self {
            bundle: BundleMeta {
                format: BundleFormat::Monolithic,
                ..BundleMeta::default()
            },
            personas: default_personas(),
            ..Self::default()
        }
    }
}

/// Schema/project version identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Versions {
    /// Document schema version.
    pub schema: String,
    /// Free-form project version.
    #[serde(default)]
    pub project: String,
}

impl Default for Versions {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION.to_owned(),
            project: String::new(),
        }
    }
}

/// Bundle-level metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleMeta {
    /// The layout this bundle was materialized from / saved as.
    #[serde(default)]
    pub format: BundleFormat,
    /// Unix timestamp (seconds) of the first save.
    #[serde(default)]
    pub created_at: u64,
    /// Unix timestamp (seconds) of the most recent save.
    #[serde(default)]
    pub last_modified: u64,
}

/// On-disk layout of a bundle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleFormat {
    /// Directory of artifact files with a manifest.
    #[default]
    Modular,
    /// Single file holding the whole tree.
    Monolithic,
}

impl fmt::Display for BundleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modular => write!(f, "modular"),
            Self::Monolithic => write!(f, "monolithic"),
        }
    }
}

/// Relative artifact path → hex digest of its last written content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChecksumTable {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub files: BTreeMap<PathBuf, String>,
}

impl Default for ChecksumTable {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            files: BTreeMap::new(),
        }
    }
}

fn default_algorithm() -> String {
    CHECKSUM_ALGORITHM.to_owned()
}

/// One entry of the feature index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureIndexEntry {
    pub key: SectionKey,
    #[serde(default)]
    pub title: String,
    /// Artifact path relative to the bundle root.
    pub file: PathBuf,
    #[serde(default)]
    pub stories: usize,
}

/// One entry of the protocol index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolIndexEntry {
    pub name: SectionKey,
    /// Artifact path relative to the bundle root.
    pub file: PathBuf,
}

// ---------------------------------------------------------------------------
// Personas and locks
// ---------------------------------------------------------------------------

/// What a persona is authoritative over.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaMapping {
    /// Section-path patterns (`.`-separated, `*` matches one segment).
    #[serde(default)]
    pub owns: Vec<String>,
    /// Where this persona's human-readable export is written. Opaque here.
    #[serde(default)]
    pub exports_to: String,
}

impl PersonaMapping {
    /// Build a mapping from patterns and an export target.
    #[must_use]
    pub fn new<I, S>(owns: I, exports_to: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut patterns: Vec<String> = Vec::new();
        for p in owns {
            let p = p.into();
            if !patterns.contains(&p) {
                patterns.push(p);
            }
        }
        Self {
            owns: patterns,
            exports_to: exports_to.into(),
        }
    }
}

/// A logical lock on a coarse section, held by one persona.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionLock {
    /// Coarse section path (see [`crate::merge::ownership::section_of`]).
    pub section: String,
    /// Persona that holds the lock.
    pub owner: PersonaName,
    /// Unix timestamp (seconds) when the lock was taken.
    pub locked_at: u64,
}

/// The built-in persona map used when a bundle declares none.
#[must_use]
pub fn default_personas() -> PersonaMap {
    let mut map = PersonaMap::new();
    let entries: [(&str, &[&str], &str); 3] = [
        (
            "product-owner",
            &[
                "idea",
                "business",
                "product",
                "features.*.stories",
                "features.*.outcomes",
            ],
            "specs/*/spec.md",
        ),
        (
            "architect",
            &["features.*.constraints", "protocols"],
            "specs/*/plan.md",
        ),
        ("developer", &["features.*.acceptance"], "specs/*/tasks.md"),
    ];
    for (name, owns, exports_to) in entries {
        if let Ok(persona) = PersonaName::new(name) {
            map.insert(persona, PersonaMapping::new(owns.iter().copied(), exports_to));
        }
    }
    map
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn default_personas_are_present() {
        let personas = default_personas();
        assert_eq!(personas.len(), 3);
        let po = personas
            .get(&PersonaName::new("product-owner").unwrap())
            .unwrap();
        assert!(po.owns.iter().any(|p| p == "features.*.stories"));
    }

    #[test]
    fn persona_mapping_dedups_patterns_in_order() {
        let m = PersonaMapping::new(["idea", "business", "idea"], "out");
        assert_eq!(m.owns, vec!["idea".to_owned(), "business".to_owned()]);
    }

    #[test]
    fn synthesized_manifest_is_monolithic_with_defaults() {
        let m = Manifest::synthesized();
        assert_eq!(m.bundle.format, BundleFormat::Monolithic);
        assert!(m.checksums.files.is_empty());
        assert_eq!(m.checksums.algorithm, CHECKSUM_ALGORITHM);
        assert!(!m.personas.is_empty());
    }

    #[test]
    fn manifest_yaml_roundtrip() {
        let mut m = Manifest::default();
        m.checksums
            .files
            .insert(PathBuf::from("product.yaml"), "ab".repeat(32));
        m.locks.push(SectionLock {
            section: "idea".into(),
            owner: PersonaName::new("product-owner").unwrap(),
            locked_at: 42,
        });
        let yaml = serde_yaml::to_string(&m).unwrap();
        let back: Manifest = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn format_display() {
        assert_eq!(BundleFormat::Modular.to_string(), "modular");
        assert_eq!(BundleFormat::Monolithic.to_string(), "monolithic");
    }
}
