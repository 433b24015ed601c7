//! Artifact layout and structured-text encodings.
//!
//! A modular bundle is laid out as:
//!
//! ```text
//! <root>/
//!   bundle.manifest.<ext>        versions, personas, locks, checksums, indexes
//!   idea.<ext>                   (only when the bundle has an idea)
//!   business.<ext>               (only when the bundle has business context)
//!   product.<ext>
//!   features/<FEATURE-KEY>.<ext> one per feature, stories inline
//!   protocols/<name>.protocol.<ext>
//! ```
//!
//! [`encode_bundle`] hashes exactly the bytes it returns, so whatever the
//! caller writes is what the checksum table describes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::integrity;
use crate::error::BundleError;
use crate::model::bundle::{Bundle, Business, Feature, Idea, Product, Protocol, SCHEMA_VERSION};
use crate::model::manifest::{
    BundleFormat, CHECKSUM_ALGORITHM, ChecksumTable, FeatureIndexEntry, Manifest, PersonaMap,
    ProtocolIndexEntry,
};

/// File stem of the manifest.
pub const MANIFEST_STEM: &str = "bundle.manifest";
/// Directory holding one file per feature.
pub const FEATURES_DIR: &str = "features";
/// Directory holding one file per protocol.
pub const PROTOCOLS_DIR: &str = "protocols";

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Structured-text encoding used for artifact files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Yaml,
    Json,
}

impl Encoding {
    /// Every supported encoding, in detection preference order.
    pub const ALL: [Self; 2] = [Self::Yaml, Self::Json];

    /// The extension this crate writes.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }

    /// Every extension accepted on read.
    #[must_use]
    pub const fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Yaml => &["yaml", "yml"],
            Self::Json => &["json"],
        }
    }

    /// Infer the encoding from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL
            .into_iter()
            .find(|enc| enc.extensions().contains(&ext))
    }

    /// Encode `value`.
    ///
    /// # Errors
    /// Returns the encoder's message.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, String> {
        match self {
            Self::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| e.to_string()),
            Self::Json => {
                let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| e.to_string())?;
                bytes.push(b'\n');
                Ok(bytes)
            }
        }
    }

    /// Decode `bytes`.
    ///
    /// # Errors
    /// Returns the decoder's message.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, String> {
        match self {
            Self::Yaml => serde_yaml::from_slice(bytes).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Relative artifact paths for one encoding.
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    encoding: Encoding,
}

impl Layout {
    #[must_use]
    pub const fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    #[must_use]
    pub const fn encoding(self) -> Encoding {
        self.encoding
    }

    #[must_use]
    pub fn manifest(self) -> PathBuf {
        PathBuf::from(format!("{MANIFEST_STEM}.{}", self.encoding.extension()))
    }

    #[must_use]
    pub fn idea(self) -> PathBuf {
        PathBuf::from(format!("idea.{}", self.encoding.extension()))
    }

    #[must_use]
    pub fn business(self) -> PathBuf {
        PathBuf::from(format!("business.{}", self.encoding.extension()))
    }

    #[must_use]
    pub fn product(self) -> PathBuf {
        PathBuf::from(format!("product.{}", self.encoding.extension()))
    }

    #[must_use]
    pub fn feature(self, key: &str) -> PathBuf {
        Path::new(FEATURES_DIR).join(format!("{key}.{}", self.encoding.extension()))
    }

    #[must_use]
    pub fn protocol(self, name: &str) -> PathBuf {
        Path::new(PROTOCOLS_DIR).join(format!("{name}.protocol.{}", self.encoding.extension()))
    }

    /// Returns `true` if `entry` (a top-level name in the bundle root) is
    /// managed by the store in any encoding.
    #[must_use]
    pub fn is_managed_top_level(name: &str) -> bool {
        if name == FEATURES_DIR || name == PROTOCOLS_DIR {
            return true;
        }
        ["idea", "business", "product", MANIFEST_STEM]
            .iter()
            .any(|stem| {
                Encoding::ALL.iter().any(|enc| {
                    enc.extensions()
                        .iter()
                        .any(|ext| name == format!("{stem}.{ext}"))
                })
            })
    }
}

// ---------------------------------------------------------------------------
// Monolithic document
// ---------------------------------------------------------------------------

/// The single-file bundle shape (`<name>.bundle.<ext>`).
///
/// Unknown top-level keys written by older tools are ignored on read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonolithicDocument {
    #[serde(default = "default_schema_version")]
    pub version: String,
    #[serde(default)]
    pub idea: Option<Idea>,
    #[serde(default)]
    pub business: Option<Business>,
    #[serde(default)]
    pub product: Product,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub protocols: Vec<Protocol>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_owned()
}

impl MonolithicDocument {
    /// Materialize a bundle, synthesizing a minimal manifest.
    #[must_use]
    pub fn into_bundle(self) -> Bundle {
        let mut manifest = Manifest::synthesized();
        manifest.versions.schema.clone_from(&self.version);
        Bundle {
            schema_version: self.version,
            idea: self.idea,
            business: self.business,
            product: self.product,
            features: self.features,
            protocols: self.protocols,
            manifest,
        }
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// The serialized form of a bundle, ready to be written.
#[derive(Clone, Debug)]
pub struct EncodedBundle {
    /// Every artifact including the manifest, keyed by relative path.
    pub files: BTreeMap<PathBuf, Vec<u8>>,
    /// The recomputed manifest (already encoded into `files`).
    pub manifest: Manifest,
    /// Relative path of the manifest inside `files`.
    pub manifest_path: PathBuf,
}

/// Serialize every entity, hash the bytes, and build the manifest from those
/// hashes.
///
/// Personas, locks, the project version and `created_at` carry over from the
/// bundle's current manifest; everything else is recomputed. A manifest with
/// no personas gets `fallback_personas`.
///
/// # Errors
/// [`BundleError::InvalidBundle`] on duplicate keys, [`BundleError::Encode`]
/// if an entity cannot be serialized.
pub fn encode_bundle(
    bundle: &Bundle,
    encoding: Encoding,
    now: u64,
    fallback_personas: &PersonaMap,
) -> Result<EncodedBundle, BundleError> {
    bundle
        .validate()
        .map_err(|detail| BundleError::InvalidBundle { detail })?;

    let layout = Layout::new(encoding);
    let mut files = BTreeMap::new();
    let mut checksums = BTreeMap::new();
    let mut put = |rel: PathBuf, what: String, bytes: Result<Vec<u8>, String>| {
        let bytes = bytes.map_err(|detail| BundleError::Encode { what, detail })?;
        checksums.insert(rel.clone(), integrity::hash(&bytes));
        files.insert(rel, bytes);
        Ok::<(), BundleError>(())
    };

    if let Some(idea) = &bundle.idea {
        put(layout.idea(), "idea".into(), encoding.encode(idea))?;
    }
    if let Some(business) = &bundle.business {
        put(layout.business(), "business".into(), encoding.encode(business))?;
    }
    put(layout.product(), "product".into(), encoding.encode(&bundle.product))?;

    let mut feature_index = Vec::with_capacity(bundle.features.len());
    for feature in &bundle.features {
        let rel = layout.feature(feature.key.as_str());
        put(
            rel.clone(),
            format!("feature {}", feature.key),
            encoding.encode(feature),
        )?;
        feature_index.push(FeatureIndexEntry {
            key: feature.key.clone(),
            title: feature.title.clone(),
            file: rel,
            stories: feature.stories.len(),
        });
    }

    let mut protocol_index = Vec::with_capacity(bundle.protocols.len());
    for protocol in &bundle.protocols {
        let rel = layout.protocol(protocol.name.as_str());
        put(
            rel.clone(),
            format!("protocol {}", protocol.name),
            encoding.encode(protocol),
        )?;
        protocol_index.push(ProtocolIndexEntry {
            name: protocol.name.clone(),
            file: rel,
        });
    }

    let previous = &bundle.manifest;
    let mut manifest = previous.clone();
    manifest.versions.schema.clone_from(&bundle.schema_version);
    manifest.bundle.format = BundleFormat::Modular;
    if manifest.bundle.created_at == 0 {
        manifest.bundle.created_at = now;
    }
    manifest.bundle.last_modified = now;
    if manifest.personas.is_empty() {
        manifest.personas.clone_from(fallback_personas);
    }
    manifest.checksums = ChecksumTable {
        algorithm: CHECKSUM_ALGORITHM.to_owned(),
        files: checksums,
    };
    manifest.features = feature_index;
    manifest.protocols = protocol_index;

    let manifest_path = layout.manifest();
    let manifest_bytes = encoding
        .encode(&manifest)
        .map_err(|detail| BundleError::Encode {
            what: "manifest".into(),
            detail,
        })?;
    files.insert(manifest_path.clone(), manifest_bytes);

    Ok(EncodedBundle {
        files,
        manifest,
        manifest_path,
    })
}

/// Decode one artifact, attaching its path to any error.
///
/// # Errors
/// [`BundleError::Decode`] naming `path`.
pub fn decode_artifact<T: DeserializeOwned>(
    encoding: Encoding,
    path: &Path,
    bytes: &[u8],
) -> Result<T, BundleError> {
    encoding
        .decode(bytes)
        .map_err(|detail| BundleError::Decode {
            path: path.to_path_buf(),
            detail,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
