//! The in-memory bundle tree.
//!
//! A [`Bundle`] is the whole specification document: an optional idea and
//! business context, product metadata, features (each with stories), protocol
//! definitions, and the [`Manifest`] that describes how the bundle was last
//! persisted.
//!
//! Keyed collections are plain `Vec`s so insertion order survives every
//! load/save/merge cycle; key uniqueness is checked by [`Bundle::validate`]
//! before anything is written.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::manifest::Manifest;
use super::types::SectionKey;

/// Current document schema version written by this crate.
pub const SCHEMA_VERSION: &str = "1.1";

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// The root aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Document schema version.
    pub schema_version: String,
    /// Product idea / narrative.
    pub idea: Option<Idea>,
    /// Business context.
    pub business: Option<Business>,
    /// Product metadata.
    pub product: Product,
    /// Features in insertion order; keys are unique.
    pub features: Vec<Feature>,
    /// Protocol definitions in insertion order; names are unique.
    pub protocols: Vec<Protocol>,
    /// Persistence metadata, recomputed on every save.
    pub manifest: Manifest,
}

impl Bundle {
    /// Create an empty bundle with a fresh manifest.
    #[must_use]
    pub fn new(product: Product) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            idea: None,
            business: None,
            product,
            features: Vec::new(),
            protocols: Vec::new(),
            manifest: Manifest::default(),
        }
    }

    /// Look up a feature by key.
    #[must_use]
    pub fn feature(&self, key: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.key.as_str() == key)
    }

    /// Look up a feature by key for mutation.
    pub fn feature_mut(&mut self, key: &str) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| f.key.as_str() == key)
    }

    /// Look up a protocol by name.
    #[must_use]
    pub fn protocol(&self, name: &str) -> Option<&Protocol> {
        self.protocols.iter().find(|p| p.name.as_str() == name)
    }

    /// Remove a feature (and its stories). Returns the removed feature.
    pub fn remove_feature(&mut self, key: &str) -> Option<Feature> {
        let idx = self.features.iter().position(|f| f.key.as_str() == key)?;
        Some(self.features.remove(idx))
    }

    /// Check the structural invariants that serialization relies on:
    /// unique feature keys, unique story keys per feature, unique protocol
    /// names, and a finite confidence where one is set.
    ///
    /// # Errors
    /// Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for feature in &self.features {
            if !seen.insert(feature.key.as_str()) {
                return Err(format!("duplicate feature key {}", feature.key));
            }
            if let Some(confidence) = feature.confidence {
                if !confidence.is_finite() {
                    return Err(format!(
                        "feature {} has non-finite confidence {confidence}",
                        feature.key
                    ));
                }
            }
            let mut stories = BTreeSet::new();
            for story in &feature.stories {
                if !stories.insert(story.key.as_str()) {
                    return Err(format!(
                        "duplicate story key {} in feature {}",
                        story.key, feature.key
                    ));
                }
            }
        }
        let mut names = BTreeSet::new();
        for protocol in &self.protocols {
            if !names.insert(protocol.name.as_str()) {
                return Err(format!("duplicate protocol name {}", protocol.name));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Idea / Business / Product
// ---------------------------------------------------------------------------

/// The product idea and narrative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Idea {
    pub title: String,
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub target_users: Vec<String>,
    #[serde(default)]
    pub value_hypothesis: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
}

/// Business context.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Business {
    #[serde(default)]
    pub segments: Vec<String>,
    #[serde(default)]
    pub problems: Vec<String>,
    #[serde(default)]
    pub solutions: Vec<String>,
    #[serde(default)]
    pub differentiation: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Product metadata: themes, releases, and free-form metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Product {
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub releases: Vec<Release>,
    /// Arbitrary metadata the command layer attaches (owners, links, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A planned release.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

// ---------------------------------------------------------------------------
// Feature / Story
// ---------------------------------------------------------------------------

/// A feature and its stories.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Feature {
    pub key: SectionKey,
    pub title: String,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Confidence score in `[0, 1]`, when an analysis produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub stories: Vec<Story>,
}

impl Feature {
    /// Create a feature with only a key and title.
    #[must_use]
    pub const fn new(key: SectionKey, title: String) -> Self {
        Self {
            key,
            title,
            outcomes: Vec::new(),
            acceptance: Vec::new(),
            constraints: Vec::new(),
            confidence: None,
            draft: false,
            stories: Vec::new(),
        }
    }

    /// Look up a story by key.
    #[must_use]
    pub fn story(&self, key: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.key.as_str() == key)
    }

    /// Look up a story by key for mutation.
    pub fn story_mut(&mut self, key: &str) -> Option<&mut Story> {
        self.stories.iter_mut().find(|s| s.key.as_str() == key)
    }
}

/// A user story inside a feature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Story {
    pub key: SectionKey,
    pub title: String,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub draft: bool,
}

impl Story {
    /// Create a story with only a key and title.
    #[must_use]
    pub const fn new(key: SectionKey, title: String) -> Self {
        Self {
            key,
            title,
            acceptance: Vec::new(),
            tags: Vec::new(),
            story_points: None,
            value_points: None,
            priority: None,
            tasks: Vec::new(),
            draft: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// A protocol (state machine) definition, carried as opaque data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Protocol {
    pub name: SectionKey,
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub guards: BTreeMap<String, String>,
}

impl Protocol {
    /// Create an empty protocol definition.
    #[must_use]
    pub const fn new(name: SectionKey) -> Self {
        Self {
            name,
            states: Vec::new(),
            start: String::new(),
            transitions: Vec::new(),
            guards: BTreeMap::new(),
        }
    }
}

/// A single protocol transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transition {
    pub from: String,
    pub on: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
