//! Bundle ⇄ ordered map of dotted leaf paths.
//!
//! ```text
//! idea.title                                       "Shop"
//! product.themes                                   ["payments"]
//! features.F-1.acceptance                          ["pays by card"]
//! features.F-1.stories.S-1.tasks                   ["wire PSP"]
//! protocols.auth.transitions                       [{from: .., on: .., to: ..}]
//! ```
//!
//! Every entity field except its identity (`key`, `name`) and the nested
//! `stories` collection is one atomic leaf: a list of acceptance criteria is
//! a single value, never diffed element-wise. `None` optional fields produce
//! no leaf.
//!
//! Order is fixed: idea, business, product, features in collection order
//! (each feature's fields, then its stories in collection order), protocols.
//! Field names within an entity are sorted.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::types::MergeError;
use crate::model::bundle::{Bundle, Business, Feature, Idea, Product, Protocol, Story};
use crate::model::manifest::Manifest;
use crate::model::types::SectionKey;

/// Leaf fields of each entity kind, sorted.
const IDEA_FIELDS: &[&str] = &[
    "constraints",
    "metrics",
    "narrative",
    "target_users",
    "title",
    "value_hypothesis",
];
const BUSINESS_FIELDS: &[&str] = &[
    "differentiation",
    "problems",
    "risks",
    "segments",
    "solutions",
];
const PRODUCT_FIELDS: &[&str] = &["metadata", "releases", "themes"];
const FEATURE_FIELDS: &[&str] = &[
    "acceptance",
    "confidence",
    "constraints",
    "draft",
    "outcomes",
    "title",
];
const STORY_FIELDS: &[&str] = &[
    "acceptance",
    "draft",
    "priority",
    "story_points",
    "tags",
    "tasks",
    "title",
    "value_points",
];
const PROTOCOL_FIELDS: &[&str] = &["guards", "start", "states", "transitions"];

// ---------------------------------------------------------------------------
// FlatBundle
// ---------------------------------------------------------------------------

/// Leaf paths with their values, in flatten order, with O(log n) lookup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatBundle {
    entries: Vec<(String, Value)>,
    index: BTreeMap<String, usize>,
}

impl FlatBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.index.get(path).map(|&i| &self.entries[i].1)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Append a leaf, or replace its value in place if the path is present.
    pub fn insert(&mut self, path: String, value: Value) {
        if let Some(&i) = self.index.get(&path) {
            self.entries[i].1 = value;
            return;
        }
        self.index.insert(path.clone(), self.entries.len());
        self.entries.push((path, value));
    }

    /// Paths in flatten order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(p, v)| (p.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// flatten
// ---------------------------------------------------------------------------

/// Flatten `bundle` into its leaf map. The manifest is not part of it.
#[must_use]
pub fn flatten(bundle: &Bundle) -> FlatBundle {
    let mut flat = FlatBundle::new();
    if let Some(idea) = &bundle.idea {
        push_entity(&mut flat, "idea", idea, &[]);
    }
    if let Some(business) = &bundle.business {
        push_entity(&mut flat, "business", business, &[]);
    }
    push_entity(&mut flat, "product", &bundle.product, &[]);

    for feature in &bundle.features {
        let prefix = format!("features.{}", feature.key);
        push_entity(&mut flat, &prefix, feature, &["key", "stories"]);
        for story in &feature.stories {
            let story_prefix = format!("{prefix}.stories.{}", story.key);
            push_entity(&mut flat, &story_prefix, story, &["key"]);
        }
    }

    for protocol in &bundle.protocols {
        let prefix = format!("protocols.{}", protocol.name);
        push_entity(&mut flat, &prefix, protocol, &["name"]);
    }
    flat
}

fn to_object<T: Serialize>(entity: &T) -> Map<String, Value> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn push_entity<T: Serialize>(flat: &mut FlatBundle, prefix: &str, entity: &T, skip: &[&str]) {
    let object = to_object(entity);
    let mut fields: Vec<(String, Value)> = object
        .into_iter()
        .filter(|(k, _)| !skip.contains(&k.as_str()))
        .collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    for (field, value) in fields {
        flat.insert(format!("{prefix}.{field}"), value);
    }
}

// ---------------------------------------------------------------------------
// Leaf paths
// ---------------------------------------------------------------------------

/// The top-level entity a leaf belongs to: `idea`, `business`, `product`,
/// `features.<KEY>` or `protocols.<name>`. Story leaves belong to their
/// feature.
#[must_use]
pub fn entity_root(path: &str) -> &str {
    let mut dots = path.match_indices('.').map(|(i, _)| i);
    let first = dots.next();
    let end = if path.starts_with("features.") || path.starts_with("protocols.") {
        dots.next()
    } else {
        first
    };
    end.map_or(path, |i| &path[..i])
}

/// A parsed leaf path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeafPath<'a> {
    Idea(&'a str),
    Business(&'a str),
    Product(&'a str),
    Feature {
        key: &'a str,
        field: &'a str,
    },
    Story {
        feature: &'a str,
        story: &'a str,
        field: &'a str,
    },
    Protocol {
        name: &'a str,
        field: &'a str,
    },
}

impl<'a> LeafPath<'a> {
    /// Parse a dotted leaf path, checking the field name against the entity.
    ///
    /// # Errors
    /// [`MergeError::UnknownPath`] if the shape or field is not a leaf.
    pub fn parse(path: &'a str) -> Result<Self, MergeError> {
        let segments: Vec<&str> = path.split('.').collect();
        let unknown = |reason: &str| MergeError::UnknownPath {
            path: path.to_owned(),
            reason: reason.to_owned(),
        };
        let check = |field: &str, fields: &[&str], kind: &str| {
            if fields.iter().any(|f| *f == field) {
                Ok(())
            } else {
                Err(unknown(&format!("{kind} has no leaf field '{field}'")))
            }
        };
        let check_key = |key: &str| {
            SectionKey::new(key)
                .map(|_| ())
                .map_err(|e| unknown(&e.to_string()))
        };

        match *segments.as_slice() {
            ["idea", field] => check(field, IDEA_FIELDS, "idea").map(|()| Self::Idea(field)),
            ["business", field] => {
                check(field, BUSINESS_FIELDS, "business").map(|()| Self::Business(field))
            }
            ["product", field] => {
                check(field, PRODUCT_FIELDS, "product").map(|()| Self::Product(field))
            }
            ["features", key, "stories", story, field] => {
                check_key(key)?;
                check_key(story)?;
                check(field, STORY_FIELDS, "story")?;
                Ok(Self::Story {
                    feature: key,
                    story,
                    field,
                })
            }
            ["features", key, field] => {
                check_key(key)?;
                check(field, FEATURE_FIELDS, "feature")?;
                Ok(Self::Feature { key, field })
            }
            ["protocols", name, field] => {
                check_key(name)?;
                check(field, PROTOCOL_FIELDS, "protocol")?;
                Ok(Self::Protocol { name, field })
            }
            _ => Err(unknown(
                "expected idea.<field>, business.<field>, product.<field>, features.<KEY>.<field>, features.<KEY>.stories.<KEY>.<field> or protocols.<name>.<field>",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Write `value` at the leaf `path`, creating the idea, business section,
/// feature, story or protocol it belongs to if missing (appended at the end
/// of its collection, with default values for its other fields).
///
/// # Errors
/// [`MergeError::UnknownPath`] for a path that is not a leaf,
/// [`MergeError::InvalidValue`] if `value` does not fit the field.
pub fn apply(bundle: &mut Bundle, path: &str, value: Value) -> Result<(), MergeError> {
    match LeafPath::parse(path)? {
        LeafPath::Idea(field) => {
            let idea = bundle.idea.get_or_insert_with(Idea::default);
            set_field(idea, path, field, value)
        }
        LeafPath::Business(field) => {
            let business = bundle.business.get_or_insert_with(Business::default);
            set_field(business, path, field, value)
        }
        LeafPath::Product(field) => set_field(&mut bundle.product, path, field, value),
        LeafPath::Feature { key, field } => {
            let feature = feature_entry(bundle, key, path)?;
            // Stories are path structure, not part of the feature leaf set.
            let stories = std::mem::take(&mut feature.stories);
            let result = set_field(feature, path, field, value);
            feature.stories = stories;
            result
        }
        LeafPath::Story {
            feature,
            story,
            field,
        } => {
            let feature = feature_entry(bundle, feature, path)?;
            let story = story_entry(feature, story, path)?;
            set_field(story, path, field, value)
        }
        LeafPath::Protocol { name, field } => {
            let protocol = protocol_entry(bundle, name, path)?;
            set_field(protocol, path, field, value)
        }
    }
}

fn parse_key(key: &str, path: &str) -> Result<SectionKey, MergeError> {
    SectionKey::new(key).map_err(|e| MergeError::UnknownPath {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

fn feature_entry<'b>(
    bundle: &'b mut Bundle,
    key: &str,
    path: &str,
) -> Result<&'b mut Feature, MergeError> {
    let idx = match bundle.features.iter().position(|f| f.key.as_str() == key) {
        Some(i) => i,
        None => {
            bundle
                .features
                .push(Feature::new(parse_key(key, path)?, String::new()));
            bundle.features.len() - 1
        }
    };
    Ok(&mut bundle.features[idx])
}

fn story_entry<'f>(
    feature: &'f mut Feature,
    key: &str,
    path: &str,
) -> Result<&'f mut Story, MergeError> {
    let idx = match feature.stories.iter().position(|s| s.key.as_str() == key) {
        Some(i) => i,
        None => {
            feature
                .stories
                .push(Story::new(parse_key(key, path)?, String::new()));
            feature.stories.len() - 1
        }
    };
    Ok(&mut feature.stories[idx])
}

fn protocol_entry<'b>(
    bundle: &'b mut Bundle,
    name: &str,
    path: &str,
) -> Result<&'b mut Protocol, MergeError> {
    let idx = match bundle.protocols.iter().position(|p| p.name.as_str() == name) {
        Some(i) => i,
        None => {
            bundle.protocols.push(Protocol::new(parse_key(name, path)?));
            bundle.protocols.len() - 1
        }
    };
    Ok(&mut bundle.protocols[idx])
}

/// Replace one field of `entity` by round-tripping it through a JSON object.
fn set_field<T>(entity: &mut T, path: &str, field: &str, value: Value) -> Result<(), MergeError>
where
    T: Serialize + DeserializeOwned,
{
    let mut object = to_object(entity);
    object.insert(field.to_owned(), value);
    *entity = serde_json::from_value(Value::Object(object)).map_err(|e| {
        MergeError::InvalidValue {
            path: path.to_owned(),
            detail: e.to_string(),
        }
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// rebuild
// ---------------------------------------------------------------------------

/// Build a bundle from leaves alone.
///
/// An entity exists iff at least one of its leaves is present; fields
/// without a leaf take their defaults. Entities appear in first-leaf order.
/// The product always exists.
///
/// # Errors
/// See [`apply`].
pub fn rebuild<'v, I>(
    leaves: I,
    schema_version: String,
    manifest: Manifest,
) -> Result<Bundle, MergeError>
where
    I: IntoIterator<Item = (&'v str, &'v Value)>,
{
    let mut bundle = Bundle::new(Product::default());
    bundle.schema_version = schema_version;
    bundle.manifest = manifest;
    for (path, value) in leaves {
        apply(&mut bundle, path, value.clone())?;
    }
    Ok(bundle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::model::bundle::Transition;
    use serde_json::json;

    fn key(s: &str) -> SectionKey {
        SectionKey::new(s).unwrap()
    }

    fn sample() -> Bundle {
        let mut bundle = Bundle::new(Product {
            themes: vec!["payments".into()],
            ..Product::default()
        });
        bundle.idea = Some(Idea {
            title: "Shop".into(),
            narrative: "Sell things".into(),
            ..Idea::default()
        });
        let mut f1 = Feature::new(key("F-1"), "Checkout".into());
        f1.acceptance = vec!["pays by card".into()];
        f1.confidence = Some(0.75);
        let mut s1 = Story::new(key("S-1"), "Pay".into());
        s1.story_points = Some(3);
        f1.stories.push(s1);
        f1.stories.push(Story::new(key("S-0"), "Refund".into()));
        bundle.features.push(f1);
        bundle.features.push(Feature::new(key("F-0"), "Search".into()));
        let mut auth = Protocol::new(key("auth"));
        auth.states = vec!["out".into(), "in".into()];
        auth.transitions.push(Transition {
            from: "out".into(),
            on: "login".into(),
            to: "in".into(),
            guard: None,
        });
        bundle.protocols.push(auth);
        bundle
    }

    #[test]
    fn flatten_order_is_fixed() {
        let flat = flatten(&sample());
        let paths: Vec<&str> = flat.paths().collect();
        let idx = |p: &str| paths.iter().position(|x| *x == p).unwrap();

        assert!(idx("idea.title") < idx("product.themes"));
        assert!(idx("product.themes") < idx("features.F-1.title"));
        // Collection order, not key order.
        assert!(idx("features.F-1.title") < idx("features.F-0.title"));
        assert!(idx("features.F-1.title") < idx("features.F-1.stories.S-1.title"));
        assert!(idx("features.F-1.stories.S-1.title") < idx("features.F-1.stories.S-0.title"));
        assert!(idx("features.F-1.stories.S-0.title") < idx("features.F-0.title"));
        assert!(idx("features.F-0.title") < idx("protocols.auth.states"));
        // Sorted within an entity.
        assert!(idx("features.F-1.acceptance") < idx("features.F-1.title"));
    }

    #[test]
    fn identity_and_nested_collections_are_not_leaves() {
        let flat = flatten(&sample());
        assert!(!flat.contains("features.F-1.key"));
        assert!(!flat.contains("features.F-1.stories"));
        assert!(!flat.contains("features.F-1.stories.S-1.key"));
        assert!(!flat.contains("protocols.auth.name"));
        assert!(!flat.contains("business.risks"));
        // Unset optionals produce no leaf.
        assert!(!flat.contains("features.F-0.confidence"));
        assert!(!flat.contains("features.F-1.stories.S-0.story_points"));
    }

    #[test]
    fn lists_are_atomic_leaves() {
        let flat = flatten(&sample());
        assert_eq!(
            flat.get("features.F-1.acceptance"),
            Some(&json!(["pays by card"]))
        );
    }

    #[test]
    fn rebuild_reproduces_bundle() {
        let bundle = sample();
        let flat = flatten(&bundle);
        let rebuilt = rebuild(
            flat.iter(),
            bundle.schema_version.clone(),
            bundle.manifest.clone(),
        )
        .unwrap();
        assert_eq!(rebuilt, bundle);
    }

    #[test]
    fn apply_creates_missing_entities() {
        let mut bundle = Bundle::new(Product::default());
        apply(
            &mut bundle,
            "features.F-9.stories.S-9.acceptance",
            json!(["works"]),
        )
        .unwrap();
        let feature = bundle.feature("F-9").unwrap();
        assert_eq!(feature.title, "");
        assert_eq!(feature.story("S-9").unwrap().acceptance, vec!["works"]);

        apply(&mut bundle, "business.risks", json!(["churn"])).unwrap();
        assert_eq!(bundle.business.unwrap().risks, vec!["churn"]);
    }

    #[test]
    fn apply_feature_field_keeps_stories() {
        let mut bundle = sample();
        apply(&mut bundle, "features.F-1.title", json!("Pay")).unwrap();
        let f = bundle.feature("F-1").unwrap();
        assert_eq!(f.title, "Pay");
        assert_eq!(f.stories.len(), 2);
    }

    #[test]
    fn apply_rejects_unknown_paths() {
        let mut bundle = sample();
        for bad in [
            "idea",
            "idea.color",
            "features.F-1.stories",
            "features.F-1.key",
            "features.F-1.stories.S-1.owner",
            "roadmap.items",
            "protocols.auth.name",
        ] {
            assert!(
                matches!(apply(&mut bundle, bad, json!("x")), Err(MergeError::UnknownPath { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn apply_rejects_wrong_type() {
        let mut bundle = sample();
        let err = apply(&mut bundle, "idea.target_users", json!(42)).unwrap_err();
        assert!(matches!(err, MergeError::InvalidValue { .. }));
        // The entity is untouched on failure.
        assert_eq!(bundle.idea.unwrap().title, "Shop");
    }

    #[test]
    fn null_clears_optional_field() {
        let mut bundle = sample();
        apply(&mut bundle, "features.F-1.confidence", Value::Null).unwrap();
        assert_eq!(bundle.feature("F-1").unwrap().confidence, None);
    }

    #[test]
    fn flat_insert_replaces_in_place() {
        let mut flat = FlatBundle::new();
        flat.insert("a".into(), json!(1));
        flat.insert("b".into(), json!(2));
        flat.insert("a".into(), json!(3));
        assert_eq!(flat.paths().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(flat.get("a"), Some(&json!(3)));
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn entity_root_groups_story_leaves_with_their_feature() {
        assert_eq!(entity_root("idea.title"), "idea");
        assert_eq!(entity_root("product.themes"), "product");
        assert_eq!(entity_root("features.F-1.title"), "features.F-1");
        assert_eq!(entity_root("features.F-1.stories.S-1.title"), "features.F-1");
        assert_eq!(entity_root("protocols.auth.states"), "protocols.auth");
    }
}
