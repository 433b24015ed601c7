//! Shared fixtures for specbundle integration tests.
//!
//! Every test works in its own temp directory; nothing touches the real
//! working tree.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use specbundle::model::{
    Bundle, Business, Feature, Idea, PersonaName, Product, Protocol, Release, SectionKey, Story,
    Transition, default_personas,
};

pub fn key(s: &str) -> SectionKey {
    SectionKey::new(s).expect("valid key")
}

pub fn persona(s: &str) -> PersonaName {
    PersonaName::new(s).expect("valid persona")
}

/// A bundle exercising every entity kind: idea, business, product with a
/// release, two features (one with stories) and one protocol.
pub fn sample_bundle() -> Bundle {
    let mut bundle = Bundle::new(Product {
        themes: vec!["onboarding".into(), "payments".into()],
        releases: vec![Release {
            name: "v1".into(),
            objectives: vec!["ship checkout".into()],
            scope: vec!["FEATURE-001".into()],
            risks: vec![],
        }],
        metadata: BTreeMap::new(),
    });
    bundle.idea = Some(Idea {
        title: "Checkout".into(),
        narrative: "One-click checkout for returning customers".into(),
        target_users: vec!["shoppers".into()],
        value_hypothesis: "fewer abandoned carts".into(),
        constraints: vec![],
        metrics: BTreeMap::from([("conversion".into(), "+5%".into())]),
    });
    bundle.business = Some(Business {
        segments: vec!["retail".into()],
        problems: vec!["slow checkout".into()],
        ..Business::default()
    });

    let mut checkout = Feature::new(key("FEATURE-001"), "Checkout flow".into());
    checkout.outcomes = vec!["order placed".into()];
    checkout.acceptance = vec!["payment captured".into()];
    let mut pay = Story::new(key("STORY-001"), "Pay with saved card".into());
    pay.story_points = Some(3);
    pay.acceptance = vec!["card charged once".into()];
    checkout.stories.push(pay);
    checkout
        .stories
        .push(Story::new(key("STORY-002"), "Show receipt".into()));
    bundle.features.push(checkout);
    bundle
        .features
        .push(Feature::new(key("FEATURE-002"), "Order history".into()));

    let mut auth = Protocol::new(key("auth"));
    auth.states = vec!["anonymous".into(), "signed_in".into()];
    auth.start = "anonymous".into();
    auth.transitions.push(Transition {
        from: "anonymous".into(),
        on: "login".into(),
        to: "signed_in".into(),
        guard: None,
    });
    bundle.protocols.push(auth);

    bundle.manifest.personas = default_personas();
    bundle
}

/// Every regular file under `root`, relative path → bytes.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    collect(root, root, &mut out);
    out
}

fn collect(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries {
        let path = entry.expect("dir entry").path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            let rel = path.strip_prefix(root).expect("under root").to_path_buf();
            out.insert(rel, fs::read(&path).expect("read file"));
        }
    }
}

/// Sibling entries of `root` whose names start with `.<root name>.`:
/// staging and backup directories.
pub fn swap_leftovers(root: &Path) -> Vec<PathBuf> {
    let name = root
        .file_name()
        .expect("root has a name")
        .to_string_lossy()
        .into_owned();
    let prefix = format!(".{name}.");
    let parent = root.parent().expect("root has a parent");
    let mut found: Vec<PathBuf> = fs::read_dir(parent)
        .expect("read parent")
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .collect();
    found.sort();
    found
}
