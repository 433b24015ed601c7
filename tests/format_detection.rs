//! Integration tests: recognizing bundle layouts on disk.
//!
//! Coverage:
//! - Modular directories, by manifest in either encoding
//! - Monolithic files, given directly or found inside a directory
//! - Unknown inputs carry a diagnostic that says why
//! - Loading an unknown path is a format error naming the path

mod common;

use std::fs;

use specbundle::store::codec::Encoding;
use specbundle::{BundleError, BundleStore, Format, detect_format};

use common::sample_bundle;

const MONOLITHIC: &str = "\
idea:
  title: Checkout
product: {}
features: []
";

#[test]
fn modular_directory_in_each_encoding() {
    for encoding in Encoding::ALL {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("shop");
        let mut bundle = sample_bundle();
        BundleStore::new()
            .with_encoding(encoding)
            .save(&mut bundle, &root, true)
            .unwrap();

        let detection = detect_format(&root);
        assert_eq!(detection.format, Format::Modular, "{encoding}");
        assert_eq!(
            detection.location,
            Some(root.join(format!("bundle.manifest.{}", encoding.extension())))
        );
        assert_eq!(detection.root(), Some(root.as_path()));
    }
}

#[test]
fn monolithic_file_and_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("shop.bundle.yaml");
    fs::write(&file, MONOLITHIC).unwrap();

    let direct = detect_format(&file);
    assert_eq!(direct.format, Format::Monolithic);
    assert_eq!(direct.location.as_deref(), Some(file.as_path()));

    let inside = detect_format(dir.path());
    assert_eq!(inside.format, Format::Monolithic);
    assert!(inside.diagnostic.unwrap().contains("legacy"));
}

#[test]
fn json_monolithic_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("shop.bundle.json");
    fs::write(
        &file,
        r#"{"product": {"themes": ["x"]}, "features": [{"key": "F-1", "title": "One"}]}"#,
    )
    .unwrap();
    assert_eq!(detect_format(&file).format, Format::Monolithic);
    let bundle = specbundle::load(&file, true).unwrap();
    assert_eq!(bundle.features[0].title, "One");
}

#[test]
fn unknown_inputs_explain_themselves() {
    let dir = tempfile::tempdir().unwrap();

    let missing = detect_format(&dir.path().join("ghost"));
    assert_eq!(missing.format, Format::Unknown);
    assert!(missing.diagnostic.unwrap().contains("does not exist"));

    let empty = detect_format(dir.path());
    assert_eq!(empty.format, Format::Unknown);
    assert!(empty.location.is_none());

    let garbage = dir.path().join("notes.yaml");
    fs::write(&garbage, "key: [unclosed\n").unwrap();
    let parsed = detect_format(&garbage);
    assert_eq!(parsed.format, Format::Unknown);
    assert!(parsed.diagnostic.unwrap().contains("not a valid"));

    let wrong_shape = dir.path().join("other.yaml");
    fs::write(&wrong_shape, "name: x\nitems: []\n").unwrap();
    let shaped = detect_format(&wrong_shape);
    assert_eq!(shaped.format, Format::Unknown);
    assert!(shaped.diagnostic.unwrap().contains("top-level keys: [items, name]"));
}

#[test]
fn two_monolithic_files_are_ambiguous() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.bundle.yaml"), MONOLITHIC).unwrap();
    fs::write(dir.path().join("b.bundle.yaml"), MONOLITHIC).unwrap();
    let detection = detect_format(dir.path());
    assert_eq!(detection.format, Format::Unknown);
    assert!(detection.diagnostic.unwrap().contains("several"));
}

#[test]
fn loading_unknown_path_is_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let ghost = dir.path().join("ghost");
    match specbundle::load(&ghost, true) {
        Err(BundleError::Format { path, diagnostic }) => {
            assert_eq!(path, ghost);
            assert!(!diagnostic.is_empty());
        }
        other => panic!("expected format error, got {other:?}"),
    }
}
