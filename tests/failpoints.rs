//! Integration tests: saves interrupted at each store failpoint.
//!
//! Run with `cargo test --features failpoints --test failpoints`. The
//! failpoint registry is process-global, so every test here holds `SERIAL`.

#![cfg(feature = "failpoints")]

mod common;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use specbundle::failpoints::{FailpointAction, clear_all, set};
use specbundle::store::swap::backup_dir;
use specbundle::{Bundle, BundleError};

use common::{sample_bundle, snapshot, swap_leftovers};

static SERIAL: Mutex<()> = Mutex::new(());

fn saved_bundle(dir: &Path) -> PathBuf {
    let root = dir.join("shop");
    let mut bundle = sample_bundle();
    specbundle::save(&mut bundle, &root, true).unwrap();
    root
}

fn edited(root: &Path) -> Bundle {
    let mut bundle = specbundle::load(root, true).unwrap();
    bundle.idea.as_mut().unwrap().title = "Edited".into();
    bundle
}

#[test]
fn failure_before_rename_keeps_in_place_bundle_intact() {
    let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    let dir = tempfile::tempdir().unwrap();
    let root = saved_bundle(dir.path());
    let before = snapshot(&root);
    let mut bundle = edited(&root);

    set("FP_WRITE_BEFORE_RENAME", FailpointAction::Error("crash".into()));
    let result = specbundle::save(&mut bundle, &root, false);
    clear_all();

    assert!(matches!(result, Err(BundleError::Failpoint(_))));
    assert_eq!(snapshot(&root), before);
}

#[test]
fn failure_after_stage_keeps_root_and_drops_staging() {
    let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    let dir = tempfile::tempdir().unwrap();
    let root = saved_bundle(dir.path());
    let before = snapshot(&root);
    let mut bundle = edited(&root);

    set("FP_SAVE_AFTER_STAGE", FailpointAction::Error("crash".into()));
    let result = specbundle::save(&mut bundle, &root, true);
    clear_all();

    assert!(matches!(result, Err(BundleError::Failpoint(_))));
    assert_eq!(snapshot(&root), before);
    assert!(swap_leftovers(&root).is_empty());
}

#[test]
fn failure_after_backup_is_readable_and_recoverable() {
    let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    let dir = tempfile::tempdir().unwrap();
    let root = saved_bundle(dir.path());
    let original = specbundle::load(&root, true).unwrap();
    let mut bundle = edited(&root);

    set("FP_SAVE_AFTER_BACKUP", FailpointAction::Error("crash".into()));
    let result = specbundle::save(&mut bundle, &root, true);
    clear_all();

    assert!(matches!(result, Err(BundleError::Failpoint(_))));
    assert!(!root.exists());
    assert!(backup_dir(&root).exists());
    assert_eq!(specbundle::load(&root, true).unwrap(), original);

    // The next save repairs, then commits the edit.
    let mut bundle = edited(&root);
    let report = specbundle::save(&mut bundle, &root, true).unwrap();
    assert!(report.recovery.restored_backup);
    assert_eq!(
        specbundle::load(&root, true).unwrap().idea.unwrap().title,
        "Edited"
    );
    assert!(swap_leftovers(&root).is_empty());
}
