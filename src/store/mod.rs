//! Bundle persistence: detection, integrity-checked load, atomic save.
//!
//! [`BundleStore`] ties the pieces together:
//!
//! - [`detect`]: which layout is on disk
//! - [`codec`]: entity ⇄ bytes, and the manifest built from the hashes
//! - [`integrity`]: SHA-256 checksum verification
//! - [`atomic`]: per-file temp + fsync + rename
//! - [`swap`]: whole-bundle commit by staging-directory swap, plus recovery
//!
//! Every disk access goes through a [`Filesystem`] so tests can inject
//! failures.

pub mod atomic;
pub mod codec;
pub mod detect;
pub mod fs;
pub mod integrity;
pub mod swap;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;

use self::atomic::AtomicWriter;
use self::codec::{EncodedBundle, Encoding, Layout, MonolithicDocument, decode_artifact};
use self::detect::{Detection, Format};
use self::fs::{EntryKind, Filesystem, OsFs};
use self::swap::Recovery;
use crate::error::BundleError;
use crate::model::bundle::{Bundle, Business, Feature, Idea, Product, Protocol};
use crate::model::manifest::{CHECKSUM_ALGORITHM, Manifest, PersonaMap, default_personas};

// ---------------------------------------------------------------------------
// AbortHandle
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, checked between files.
///
/// Cloning shares the flag, so one clone can be handed to another thread
/// (a signal handler, a UI) while the store holds the other.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Operations already past their last check finish.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous request so the handle can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Failpoints
// ---------------------------------------------------------------------------

#[cfg(feature = "failpoints")]
pub(crate) fn fp_store(name: &str) -> Result<(), BundleError> {
    crate::fp!(name).map_err(BundleError::Failpoint)
}

#[cfg(not(feature = "failpoints"))]
#[allow(clippy::unnecessary_wraps)]
pub(crate) const fn fp_store(_name: &str) -> Result<(), BundleError> {
    Ok(())
}

/// Seconds since the Unix epoch; 0 if the clock is before it.
#[must_use]
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// BundleStore
// ---------------------------------------------------------------------------

/// What a successful [`BundleStore::save`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveReport {
    /// Absolute path of the manifest that was written.
    pub manifest: PathBuf,
    /// Number of files written, manifest included.
    pub files: usize,
    /// Leftovers of an earlier interrupted save that were repaired first.
    pub recovery: Recovery,
}

/// Loads and saves bundles through a [`Filesystem`].
#[derive(Debug)]
pub struct BundleStore<F: Filesystem = OsFs> {
    fs: F,
    encoding: Encoding,
    default_personas: PersonaMap,
    abort: AbortHandle,
}

impl Default for BundleStore<OsFs> {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleStore<OsFs> {
    /// A store on the real filesystem writing YAML.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fs(OsFs)
    }
}

impl<F: Filesystem> BundleStore<F> {
    /// A store over a custom filesystem.
    #[must_use]
    pub fn with_fs(fs: F) -> Self {
        Self {
            fs,
            encoding: Encoding::default(),
            default_personas: default_personas(),
            abort: AbortHandle::new(),
        }
    }

    /// Encoding used when saving. Loading accepts any encoding.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Persona map written into manifests that declare none.
    #[must_use]
    pub fn with_default_personas(mut self, personas: PersonaMap) -> Self {
        self.default_personas = personas;
        self
    }

    /// Share an existing cancellation flag.
    #[must_use]
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The cancellation flag checked between files.
    #[must_use]
    pub const fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    #[must_use]
    pub const fn filesystem(&self) -> &F {
        &self.fs
    }

    /// Classify `path`. Never fails.
    pub fn detect(&self, path: &Path) -> Detection {
        detect::detect(&self.fs, path)
    }

    fn check_abort(&self) -> Result<(), BundleError> {
        if self.abort.is_aborted() {
            return Err(BundleError::Aborted);
        }
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, BundleError> {
        self.check_abort()?;
        self.fs.read(path).map_err(|e| BundleError::read(path, e))
    }

    fn read_decoded<T: DeserializeOwned>(
        &self,
        encoding: Encoding,
        path: &Path,
    ) -> Result<T, BundleError> {
        let bytes = self.read(path)?;
        decode_artifact(encoding, path, &bytes)
    }

    /// The first existing `<stem>.<ext>` under `dir` for any extension of
    /// `encoding`.
    fn find_artifact(&self, dir: &Path, stem: &str, encoding: Encoding) -> Option<PathBuf> {
        encoding
            .extensions()
            .iter()
            .map(|ext| dir.join(format!("{stem}.{ext}")))
            .find(|p| matches!(self.fs.kind(p), Ok(Some(EntryKind::File))))
    }

    // -- load ----------------------------------------------------------------

    /// Load the bundle at `root` (a bundle directory or a monolithic file).
    ///
    /// If an interrupted save left no live root, the backup is read instead;
    /// nothing is repaired on load.
    ///
    /// # Errors
    /// - [`BundleError::Format`] if no layout is recognized
    /// - [`BundleError::Integrity`] listing every mismatched artifact when
    ///   `validate_hashes` is set, including an idea, business or product
    ///   file the checksum table does not list
    /// - [`BundleError::Read`] / [`BundleError::Decode`] naming the artifact
    /// - [`BundleError::Aborted`] if cancelled between files
    #[tracing::instrument(level = "debug", skip_all, fields(root = %root.display(), validate_hashes))]
    pub fn load(&self, root: &Path, validate_hashes: bool) -> Result<Bundle, BundleError> {
        let readable = swap::readable_root(&self.fs, root);
        let detection = self.detect(&readable);
        let (format, location) = match (detection.format, detection.location) {
            (Format::Unknown, _) | (_, None) => {
                return Err(BundleError::Format {
                    path: root.to_path_buf(),
                    diagnostic: detection
                        .diagnostic
                        .unwrap_or_else(|| "unrecognized layout".to_owned()),
                });
            }
            (format, Some(location)) => (format, location),
        };

        if format == Format::Monolithic {
            if let Some(note) = &detection.diagnostic {
                tracing::debug!(%note, "loading monolithic bundle");
            }
            return self.load_monolithic(&location);
        }
        self.load_modular(&location, validate_hashes)
    }

    fn load_monolithic(&self, file: &Path) -> Result<Bundle, BundleError> {
        let encoding = Encoding::from_path(file).unwrap_or(self.encoding);
        let doc: MonolithicDocument = self.read_decoded(encoding, file)?;
        let bundle = doc.into_bundle();
        bundle.validate().map_err(|detail| BundleError::InvalidBundle { detail })?;
        Ok(bundle)
    }

    fn load_modular(
        &self,
        manifest_path: &Path,
        validate_hashes: bool,
    ) -> Result<Bundle, BundleError> {
        let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        let encoding = Encoding::from_path(manifest_path).unwrap_or(self.encoding);
        let manifest: Manifest = self.read_decoded(encoding, manifest_path)?;
        let idea_path = self.find_artifact(base, "idea", encoding);
        let business_path = self.find_artifact(base, "business", encoding);
        let product_found = self.find_artifact(base, "product", encoding);

        if validate_hashes {
            if !manifest
                .checksums
                .algorithm
                .eq_ignore_ascii_case(CHECKSUM_ALGORITHM)
            {
                return Err(BundleError::Decode {
                    path: manifest_path.to_path_buf(),
                    detail: format!(
                        "unsupported checksum algorithm '{}' (expected {CHECKSUM_ALGORITHM})",
                        manifest.checksums.algorithm
                    ),
                });
            }
            let mut mismatched = integrity::verify(&self.fs, &manifest.checksums.files, base);
            // Idea, business and product are found on disk, so one the table
            // does not list was added after the save.
            for path in [&idea_path, &business_path, &product_found].into_iter().flatten() {
                let rel = path.strip_prefix(base).unwrap_or(path);
                if !manifest.checksums.files.contains_key(rel) {
                    tracing::debug!(path = %rel.display(), "artifact not in the checksum table");
                    mismatched.push(rel.to_path_buf());
                }
            }
            if !mismatched.is_empty() {
                return Err(BundleError::Integrity {
                    root: base.to_path_buf(),
                    mismatched,
                });
            }
        }

        let idea: Option<Idea> = idea_path
            .map(|p| self.read_decoded(encoding, &p))
            .transpose()?;
        let business: Option<Business> = business_path
            .map(|p| self.read_decoded(encoding, &p))
            .transpose()?;
        let product_path =
            product_found.unwrap_or_else(|| base.join(Layout::new(encoding).product()));
        let product: Product = self.read_decoded(encoding, &product_path)?;

        let mut features = Vec::with_capacity(manifest.features.len());
        for entry in &manifest.features {
            let path = base.join(&entry.file);
            let feature: Feature = self.read_decoded(encoding, &path)?;
            if feature.key != entry.key {
                return Err(BundleError::Decode {
                    path,
                    detail: format!(
                        "file holds feature '{}' but the manifest indexes it as '{}'",
                        feature.key, entry.key
                    ),
                });
            }
            features.push(feature);
        }

        let mut protocols = Vec::with_capacity(manifest.protocols.len());
        for entry in &manifest.protocols {
            let path = base.join(&entry.file);
            let protocol: Protocol = self.read_decoded(encoding, &path)?;
            if protocol.name != entry.name {
                return Err(BundleError::Decode {
                    path,
                    detail: format!(
                        "file holds protocol '{}' but the manifest indexes it as '{}'",
                        protocol.name, entry.name
                    ),
                });
            }
            protocols.push(protocol);
        }

        let bundle = Bundle {
            schema_version: manifest.versions.schema.clone(),
            idea,
            business,
            product,
            features,
            protocols,
            manifest,
        };
        bundle.validate().map_err(|detail| BundleError::InvalidBundle { detail })?;
        tracing::debug!(
            features = bundle.features.len(),
            protocols = bundle.protocols.len(),
            "loaded modular bundle"
        );
        Ok(bundle)
    }

    /// Verify the checksum table of the bundle at `root` without decoding
    /// any entity. Returns the mismatched artifacts (empty when intact).
    /// Monolithic bundles carry no checksums and always verify clean.
    ///
    /// # Errors
    /// [`BundleError::Format`] if no layout is recognized, or a read/decode
    /// error for the manifest.
    pub fn verify(&self, root: &Path) -> Result<Vec<PathBuf>, BundleError> {
        let readable = swap::readable_root(&self.fs, root);
        let detection = self.detect(&readable);
        match (detection.format, detection.location) {
            (Format::Modular, Some(manifest_path)) => {
                let encoding = Encoding::from_path(&manifest_path).unwrap_or(self.encoding);
                let manifest: Manifest = self.read_decoded(encoding, &manifest_path)?;
                let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
                Ok(integrity::verify(&self.fs, &manifest.checksums.files, base))
            }
            (Format::Monolithic, Some(_)) => Ok(Vec::new()),
            _ => Err(BundleError::Format {
                path: root.to_path_buf(),
                diagnostic: detection
                    .diagnostic
                    .unwrap_or_else(|| "unrecognized layout".to_owned()),
            }),
        }
    }

    // -- save ----------------------------------------------------------------

    /// Save `bundle` as a modular bundle at `root`.
    ///
    /// Every entity is encoded, hashed, and the manifest is built from those
    /// hashes. With `atomic`, the whole tree is written to a staging
    /// directory and swapped in, so a reader sees the old or the new bundle
    /// and never a mix. Without it, files are replaced one at a time in
    /// place. Stale feature/protocol files are gone either way.
    ///
    /// On success `bundle.manifest` is replaced by the recomputed manifest.
    ///
    /// # Errors
    /// - [`BundleError::NotADirectory`] if `root` is a file, such as a
    ///   single-file bundle (nothing written)
    /// - [`BundleError::InvalidBundle`] on duplicate keys or a non-finite
    ///   confidence (nothing written)
    /// - [`BundleError::Write`] naming the path that failed
    /// - [`BundleError::Aborted`] if cancelled between files
    #[tracing::instrument(level = "debug", skip_all, fields(root = %root.display(), atomic))]
    pub fn save(
        &self,
        bundle: &mut Bundle,
        root: &Path,
        atomic: bool,
    ) -> Result<SaveReport, BundleError> {
        if matches!(self.fs.kind(root), Ok(Some(EntryKind::File))) {
            return Err(BundleError::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        let recovery = swap::recover(&self.fs, root)?;
        let encoded = codec::encode_bundle(
            bundle,
            self.encoding,
            now_unix_secs(),
            &self.default_personas,
        )?;
        self.check_abort()?;

        if atomic {
            self.save_staged(&encoded, root)?;
        } else {
            self.save_in_place(&encoded, root)?;
        }

        let report = SaveReport {
            manifest: root.join(&encoded.manifest_path),
            files: encoded.files.len(),
            recovery,
        };
        bundle.manifest = encoded.manifest;
        tracing::info!(
            root = %root.display(),
            files = report.files,
            atomic,
            "bundle saved"
        );
        Ok(report)
    }

    fn save_staged(&self, encoded: &EncodedBundle, root: &Path) -> Result<(), BundleError> {
        let staging = swap::staging_dir(root);
        let result = self.stage_and_swap(encoded, root, &staging);
        if result.is_err() && matches!(self.fs.kind(&staging), Ok(Some(_))) {
            if let Err(e) = self.fs.remove_dir_all(&staging) {
                tracing::warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
            }
        }
        result
    }

    fn stage_and_swap(
        &self,
        encoded: &EncodedBundle,
        root: &Path,
        staging: &Path,
    ) -> Result<(), BundleError> {
        self.fs
            .create_dir_all(staging)
            .map_err(|e| BundleError::write(staging, e))?;
        AtomicWriter::new(&self.fs)
            .with_abort(Some(&self.abort))
            .write_all(&encoded.files, staging)?;
        swap::carry_over_unmanaged(&self.fs, root, staging)?;
        fp_store("FP_SAVE_AFTER_STAGE")?;
        self.check_abort()?;
        swap::swap_in(&self.fs, staging, root)
    }

    fn save_in_place(&self, encoded: &EncodedBundle, root: &Path) -> Result<(), BundleError> {
        self.fs
            .create_dir_all(root)
            .map_err(|e| BundleError::write(root, e))?;
        AtomicWriter::new(&self.fs)
            .with_abort(Some(&self.abort))
            .write_all(&encoded.files, root)?;
        self.remove_stale(encoded, root)
    }

    /// Remove managed files under `root` that the new bundle no longer has:
    /// deleted features and protocols, a dropped idea/business, artifacts
    /// left in another encoding.
    fn remove_stale(&self, encoded: &EncodedBundle, root: &Path) -> Result<(), BundleError> {
        let listing = self
            .fs
            .read_dir(root)
            .map_err(|e| BundleError::read(root, e))?;
        let mut candidates = Vec::new();
        for entry in listing {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !Layout::is_managed_top_level(name) {
                continue;
            }
            match self.fs.kind(&entry) {
                Ok(Some(EntryKind::Dir)) => {
                    let children = self
                        .fs
                        .read_dir(&entry)
                        .map_err(|e| BundleError::read(&entry, e))?;
                    candidates.extend(
                        children
                            .into_iter()
                            .filter(|c| Encoding::from_path(c).is_some()),
                    );
                }
                Ok(Some(EntryKind::File)) => candidates.push(entry),
                _ => {}
            }
        }

        for path in candidates {
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            if encoded.files.contains_key(rel) {
                continue;
            }
            if !matches!(self.fs.kind(&path), Ok(Some(EntryKind::File))) {
                continue;
            }
            self.fs
                .remove_file(&path)
                .map_err(|e| BundleError::write(&path, e))?;
            tracing::debug!(path = %rel.display(), "removed stale artifact");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Free functions (real filesystem, YAML)
// ---------------------------------------------------------------------------

/// Load the bundle at `root`. See [`BundleStore::load`].
///
/// # Errors
/// See [`BundleStore::load`].
pub fn load(root: &Path, validate_hashes: bool) -> Result<Bundle, BundleError> {
    BundleStore::new().load(root, validate_hashes)
}

/// Save `bundle` at `root`. See [`BundleStore::save`].
///
/// # Errors
/// See [`BundleStore::save`].
pub fn save(bundle: &mut Bundle, root: &Path, atomic: bool) -> Result<SaveReport, BundleError> {
    BundleStore::new().save(bundle, root, atomic)
}

/// Classify `path`. See [`detect::detect`].
#[must_use]
pub fn detect_format(path: &Path) -> Detection {
    detect::detect(&OsFs, path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
