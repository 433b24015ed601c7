//! specbundle: persistence and persona-aware merging for specification
//! bundles.
//!
//! A bundle (idea, business context, product, features with stories,
//! protocols) is stored as a directory of YAML or JSON artifacts plus a
//! manifest holding per-file SHA-256 checksums, the persona ownership map
//! and section locks.
//!
//! - [`store`]: detect the on-disk layout, load with integrity checks, save
//!   atomically
//! - [`merge`]: three-way merge at leaf granularity, with conflicts settled by
//!   persona ownership
//! - [`locks`]: logical per-section locks
//!
//! The `specbundle` binary is a thin command layer over this crate.

pub mod config;
pub mod error;
pub mod failpoints;
pub mod locks;
pub mod merge;
pub mod model;
pub mod store;
pub mod telemetry;

pub use error::BundleError;
pub use locks::{is_locked, lock, unlock};
pub use merge::{MergeOptions, MergeResult, merge, merge_with};
pub use model::{Bundle, Manifest, PersonaName, SectionKey};
pub use store::detect::{Detection, Format};
pub use store::{BundleStore, detect_format, load, save};
