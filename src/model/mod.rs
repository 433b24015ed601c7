//! Bundle data model: the document tree, its manifest and identifier types.

pub mod bundle;
pub mod manifest;
pub mod types;

pub use bundle::{Bundle, Business, Feature, Idea, Product, Protocol, Release, Story, Transition};
pub use manifest::{
    BundleFormat, Manifest, PersonaMap, PersonaMapping, SectionLock, default_personas,
};
pub use types::{PersonaName, SectionKey, ValidationError};
