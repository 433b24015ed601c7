//! Persona-aware three-way merge of bundles.
//!
//! The pipeline is flatten → classify → resolve → rebuild:
//!
//! - **flatten**: base, ours and theirs become ordered leaf maps
//!   ([`flatten`]).
//! - **classify**: every path is unchanged, fast-forwarded from one side, or
//!   a conflict ([`engine`]).
//! - **resolve**: conflicts go to the owning persona ([`ownership`]), then to
//!   a manual answer or fallback side, else they are reported.
//! - **rebuild**: the merged leaves become a bundle again.
//!
//! # Determinism
//!
//! The same three inputs, persona map and options always produce the same
//! result: paths are walked in a fixed order derived from the inputs, and
//! nothing depends on hashing, timestamps or the environment.

pub mod engine;
pub mod flatten;
pub mod ownership;
pub mod types;


pub use engine::{merge, merge_with};
pub use flatten::{FlatBundle, apply, flatten};
pub use ownership::{owner, section_of};
pub use types::{Conflict, MergeError, MergeOptions, MergeResult, Resolution, Side};
