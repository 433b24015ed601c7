//! Types that flow through a three-way bundle merge.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::bundle::Bundle;
use crate::model::types::PersonaName;

// ---------------------------------------------------------------------------
// Side / Resolution
// ---------------------------------------------------------------------------

/// One of the two edited copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ours,
    Theirs,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// A caller-supplied answer for one conflicting leaf path.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Take the ours value.
    Ours,
    /// Take the theirs value.
    Theirs,
    /// Revert to the base value.
    Base,
    /// Use an explicit value. `None` removes the leaf.
    Value(Option<Value>),
}

/// Knobs for [`super::merge`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeOptions {
    /// Manual answers keyed by full leaf path. Consulted only for conflicts
    /// that ownership could not resolve.
    pub manual: BTreeMap<String, Resolution>,
    /// Side taken for any conflict that is neither owned nor manually
    /// answered. `None` leaves such conflicts unresolved.
    pub fallback: Option<Side>,
}

impl MergeOptions {
    /// Add a manual answer for `path`.
    #[must_use]
    pub fn resolve(mut self, path: impl Into<String>, resolution: Resolution) -> Self {
        self.manual.insert(path.into(), resolution);
        self
    }

    /// Set the fallback side.
    #[must_use]
    pub const fn prefer(mut self, side: Side) -> Self {
        self.fallback = Some(side);
        self
    }
}

// ---------------------------------------------------------------------------
// Conflict
// ---------------------------------------------------------------------------

/// A leaf that both sides changed differently and nothing could resolve.
///
/// Values are `None` when the leaf is absent on that side (the entity was
/// deleted, or an optional field was unset).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Conflict {
    /// Coarse section the leaf belongs to (see
    /// [`super::ownership::section_of`]).
    pub section: String,
    /// Full dotted leaf path.
    pub path: String,
    pub base: Option<Value>,
    pub ours: Option<Value>,
    pub theirs: Option<Value>,
    /// The persona that owns the leaf, if any. Set but matching neither side
    /// means a third persona owns it.
    pub owner: Option<PersonaName>,
    pub ours_persona: PersonaName,
    pub theirs_persona: PersonaName,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| v.as_ref().map_or_else(|| "<absent>".to_owned(), Value::to_string);
        write!(
            f,
            "{} (section {}): base={} ours[{}]={} theirs[{}]={}",
            self.path,
            self.section,
            show(&self.base),
            self.ours_persona,
            show(&self.ours),
            self.theirs_persona,
            show(&self.theirs),
        )?;
        match &self.owner {
            Some(owner) => write!(f, " owner={owner}"),
            None => write!(f, " unowned"),
        }
    }
}

// ---------------------------------------------------------------------------
// MergeResult
// ---------------------------------------------------------------------------

/// Outcome of a three-way merge.
///
/// Unresolved conflicts are data: `merged` holds the **ours** value at each
/// unresolved path until a caller resolves it and merges again.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeResult {
    pub merged: Bundle,
    /// Unresolved conflicts, in merged path order.
    pub conflicts: Vec<Conflict>,
    /// Conflicts settled by persona ownership.
    pub auto_resolved: usize,
    /// Conflicts settled by a manual answer or the fallback side.
    pub manually_resolved: usize,
    /// Conflicts left for the caller (`conflicts.len()`).
    pub unresolved: usize,
    /// Leaves changed on exactly one side and taken from it.
    pub fast_forwarded: usize,
}

impl MergeResult {
    /// Returns `true` if no conflict is left.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unresolved == 0
    }
}

// ---------------------------------------------------------------------------
// MergeError
// ---------------------------------------------------------------------------

/// Failure to map a leaf path back onto the bundle tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The path does not address a known leaf.
    UnknownPath { path: String, reason: String },
    /// The value does not fit the field's type.
    InvalidValue { path: String, detail: String },
    /// One of the three inputs fails [`Bundle::validate`](crate::model::Bundle::validate).
    InvalidInput { input: &'static str, detail: String },
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPath { path, reason } => {
                write!(
                    f,
                    "unknown bundle path '{path}': {reason}\n  To fix: use a leaf path such as idea.title or features.<KEY>.stories.<KEY>.acceptance."
                )
            }
            Self::InvalidValue { path, detail } => {
                write!(
                    f,
                    "value for '{path}' does not fit the field: {detail}\n  To fix: supply a value of the field's type (string, list, map, number or bool)."
                )
            }
            Self::InvalidInput { input, detail } => {
                write!(
                    f,
                    "{input} bundle is invalid: {detail}\n  To fix: correct the {input} bundle, then merge again."
                )
            }
        }
    }
}

impl std::error::Error for MergeError {}
