//! Three-way merge of bundles at leaf granularity.
//!
//! # Classification
//!
//! For every leaf path in any of the three inputs (absent counts as a
//! value of its own):
//!
//! | base vs ours | base vs theirs | ours vs theirs | outcome |
//! |---|---|---|---|
//! | any | any | equal | take it (unchanged or convergent) |
//! | equal | differs | differs | take theirs (fast-forward) |
//! | differs | equal | differs | take ours (fast-forward) |
//! | differs | differs | differs | conflict |
//!
//! A conflict goes to the persona that owns the leaf: if that is the ours
//! persona, ours wins; if theirs, theirs wins. Otherwise a manual answer or
//! the fallback side settles it, and failing both it is reported and the
//! merged tree keeps the ours value at that path.
//!
//! # Reconstruction
//!
//! The merged bundle is rebuilt from the merged leaves, walked in ours
//! order, then theirs-only paths, then base-only paths. An entity survives
//! iff any of its leaves does. Presence wins over absence: when one side
//! deleted an entity that survives through the other side's edits, its
//! untouched leaves (stories included) come from the side that still has it
//! instead of fast-forwarding to absent. Schema version and manifest come
//! from ours.

use std::collections::BTreeSet;

use serde_json::Value;

use super::flatten::{FlatBundle, entity_root, flatten, rebuild};
use super::ownership::{owner, section_of};
use super::types::{Conflict, MergeError, MergeOptions, MergeResult, Resolution, Side};
use crate::model::bundle::Bundle;
use crate::model::manifest::PersonaMap;
use crate::model::types::PersonaName;

/// Merge with no manual answers and no fallback side.
///
/// # Errors
/// See [`merge_with`].
pub fn merge(
    base: &Bundle,
    ours: &Bundle,
    theirs: &Bundle,
    personas: &PersonaMap,
    ours_persona: &PersonaName,
    theirs_persona: &PersonaName,
) -> Result<MergeResult, MergeError> {
    merge_with(
        base,
        ours,
        theirs,
        personas,
        ours_persona,
        theirs_persona,
        &MergeOptions::default(),
    )
}

/// Merge `ours` and `theirs` against their common ancestor `base`.
///
/// # Errors
/// - [`MergeError::InvalidInput`] if an input has duplicate keys or a
///   non-finite confidence, which its leaf map could not represent
/// - [`MergeError::InvalidValue`] if a manual [`Resolution::Value`] does not
///   fit its field
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(ours = %ours_persona, theirs = %theirs_persona)
)]
pub fn merge_with(
    base: &Bundle,
    ours: &Bundle,
    theirs: &Bundle,
    personas: &PersonaMap,
    ours_persona: &PersonaName,
    theirs_persona: &PersonaName,
    options: &MergeOptions,
) -> Result<MergeResult, MergeError> {
    for (input, bundle) in [("base", base), ("ours", ours), ("theirs", theirs)] {
        bundle
            .validate()
            .map_err(|detail| MergeError::InvalidInput { input, detail })?;
    }

    let base_flat = flatten(base);
    let ours_flat = flatten(ours);
    let theirs_flat = flatten(theirs);

    let ours_entities: BTreeSet<&str> = ours_flat.paths().map(entity_root).collect();
    let theirs_entities: BTreeSet<&str> = theirs_flat.paths().map(entity_root).collect();

    // (path, chosen value, value to keep if the entity survives anyway)
    let mut decided: Vec<(&str, Option<&Value>, Option<&Value>)> =
        Vec::with_capacity(ours_flat.len());
    let mut conflicts = Vec::new();
    let mut auto_resolved = 0;
    let mut manually_resolved = 0;
    let mut fast_forwarded = 0;

    for path in path_universe(&base_flat, &ours_flat, &theirs_flat) {
        let b = base_flat.get(path);
        let o = ours_flat.get(path);
        let t = theirs_flat.get(path);

        let mut keep = None;
        let chosen = if o == t {
            o
        } else if o == b {
            fast_forwarded += 1;
            if t.is_none() && !theirs_entities.contains(entity_root(path)) {
                keep = o;
            }
            t
        } else if t == b {
            fast_forwarded += 1;
            if o.is_none() && !ours_entities.contains(entity_root(path)) {
                keep = t;
            }
            o
        } else {
            let section = section_of(path);
            let leaf_owner = owner(path, personas);

            if leaf_owner.as_ref() == Some(ours_persona) {
                auto_resolved += 1;
                tracing::debug!(path, %section, owner = %ours_persona, "conflict resolved by ownership (ours)");
                o
            } else if leaf_owner.as_ref() == Some(theirs_persona) {
                auto_resolved += 1;
                tracing::debug!(path, %section, owner = %theirs_persona, "conflict resolved by ownership (theirs)");
                t
            } else if let Some(answer) = options.manual.get(path) {
                manually_resolved += 1;
                tracing::debug!(path, %section, ?answer, "conflict resolved manually");
                match answer {
                    Resolution::Ours => o,
                    Resolution::Theirs => t,
                    Resolution::Base => b,
                    Resolution::Value(v) => v.as_ref(),
                }
            } else if let Some(side) = options.fallback {
                manually_resolved += 1;
                tracing::debug!(path, %section, %side, "conflict resolved by fallback side");
                match side {
                    Side::Ours => o,
                    Side::Theirs => t,
                }
            } else {
                tracing::debug!(path, %section, "conflict left unresolved");
                conflicts.push(Conflict {
                    section,
                    path: path.to_owned(),
                    base: b.cloned(),
                    ours: o.cloned(),
                    theirs: t.cloned(),
                    owner: leaf_owner,
                    ours_persona: ours_persona.clone(),
                    theirs_persona: theirs_persona.clone(),
                });
                o
            }
        };

        decided.push((path, chosen, keep));
    }

    // A side that dropped a whole entity loses to a side whose edits keep it
    // alive: the surviving entity is completed from where it is present.
    let surviving: BTreeSet<&str> = decided
        .iter()
        .filter(|(_, chosen, _)| chosen.is_some())
        .map(|&(path, _, _)| entity_root(path))
        .collect();
    let mut completed = 0;
    let mut merged: Vec<(&str, &Value)> = Vec::with_capacity(decided.len());
    for (path, chosen, keep) in decided {
        let value = match (chosen, keep) {
            (None, Some(kept)) if surviving.contains(entity_root(path)) => {
                completed += 1;
                Some(kept)
            }
            _ => chosen,
        };
        if let Some(value) = value {
            merged.push((path, value));
        }
    }
    if completed > 0 {
        fast_forwarded -= completed;
        tracing::debug!(completed, "kept leaves of entities deleted on one side but still in use");
    }

    let merged = rebuild(
        merged,
        ours.schema_version.clone(),
        ours.manifest.clone(),
    )?;
    let unresolved = conflicts.len();
    tracing::info!(
        auto_resolved,
        manually_resolved,
        unresolved,
        fast_forwarded,
        "merge complete"
    );

    Ok(MergeResult {
        merged,
        conflicts,
        auto_resolved,
        manually_resolved,
        unresolved,
        fast_forwarded,
    })
}

/// Every leaf path of the three inputs: ours order, then paths only theirs
/// has, then paths only base has.
fn path_universe<'a>(
    base: &'a FlatBundle,
    ours: &'a FlatBundle,
    theirs: &'a FlatBundle,
) -> Vec<&'a str> {
    let mut paths: Vec<&str> = ours.paths().collect();
    paths.extend(theirs.paths().filter(|p| !ours.contains(p)));
    paths.extend(
        base.paths()
            .filter(|p| !ours.contains(p) && !theirs.contains(p)),
    );
    paths
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
