//! Logical section locks recorded in the manifest.
//!
//! A lock is a note in the bundle ("product-owner is editing idea"), not a
//! filesystem lock. Locking requires owning the section or the requested
//! path within it; unlocking does not, so any collaborator can clear a stale
//! lock.

use crate::error::BundleError;
use crate::merge::ownership::{owner, section_of};
use crate::model::manifest::{Manifest, SectionLock};
use crate::model::types::PersonaName;

/// Take the lock on the section containing `path` for `persona`.
///
/// `path` may be a leaf or a section path; it is coarsened first. A persona
/// may lock when it owns `path` itself or the whole section, so fine patterns
/// such as `features.*.acceptance` lock the feature they fall in. An
/// existing lock on that section is replaced. Returns the lock now held.
///
/// # Errors
/// [`BundleError::Authorization`] naming the actual owner (if any) when
/// `persona` owns neither `path` nor its section under `manifest.personas`.
pub fn lock(
    manifest: &mut Manifest,
    path: &str,
    persona: &PersonaName,
    now: u64,
) -> Result<SectionLock, BundleError> {
    let section = section_of(path);
    let path_owner = owner(path, &manifest.personas);
    let section_owner = owner(&section, &manifest.personas);
    if path_owner.as_ref() != Some(persona) && section_owner.as_ref() != Some(persona) {
        return Err(BundleError::Authorization {
            section,
            persona: persona.clone(),
            owner: path_owner.or(section_owner),
        });
    }

    let lock = SectionLock {
        section,
        owner: persona.clone(),
        locked_at: now,
    };
    match manifest.locks.iter_mut().find(|l| l.section == lock.section) {
        Some(existing) => {
            tracing::debug!(section = %lock.section, previous = %existing.owner, "replacing section lock");
            *existing = lock.clone();
        }
        None => manifest.locks.push(lock.clone()),
    }
    Ok(lock)
}

/// Remove the lock on the section containing `path`, whoever holds it.
/// Returns the removed lock.
pub fn unlock(manifest: &mut Manifest, path: &str) -> Option<SectionLock> {
    let section = section_of(path);
    let idx = manifest.locks.iter().position(|l| l.section == section)?;
    Some(manifest.locks.remove(idx))
}

/// The lock on the section containing `path`, if any.
#[must_use]
pub fn lock_for<'m>(manifest: &'m Manifest, path: &str) -> Option<&'m SectionLock> {
    let section = section_of(path);
    manifest.locks.iter().find(|l| l.section == section)
}

/// Returns `true` if the section containing `path` is locked.
#[must_use]
pub fn is_locked(manifest: &Manifest, path: &str) -> bool {
    lock_for(manifest, path).is_some()
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::model::manifest::default_personas;

    fn persona(s: &str) -> PersonaName {
        PersonaName::new(s).unwrap()
    }

    fn manifest() -> Manifest {
        Manifest {
            personas: default_personas(),
            ..Manifest::default()
        }
    }

    #[test]
    fn owner_can_lock_and_leaf_paths_coarsen() {
        let mut m = manifest();
        let held = lock(&mut m, "idea.title", &persona("product-owner"), 10).unwrap();
        assert_eq!(held.section, "idea");
        assert!(is_locked(&m, "idea"));
        assert!(is_locked(&m, "idea.narrative"));
        assert!(!is_locked(&m, "business"));
    }

    #[test]
    fn non_owner_is_refused_with_owner_named() {
        let mut m = manifest();
        let err = lock(&mut m, "idea", &persona("architect"), 10).unwrap_err();
        match err {
            BundleError::Authorization {
                section,
                persona: who,
                owner,
            } => {
                assert_eq!(section, "idea");
                assert_eq!(who, persona("architect"));
                assert_eq!(owner, Some(persona("product-owner")));
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(m.locks.is_empty());
    }

    #[test]
    fn story_section_lock() {
        let mut m = manifest();
        lock(
            &mut m,
            "features.F-1.stories.S-1.acceptance",
            &persona("product-owner"),
            1,
        )
        .unwrap();
        assert!(is_locked(&m, "features.F-1.stories"));
        assert!(!is_locked(&m, "features.F-2.stories"));
    }

    #[test]
    fn relock_replaces() {
        let mut m = manifest();
        lock(&mut m, "idea", &persona("product-owner"), 1).unwrap();
        lock(&mut m, "idea", &persona("product-owner"), 2).unwrap();
        assert_eq!(m.locks.len(), 1);
        assert_eq!(lock_for(&m, "idea").unwrap().locked_at, 2);
    }

    #[test]
    fn unlock_needs_no_ownership() {
        let mut m = manifest();
        lock(&mut m, "protocols.auth", &persona("architect"), 1).unwrap();
        let removed = unlock(&mut m, "protocols.auth.states").unwrap();
        assert_eq!(removed.owner, persona("architect"));
        assert!(!is_locked(&m, "protocols.auth"));
        assert!(unlock(&mut m, "protocols.auth").is_none());
    }

    #[test]
    fn field_owner_locks_the_enclosing_feature() {
        let mut m = manifest();
        let held = lock(&mut m, "features.F-1.acceptance", &persona("developer"), 1).unwrap();
        assert_eq!(held.section, "features.F-1");
        assert_eq!(held.owner, persona("developer"));

        let held = lock(&mut m, "features.F-2.constraints", &persona("architect"), 2).unwrap();
        assert_eq!(held.section, "features.F-2");
        assert_eq!(m.locks.len(), 2);
    }

    #[test]
    fn field_owner_is_named_when_another_persona_asks() {
        let mut m = manifest();
        let err = lock(&mut m, "features.F-1.constraints", &persona("developer"), 1).unwrap_err();
        assert!(matches!(
            err,
            BundleError::Authorization { owner: Some(ref o), .. } if *o == persona("architect")
        ));
        assert!(m.locks.is_empty());
    }

    #[test]
    fn unowned_section_cannot_be_locked() {
        let mut m = manifest();
        let err = lock(&mut m, "features.F-1.title", &persona("developer"), 1).unwrap_err();
        assert!(matches!(err, BundleError::Authorization { owner: None, .. }));
    }
}
