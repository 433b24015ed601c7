//! Persona ownership of bundle paths, and section coarsening.
//!
//! A persona owns a path when one of its patterns matches the path's prefix
//! of the same length. Patterns are `.`-separated; `*` matches exactly one
//! segment:
//!
//! ```text
//! features.*.stories  owns  features.F-1.stories.S-1.acceptance
//! features.*.stories  does not own  features.F-1.title
//! idea                owns  idea.title
//! ```
//!
//! When several patterns match, the most specific wins: more segments first,
//! then more literal (non-`*`) segments. Two different personas tied at the
//! top leave the path unowned.

use crate::model::manifest::PersonaMap;
use crate::model::types::PersonaName;

// ---------------------------------------------------------------------------
// Section coarsening
// ---------------------------------------------------------------------------

/// One coarsening rule: paths starting with `prefix` (`*` = any segment)
/// coarsen to their first `keep` segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionRule {
    pub prefix: &'static [&'static str],
    pub keep: usize,
}

/// Coarsening boundaries per node kind, most specific first.
pub const SECTION_RULES: &[SectionRule] = &[
    SectionRule {
        prefix: &["idea"],
        keep: 1,
    },
    SectionRule {
        prefix: &["business"],
        keep: 1,
    },
    SectionRule {
        prefix: &["product"],
        keep: 1,
    },
    SectionRule {
        prefix: &["features", "*", "stories"],
        keep: 3,
    },
    SectionRule {
        prefix: &["features", "*"],
        keep: 2,
    },
    SectionRule {
        prefix: &["protocols", "*"],
        keep: 2,
    },
];

fn prefix_matches(pattern: &[&str], segments: &[&str]) -> bool {
    pattern.len() <= segments.len()
        && pattern
            .iter()
            .zip(segments)
            .all(|(p, s)| *p == "*" || p == s)
}

/// Map a leaf path to the section used for ownership display and locking.
///
/// Paths no rule recognizes are returned unchanged.
#[must_use]
pub fn section_of(path: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    SECTION_RULES
        .iter()
        .find(|rule| prefix_matches(rule.prefix, &segments))
        .map_or_else(|| path.to_owned(), |rule| segments[..rule.keep].join("."))
}

// ---------------------------------------------------------------------------
// Owner resolution
// ---------------------------------------------------------------------------

/// Specificity of a matching pattern: (segments, literal segments).
type Specificity = (usize, usize);

fn specificity(pattern: &[&str]) -> Specificity {
    (
        pattern.len(),
        pattern.iter().filter(|s| **s != "*").count(),
    )
}

/// Resolve the persona that owns `path`, if exactly one does at the highest
/// specificity.
#[must_use]
pub fn owner(path: &str, personas: &PersonaMap) -> Option<PersonaName> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut best: Option<(Specificity, &PersonaName)> = None;
    let mut tied = false;

    for (persona, mapping) in personas {
        for pattern in &mapping.owns {
            let pattern: Vec<&str> = pattern.split('.').collect();
            if !prefix_matches(&pattern, &segments) {
                continue;
            }
            let score = specificity(&pattern);
            match best {
                Some((top, _)) if score < top => {}
                Some((top, holder)) if score == top => {
                    if holder != persona {
                        tied = true;
                    }
                }
                _ => {
                    best = Some((score, persona));
                    tied = false;
                }
            }
        }
    }

    if tied {
        tracing::debug!(path, "ownership tie between personas; treating as unowned");
        return None;
    }
    best.map(|(_, persona)| persona.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::model::manifest::{PersonaMapping, default_personas};

    fn persona(s: &str) -> PersonaName {
        PersonaName::new(s).unwrap()
    }

    /// `owns` is a space-separated pattern list.
    fn map(entries: &[(&str, &str)]) -> PersonaMap {
        entries
            .iter()
            .map(|(name, owns)| (persona(name), PersonaMapping::new(owns.split_whitespace(), "")))
            .collect()
    }

    #[test]
    fn section_rules() {
        assert_eq!(section_of("idea.title"), "idea");
        assert_eq!(section_of("business.risks"), "business");
        assert_eq!(section_of("product.themes"), "product");
        assert_eq!(section_of("features.F-1.title"), "features.F-1");
        assert_eq!(
            section_of("features.F-1.stories.S-1.acceptance"),
            "features.F-1.stories"
        );
        assert_eq!(section_of("features.F-1.stories"), "features.F-1.stories");
        assert_eq!(section_of("features.F-1"), "features.F-1");
        assert_eq!(section_of("protocols.auth.states"), "protocols.auth");
        assert_eq!(section_of("features"), "features");
        assert_eq!(section_of("roadmap.q1"), "roadmap.q1");
    }

    #[test]
    fn wildcard_owns_descendants_only() {
        let personas = map(&[("po", "features.*.stories")]);
        assert_eq!(
            owner("features.FEATURE-001.stories.STORY-001.acceptance", &personas),
            Some(persona("po"))
        );
        assert_eq!(owner("features.FEATURE-001.stories", &personas), Some(persona("po")));
        assert_eq!(owner("features.FEATURE-001.title", &personas), None);
        assert_eq!(owner("features.FEATURE-001", &personas), None);
    }

    #[test]
    fn exact_leaf_pattern() {
        let personas = map(&[("po", "idea.title")]);
        assert_eq!(owner("idea.title", &personas), Some(persona("po")));
        assert_eq!(owner("idea.narrative", &personas), None);
    }

    #[test]
    fn longer_pattern_wins() {
        let personas = map(&[("po", "features"), ("dev", "features.*.acceptance")]);
        assert_eq!(owner("features.F-1.acceptance", &personas), Some(persona("dev")));
        assert_eq!(owner("features.F-1.title", &personas), Some(persona("po")));
    }

    #[test]
    fn literal_beats_wildcard_at_equal_length() {
        let personas = map(&[("po", "features.*.title"), ("lead", "features.F-1.title")]);
        assert_eq!(owner("features.F-1.title", &personas), Some(persona("lead")));
        assert_eq!(owner("features.F-2.title", &personas), Some(persona("po")));
    }

    #[test]
    fn exact_tie_is_unowned() {
        let personas = map(&[("a", "idea"), ("b", "idea")]);
        assert_eq!(owner("idea.title", &personas), None);
    }

    #[test]
    fn tie_is_broken_by_more_specific_match() {
        let personas = map(&[("a", "idea"), ("b", "idea"), ("c", "idea.title")]);
        assert_eq!(owner("idea.title", &personas), Some(persona("c")));
    }

    #[test]
    fn same_persona_duplicate_match_is_not_a_tie() {
        let personas = map(&[("a", "*.title idea.*")]);
        assert_eq!(owner("idea.title", &personas), Some(persona("a")));
    }

    #[test]
    fn pattern_longer_than_path_does_not_match() {
        let personas = map(&[("a", "idea.title.extra")]);
        assert_eq!(owner("idea.title", &personas), None);
    }

    #[test]
    fn default_map_assignments() {
        let personas = default_personas();
        assert_eq!(owner("idea.title", &personas), Some(persona("product-owner")));
        assert_eq!(
            owner("features.F-1.constraints", &personas),
            Some(persona("architect"))
        );
        assert_eq!(
            owner("features.F-1.acceptance", &personas),
            Some(persona("developer"))
        );
        assert_eq!(
            owner("features.F-1.stories.S-1.title", &personas),
            Some(persona("product-owner"))
        );
        assert_eq!(owner("protocols.auth.states", &personas), Some(persona("architect")));
        assert_eq!(owner("features.F-1.title", &personas), None);
    }
}
