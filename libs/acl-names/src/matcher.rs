//! The configured-vs-requested set matcher.
//!
//! Given a configured pattern set `C` and a requested name set `R`, compute
//! the permitted subset of `R`. Four cases per pair:
//!
//! 1. both plain — string equality after canonicalisation
//! 2. configured pattern, requested plain — glob test
//! 3. configured plain, requested pattern — reverse glob, enumerated over
//!    the universe when one is available
//! 4. both patterns — universe enumeration, or structural intersection when
//!    no universe is available

use std::collections::BTreeSet;

use crate::name::StringName;

/// Compute the permitted subset of `requested` against `configured`.
///
/// With a universe, requested patterns are expanded to the concrete names
/// they match and those names are admitted individually. Without one, the
/// structural intersection of the two patterns is admitted as a pattern so
/// the downstream target can do the final narrowing.
#[must_use]
pub fn filter_permitted(
    configured: &BTreeSet<StringName>,
    requested: &BTreeSet<StringName>,
    universe: Option<&BTreeSet<String>>,
) -> BTreeSet<StringName> {
    let mut permitted = BTreeSet::new();
    for r in requested {
        match r {
            StringName::Full(name) => {
                if configured.iter().any(|c| c.matches(name)) {
                    permitted.insert(r.clone());
                }
            }
            StringName::Pattern(_) | StringName::All | StringName::Wildcard => {
                match universe {
                    Some(names) => {
                        for name in names {
                            if r.matches(name) && configured.iter().any(|c| c.matches(name)) {
                                permitted.insert(StringName::Full(name.clone()));
                            }
                        }
                    }
                    None => {
                        for c in configured {
                            if let Some(intersection) = c.intersect(r) {
                                permitted.insert(intersection);
                            }
                        }
                    }
                }
            }
        }
    }
    permitted
}

/// Is pattern `p` a subset of the allowed set `A`?
///
/// For every concrete name `p` could match, some allowed name must match it
/// too. Computed structurally via glob containment; concrete allowed values
/// are singletons.
#[must_use]
pub fn is_subset_of(p: &StringName, allowed: &BTreeSet<StringName>) -> bool {
    allowed.iter().any(|a| a.contains(p))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn name(raw: &str) -> StringName {
        StringName::from_raw(raw).unwrap()
    }

    fn names(raw: &[&str]) -> BTreeSet<StringName> {
        raw.iter().map(|r| name(r)).collect()
    }

    fn universe(raw: &[&str]) -> BTreeSet<String> {
        raw.iter().map(|r| (*r).to_owned()).collect()
    }

    #[test]
    fn plain_vs_plain() {
        let permitted = filter_permitted(&names(&["test1_index"]), &names(&["test1_index"]), None);
        assert_eq!(permitted, names(&["test1_index"]));

        let rejected = filter_permitted(&names(&["test1_index"]), &names(&["test2_index"]), None);
        assert!(rejected.is_empty());
    }

    #[test]
    fn configured_pattern_vs_plain() {
        let permitted = filter_permitted(&names(&["test*"]), &names(&["test1_index"]), None);
        assert_eq!(permitted, names(&["test1_index"]));
    }

    #[test]
    fn configured_plain_vs_requested_pattern_with_universe() {
        let u = universe(&["test1_index", "test2_index", "metrics"]);
        let permitted = filter_permitted(&names(&["test1_index"]), &names(&["test*"]), Some(&u));
        assert_eq!(permitted, names(&["test1_index"]));
    }

    #[test]
    fn configured_plain_vs_requested_pattern_without_universe() {
        // No universe: the configured concrete name itself is admitted when
        // the requested pattern covers it.
        let permitted = filter_permitted(&names(&["test1_index"]), &names(&["test*"]), None);
        assert_eq!(permitted, names(&["test1_index"]));
    }

    #[test]
    fn pattern_vs_pattern_with_universe() {
        let u = universe(&["test1_index", "test11", "test2_index"]);
        let permitted = filter_permitted(&names(&["test1*"]), &names(&["test*"]), Some(&u));
        assert_eq!(permitted, names(&["test1_index", "test11"]));
    }

    #[test]
    fn pattern_vs_pattern_without_universe() {
        let permitted = filter_permitted(&names(&["test1*"]), &names(&["test*"]), None);
        assert_eq!(permitted, names(&["test1*"]));
    }

    #[test]
    fn wildcard_requested_expands_over_universe() {
        let u = universe(&["test1_index", "other"]);
        let permitted = filter_permitted(&names(&["test*"]), &names(&["*"]), Some(&u));
        assert_eq!(permitted, names(&["test1_index"]));
    }

    #[test]
    fn matching_is_idempotent() {
        let configured = names(&["test1*", "metrics"]);
        let requested = names(&["test*", "metrics", "logs-*"]);
        let u = universe(&["test1_index", "test2_index", "metrics", "logs-2020"]);

        let once = filter_permitted(&configured, &requested, Some(&u));
        let twice = filter_permitted(&configured, &once, Some(&u));
        assert_eq!(once, twice);

        let once = filter_permitted(&configured, &requested, None);
        let twice = filter_permitted(&configured, &once, None);
        assert_eq!(once, twice);
    }

    #[test]
    fn subset_check() {
        let allowed = names(&["t*1*"]);
        assert!(is_subset_of(&name("test1*"), &allowed));
        assert!(!is_subset_of(&name("test2*"), &allowed));
        assert!(is_subset_of(&name("test1_alias"), &allowed));
        assert!(is_subset_of(&name("anything"), &names(&["*"])));
    }
}
