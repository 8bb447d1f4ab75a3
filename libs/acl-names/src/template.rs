//! Index templates and the operations a request can perform on them.
//!
//! A template is multi-tenant by nature: its patterns apply cluster-wide.
//! The matching helpers here compute which of a template's patterns and
//! aliases fall inside an allowed pattern set, so the indices rule can
//! rewrite template operations without bleeding entries across tenants.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::matcher::is_subset_of;
use crate::name::{AliasName, IndexName, StringName, TemplateName};

/// Placeholder a template alias may carry; expanded per concrete matching
/// index at apply time.
pub const INDEX_PLACEHOLDER: &str = "{index}";

/// One existing template, as reported by the metadata source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Template {
    Legacy {
        name: TemplateName,
        patterns: BTreeSet<IndexName>,
        aliases: BTreeSet<AliasName>,
    },
    Index {
        name: TemplateName,
        patterns: BTreeSet<IndexName>,
        aliases: BTreeSet<AliasName>,
    },
    Component {
        name: TemplateName,
        aliases: BTreeSet<AliasName>,
    },
}

impl Template {
    #[must_use]
    pub fn name(&self) -> &TemplateName {
        match self {
            Self::Legacy { name, .. } | Self::Index { name, .. } | Self::Component { name, .. } => {
                name
            }
        }
    }

    #[must_use]
    pub fn aliases(&self) -> &BTreeSet<AliasName> {
        match self {
            Self::Legacy { aliases, .. }
            | Self::Index { aliases, .. }
            | Self::Component { aliases, .. } => aliases,
        }
    }

    #[must_use]
    pub fn patterns(&self) -> Option<&BTreeSet<IndexName>> {
        match self {
            Self::Legacy { patterns, .. } | Self::Index { patterns, .. } => Some(patterns),
            Self::Component { .. } => None,
        }
    }
}

/// The cluster's template inventory, split per flavor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplatesInventory {
    pub legacy: Vec<Template>,
    pub index: Vec<Template>,
    pub component: Vec<Template>,
}

/// What a template-oriented request wants to do, after classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateOperation {
    GetLegacy(BTreeSet<TemplateName>),
    GetIndex(BTreeSet<TemplateName>),
    GetLegacyAndIndex(BTreeSet<TemplateName>),
    GetComponent(BTreeSet<TemplateName>),
    AddLegacy {
        name: TemplateName,
        patterns: BTreeSet<IndexName>,
        aliases: BTreeSet<AliasName>,
    },
    AddIndex {
        name: TemplateName,
        patterns: BTreeSet<IndexName>,
        aliases: BTreeSet<AliasName>,
    },
    AddIndexAndGetAllowed {
        name: TemplateName,
        patterns: BTreeSet<IndexName>,
        aliases: BTreeSet<AliasName>,
    },
    AddComponent {
        name: TemplateName,
        aliases: BTreeSet<AliasName>,
    },
    DeleteLegacy(BTreeSet<TemplateName>),
    DeleteIndex(BTreeSet<TemplateName>),
    DeleteComponent(BTreeSet<TemplateName>),
}

/// Expand the `{index}` placeholder of an alias against the given concrete
/// or patterned index names. Aliases without the placeholder pass through
/// unchanged as singletons.
#[must_use]
pub fn expand_alias_placeholder(
    alias: &AliasName,
    patterns: &BTreeSet<IndexName>,
) -> BTreeSet<AliasName> {
    let raw = alias.as_str();
    if !raw.contains(INDEX_PLACEHOLDER) {
        return [alias.clone()].into();
    }
    patterns
        .iter()
        .filter_map(|p| {
            let expanded = raw.replace(INDEX_PLACEHOLDER, p.as_str());
            StringName::from_raw(&expanded).ok().map(AliasName::from)
        })
        .collect()
}

/// The subset of a template's patterns fully covered by the allowed set.
#[must_use]
pub fn patterns_allowed(
    template: &Template,
    allowed: &BTreeSet<StringName>,
) -> BTreeSet<IndexName> {
    template
        .patterns()
        .map(|patterns| {
            patterns
                .iter()
                .filter(|p| is_subset_of(p.name(), allowed))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// The subset of a template's aliases whose expansions against the already
/// admitted patterns all sit inside the allowed set.
#[must_use]
pub fn aliases_allowed(
    template: &Template,
    admitted_patterns: &BTreeSet<IndexName>,
    allowed: &BTreeSet<StringName>,
) -> BTreeSet<AliasName> {
    template
        .aliases()
        .iter()
        .filter(|alias| {
            expand_alias_placeholder(alias, admitted_patterns)
                .iter()
                .all(|a| is_subset_of(a.name(), allowed))
        })
        .cloned()
        .collect()
}

/// Narrow a template to the given allowed pattern set.
///
/// Legacy and index templates survive iff at least one of their patterns is
/// fully covered; they come back rewritten to the covered patterns and the
/// aliases whose expansions stay covered. Component templates carry no
/// patterns; they survive only when every alias (taken as a bare name) is
/// covered. An allowed set that covers everything passes templates through
/// unchanged.
#[must_use]
pub fn narrow(template: &Template, allowed: &BTreeSet<StringName>) -> Option<Template> {
    if allowed.iter().any(StringName::matches_all) {
        return Some(template.clone());
    }
    match template {
        Template::Legacy { name, .. } | Template::Index { name, .. } => {
            let admitted = patterns_allowed(template, allowed);
            if admitted.is_empty() {
                return None;
            }
            let aliases = aliases_allowed(template, &admitted, allowed);
            Some(match template {
                Template::Legacy { .. } => Template::Legacy {
                    name: name.clone(),
                    patterns: admitted,
                    aliases,
                },
                Template::Index { .. } | Template::Component { .. } => Template::Index {
                    name: name.clone(),
                    patterns: admitted,
                    aliases,
                },
            })
        }
        Template::Component { name, aliases } => {
            let covered = aliases
                .iter()
                .all(|a| is_subset_of(a.name(), allowed));
            covered.then(|| Template::Component {
                name: name.clone(),
                aliases: aliases.clone(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn idx(raw: &str) -> IndexName {
        IndexName::from_raw(raw).unwrap()
    }

    fn alias(raw: &str) -> AliasName {
        AliasName::from_raw(raw).unwrap()
    }

    fn tname(raw: &str) -> TemplateName {
        TemplateName::from_raw(raw).unwrap()
    }

    fn allowed(raw: &[&str]) -> BTreeSet<StringName> {
        raw.iter().map(|r| StringName::from_raw(r).unwrap()).collect()
    }

    #[test]
    fn placeholder_expansion() {
        let patterns: BTreeSet<_> = [idx("test1*"), idx("dev")].into();
        let expanded = expand_alias_placeholder(&alias("{index}_alias"), &patterns);
        assert_eq!(expanded, [alias("test1*_alias"), alias("dev_alias")].into());

        let plain = expand_alias_placeholder(&alias("fixed"), &patterns);
        assert_eq!(plain, [alias("fixed")].into());
    }

    #[test]
    fn patterns_allowed_filters_by_containment() {
        let t = Template::Legacy {
            name: tname("t1"),
            patterns: [idx("test1*"), idx("test2*")].into(),
            aliases: BTreeSet::new(),
        };
        let a = allowed(&["t*1*"]);
        assert_eq!(patterns_allowed(&t, &a), [idx("test1*")].into());
    }

    #[test]
    fn aliases_allowed_uses_expansion() {
        let t = Template::Legacy {
            name: tname("t1"),
            patterns: [idx("test1*"), idx("test2*")].into(),
            aliases: [alias("test1_alias"), alias("test2_alias")].into(),
        };
        let a = allowed(&["t*1*"]);
        let admitted = patterns_allowed(&t, &a);
        assert_eq!(aliases_allowed(&t, &admitted, &a), [alias("test1_alias")].into());
    }

    #[test]
    fn narrow_rewrites_legacy_template() {
        let t = Template::Legacy {
            name: tname("t1"),
            patterns: [idx("test1*"), idx("test2*")].into(),
            aliases: [alias("test1_alias"), alias("test2_alias")].into(),
        };
        let narrowed = narrow(&t, &allowed(&["t*1*"])).unwrap();
        assert_eq!(
            narrowed,
            Template::Legacy {
                name: tname("t1"),
                patterns: [idx("test1*")].into(),
                aliases: [alias("test1_alias")].into(),
            }
        );
    }

    #[test]
    fn narrow_drops_uncovered_template() {
        let t = Template::Legacy {
            name: tname("t2"),
            patterns: [idx("test3*"), idx("test4*")].into(),
            aliases: BTreeSet::new(),
        };
        assert_eq!(narrow(&t, &allowed(&["t*1*"])), None);
    }

    #[test]
    fn narrow_passes_through_when_everything_is_allowed() {
        let t = Template::Index {
            name: tname("t1"),
            patterns: [idx("test1*"), idx("test2*")].into(),
            aliases: [alias("anything")].into(),
        };
        assert_eq!(narrow(&t, &allowed(&["*"])), Some(t.clone()));
    }

    #[test]
    fn narrow_component_requires_all_aliases_covered() {
        let covered = Template::Component {
            name: tname("c1"),
            aliases: [alias("test1_alias")].into(),
        };
        assert!(narrow(&covered, &allowed(&["t*1*"])).is_some());

        let uncovered = Template::Component {
            name: tname("c1"),
            aliases: [alias("test1_alias"), alias("other")].into(),
        };
        assert_eq!(narrow(&uncovered, &allowed(&["t*1*"])), None);
    }

    #[test]
    fn component_templates_have_no_patterns() {
        let t = Template::Component {
            name: tname("c1"),
            aliases: [alias("shared")].into(),
        };
        assert!(t.patterns().is_none());
        assert!(patterns_allowed(&t, &allowed(&["*"])).is_empty());
    }
}
