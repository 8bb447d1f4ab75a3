//! Template operations of the indices rule.
//!
//! Templates are multi-tenant by nature, so the rule must guarantee a
//! tenant can neither observe nor create template entries that touch
//! indices or aliases outside the tenant's admitted namespace.

use std::collections::BTreeSet;

use acl_names::{
    ClusterIndexName, INDEX_PLACEHOLDER, IndexName, StringName, Template, TemplateName,
    TemplateOperation, TemplatesInventory, is_subset_of, narrow,
};

use crate::context::{BlockContext, ContextPayload, TemplateResponseFilter};
use crate::rules::{Collaborators, RejectionCause, RuleResult};

use super::IndicesRule;

pub(super) async fn check_template(
    _rule: &IndicesRule,
    ctx: BlockContext,
    services: &Collaborators,
    allowed: &BTreeSet<ClusterIndexName>,
) -> RuleResult {
    // Template patterns and aliases are local by definition.
    let allowed: BTreeSet<StringName> = allowed
        .iter()
        .filter_map(|name| match name {
            ClusterIndexName::Local(index) => Some(index.name().clone()),
            ClusterIndexName::Remote { .. } => None,
        })
        .collect();
    if allowed.is_empty() {
        return RuleResult::rejected_with(RejectionCause::OperationNotAllowed);
    }

    let ContextPayload::Template { operation, .. } = ctx.payload() else {
        return RuleResult::rejected();
    };
    let operation = operation.clone();

    let inventory = match services.metadata.templates().await {
        Ok(inventory) => inventory,
        Err(error) => {
            tracing::warn!(%error, "templates lookup failed");
            return RuleResult::rejected_with(RejectionCause::OperationNotAllowed);
        }
    };

    match operation {
        TemplateOperation::GetLegacy(names) => {
            check_get(ctx, &allowed, names, &[&inventory.legacy], TemplateOperation::GetLegacy)
        }
        TemplateOperation::GetIndex(names) => {
            check_get(ctx, &allowed, names, &[&inventory.index], TemplateOperation::GetIndex)
        }
        TemplateOperation::GetLegacyAndIndex(names) => check_get(
            ctx,
            &allowed,
            names,
            &[&inventory.legacy, &inventory.index],
            TemplateOperation::GetLegacyAndIndex,
        ),
        TemplateOperation::GetComponent(names) => check_get(
            ctx,
            &allowed,
            names,
            &[&inventory.component],
            TemplateOperation::GetComponent,
        ),
        TemplateOperation::AddLegacy {
            ref name,
            ref patterns,
            ref aliases,
        } => check_add(&allowed, name, Some(patterns), aliases, &inventory.legacy)
            .unwrap_or_else(|| fulfilled_unchanged(ctx, operation.clone(), &allowed)),
        TemplateOperation::AddIndex {
            ref name,
            ref patterns,
            ref aliases,
        } => check_add(&allowed, name, Some(patterns), aliases, &inventory.index)
            .unwrap_or_else(|| fulfilled_unchanged(ctx, operation.clone(), &allowed)),
        TemplateOperation::AddIndexAndGetAllowed {
            ref name,
            ref patterns,
            ref aliases,
        } => check_add(&allowed, name, Some(patterns), aliases, &inventory.index)
            .unwrap_or_else(|| {
            let filter = TemplateResponseFilter::new(allowed.clone());
            fulfilled_unchanged(ctx.with_template_response_filter(filter), operation.clone(), &allowed)
        }),
        TemplateOperation::AddComponent {
            ref name,
            ref aliases,
        } => check_add(&allowed, name, None, aliases, &inventory.component)
            .unwrap_or_else(|| fulfilled_unchanged(ctx, operation.clone(), &allowed)),
        TemplateOperation::DeleteLegacy(names) => check_delete(
            ctx,
            &allowed,
            names,
            &inventory,
            services,
            TemplateOperation::DeleteLegacy,
            |inv| &inv.legacy,
        ),
        TemplateOperation::DeleteIndex(names) => check_delete(
            ctx,
            &allowed,
            names,
            &inventory,
            services,
            TemplateOperation::DeleteIndex,
            |inv| &inv.index,
        ),
        TemplateOperation::DeleteComponent(names) => check_delete(
            ctx,
            &allowed,
            names,
            &inventory,
            services,
            TemplateOperation::DeleteComponent,
            |inv| &inv.component,
        ),
    }
}

fn allowed_as_indices(allowed: &BTreeSet<StringName>) -> BTreeSet<ClusterIndexName> {
    allowed
        .iter()
        .map(|name| ClusterIndexName::Local(IndexName::from(name.clone())))
        .collect()
}

fn fulfilled_unchanged(
    ctx: BlockContext,
    operation: TemplateOperation,
    allowed: &BTreeSet<StringName>,
) -> RuleResult {
    RuleResult::fulfilled(ctx.with_template_operation(operation, allowed_as_indices(allowed)))
}

/// GET: drop or narrow matching templates, narrow the outbound name
/// patterns to the survivors, and leave a response transformation behind.
fn check_get(
    ctx: BlockContext,
    allowed: &BTreeSet<StringName>,
    names: BTreeSet<TemplateName>,
    flavors: &[&Vec<Template>],
    rebuild: fn(BTreeSet<TemplateName>) -> TemplateOperation,
) -> RuleResult {
    let get_all = names.is_empty();
    let candidates: Vec<&Template> = flavors
        .iter()
        .flat_map(|templates| templates.iter())
        .filter(|t| get_all || names.iter().any(|n| n.matches(t.name().as_str())))
        .collect();

    let surviving: Vec<&Template> = candidates
        .into_iter()
        .filter(|t| narrow(t, allowed).is_some())
        .collect();

    if surviving.is_empty() && !get_all {
        return RuleResult::rejected_with(RejectionCause::TemplateNotFound);
    }

    // The outbound operation fetches the surviving templates by name. A
    // get-all that survives nothing keeps its empty (= all) form; the
    // response filter drops whatever comes back.
    let narrowed_names: BTreeSet<TemplateName> =
        surviving.iter().map(|t| t.name().clone()).collect();
    let outbound = if narrowed_names.is_empty() {
        names
    } else {
        narrowed_names
    };

    let ctx = ctx
        .with_template_operation(rebuild(outbound), allowed_as_indices(allowed))
        .with_template_response_filter(TemplateResponseFilter::new(allowed.clone()));
    RuleResult::fulfilled(ctx)
}

/// ADD: the new template must sit fully inside the allowed set and, when it
/// overwrites an existing template, the existing one must as well —
/// otherwise the add would hijack a template visible to other tenants.
/// Returns `Some(rejection)` on failure, `None` when the add may proceed.
fn check_add(
    allowed: &BTreeSet<StringName>,
    name: &TemplateName,
    patterns: Option<&BTreeSet<IndexName>>,
    aliases: &BTreeSet<acl_names::AliasName>,
    existing: &[Template],
) -> Option<RuleResult> {
    if let Some(patterns) = patterns {
        if patterns.iter().any(|p| !is_subset_of(p.name(), allowed)) {
            return Some(RuleResult::rejected_with(RejectionCause::OperationNotAllowed));
        }
    }
    if !aliases_covered(aliases, allowed) {
        return Some(RuleResult::rejected_with(RejectionCause::OperationNotAllowed));
    }

    if let Some(current) = existing.iter().find(|t| t.name() == name) {
        if !template_fully_covered(current, allowed) {
            return Some(RuleResult::rejected_with(RejectionCause::OperationNotAllowed));
        }
    }
    None
}

/// DELETE: name patterns matching nothing are rewritten to a sentinel that
/// cannot match; patterns matching templates outside the allowed namespace
/// reject the whole operation.
#[allow(clippy::too_many_arguments)]
fn check_delete(
    ctx: BlockContext,
    allowed: &BTreeSet<StringName>,
    names: BTreeSet<TemplateName>,
    inventory: &TemplatesInventory,
    services: &Collaborators,
    rebuild: fn(BTreeSet<TemplateName>) -> TemplateOperation,
    flavor: fn(&TemplatesInventory) -> &Vec<Template>,
) -> RuleResult {
    let existing = flavor(inventory);
    let mut rewritten = BTreeSet::new();
    for pattern in names {
        let matched: Vec<&Template> = existing
            .iter()
            .filter(|t| pattern.matches(t.name().as_str()))
            .collect();
        if matched.is_empty() {
            let sentinel = format!("{}_ROR_{}", pattern.as_str(), services.ids.generate());
            match TemplateName::from_raw(&sentinel) {
                Ok(name) => {
                    rewritten.insert(name);
                }
                Err(_) => return RuleResult::rejected_with(RejectionCause::OperationNotAllowed),
            }
        } else if matched.iter().all(|t| template_fully_covered(t, allowed)) {
            rewritten.insert(pattern);
        } else {
            return RuleResult::rejected_with(RejectionCause::OperationNotAllowed);
        }
    }
    RuleResult::fulfilled(
        ctx.with_template_operation(rebuild(rewritten), allowed_as_indices(allowed)),
    )
}

/// Aliases carrying the `{index}` placeholder are accepted outright: their
/// concrete expansions are subsets of their index's pattern, which is
/// checked separately.
fn aliases_covered(
    aliases: &BTreeSet<acl_names::AliasName>,
    allowed: &BTreeSet<StringName>,
) -> bool {
    aliases.iter().all(|a| {
        a.as_str().contains(INDEX_PLACEHOLDER) || is_subset_of(a.name(), allowed)
    })
}

fn template_fully_covered(template: &Template, allowed: &BTreeSet<StringName>) -> bool {
    let patterns_ok = template
        .patterns()
        .is_none_or(|patterns| patterns.iter().all(|p| is_subset_of(p.name(), allowed)));
    patterns_ok && aliases_covered(template.aliases(), allowed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::request::{Request, RequestKind};
    use crate::rules::test_support::{StaticAuth, StaticMetadata, collaborators_with};
    use crate::rules::{Rule, RulePhase};
    use acl_names::{ActionName, AliasName};
    use std::sync::Arc;

    fn idx(raw: &str) -> IndexName {
        IndexName::from_raw(raw).unwrap()
    }

    fn alias(raw: &str) -> AliasName {
        AliasName::from_raw(raw).unwrap()
    }

    fn tname(raw: &str) -> TemplateName {
        TemplateName::from_raw(raw).unwrap()
    }

    fn rule(patterns: &[&str]) -> IndicesRule {
        IndicesRule::new(
            &patterns.iter().map(|p| (*p).to_owned()).collect::<Vec<_>>(),
            false,
        )
        .unwrap()
    }

    fn template_request(operation: TemplateOperation) -> Request {
        Request::new(
            "test",
            ActionName::from_raw("indices:admin/template/get").unwrap(),
            RequestKind::Template { operation },
        )
    }

    fn cluster_with_legacy(templates: Vec<Template>) -> Collaborators {
        collaborators_with(
            StaticMetadata {
                templates: TemplatesInventory {
                    legacy: templates,
                    ..TemplatesInventory::default()
                },
                ..StaticMetadata::default()
            },
            StaticAuth::default(),
        )
    }

    fn sample_cluster() -> Collaborators {
        cluster_with_legacy(vec![
            Template::Legacy {
                name: tname("t1"),
                patterns: [idx("test1*"), idx("test2*")].into(),
                aliases: [alias("test1_alias"), alias("test2_alias")].into(),
            },
            Template::Legacy {
                name: tname("t2"),
                patterns: [idx("test3*"), idx("test4*")].into(),
                aliases: [].into(),
            },
            Template::Legacy {
                name: tname("a3"),
                patterns: [idx("auditlog*")].into(),
                aliases: [].into(),
            },
        ])
    }

    #[tokio::test]
    async fn get_narrows_names_and_installs_response_filter() {
        let services = sample_cluster();
        let op = TemplateOperation::GetLegacy([tname("t*")].into());
        let ctx = BlockContext::initial(Arc::new(template_request(op)));

        match rule(&["t*1*"]).check(ctx, &services).await {
            RuleResult::Fulfilled(ctx) => {
                let ContextPayload::Template {
                    operation,
                    response_filter,
                    ..
                } = ctx.payload()
                else {
                    panic!("expected template payload");
                };
                assert_eq!(
                    operation,
                    &TemplateOperation::GetLegacy([tname("t1")].into())
                );
                let filter = response_filter.as_ref().unwrap();
                let narrowed = filter.apply(&[Template::Legacy {
                    name: tname("t1"),
                    patterns: [idx("test1*"), idx("test2*")].into(),
                    aliases: [alias("test1_alias"), alias("test2_alias")].into(),
                }]);
                assert_eq!(
                    narrowed,
                    vec![Template::Legacy {
                        name: tname("t1"),
                        patterns: [idx("test1*")].into(),
                        aliases: [alias("test1_alias")].into(),
                    }]
                );
            }
            RuleResult::Rejected(_) => panic!("expected fulfilment"),
        }
    }

    #[tokio::test]
    async fn get_rejects_when_nothing_survives() {
        let services = sample_cluster();
        let op = TemplateOperation::GetLegacy([tname("a3")].into());
        let ctx = BlockContext::initial(Arc::new(template_request(op)));

        assert!(matches!(
            rule(&["t*1*"]).check(ctx, &services).await,
            RuleResult::Rejected(Some(RejectionCause::TemplateNotFound))
        ));
    }

    #[tokio::test]
    async fn add_rejects_pattern_outside_allowed_set() {
        let services = cluster_with_legacy(vec![]);
        let op = TemplateOperation::AddLegacy {
            name: tname("t1"),
            patterns: [idx("test1*"), idx("test2*")].into(),
            aliases: [].into(),
        };
        let ctx = BlockContext::initial(Arc::new(template_request(op)));

        assert!(matches!(
            rule(&["t*1*"]).check(ctx, &services).await,
            RuleResult::Rejected(Some(RejectionCause::OperationNotAllowed))
        ));
    }

    #[tokio::test]
    async fn add_accepts_covered_patterns_and_placeholder_aliases() {
        let services = cluster_with_legacy(vec![]);
        let op = TemplateOperation::AddLegacy {
            name: tname("t1"),
            patterns: [idx("test1*")].into(),
            aliases: [alias("{index}_alias")].into(),
        };
        let ctx = BlockContext::initial(Arc::new(template_request(op)));

        assert!(matches!(
            rule(&["test1*"]).check(ctx, &services).await,
            RuleResult::Fulfilled(_)
        ));
    }

    #[tokio::test]
    async fn add_rejects_hijack_of_wider_existing_template() {
        let services = cluster_with_legacy(vec![Template::Legacy {
            name: tname("t1"),
            patterns: [idx("test1*"), idx("admin*")].into(),
            aliases: [].into(),
        }]);
        let op = TemplateOperation::AddLegacy {
            name: tname("t1"),
            patterns: [idx("test1*")].into(),
            aliases: [].into(),
        };
        let ctx = BlockContext::initial(Arc::new(template_request(op)));

        assert!(matches!(
            rule(&["test1*"]).check(ctx, &services).await,
            RuleResult::Rejected(Some(RejectionCause::OperationNotAllowed))
        ));
    }

    #[tokio::test]
    async fn delete_rewrites_unmatched_patterns_to_sentinels() {
        let services = cluster_with_legacy(vec![Template::Legacy {
            name: tname("t1"),
            patterns: [idx("test1*")].into(),
            aliases: [].into(),
        }]);
        let op = TemplateOperation::DeleteLegacy([tname("t1"), tname("ghost")].into());
        let ctx = BlockContext::initial(Arc::new(template_request(op)));

        match rule(&["test1*"]).check(ctx, &services).await {
            RuleResult::Fulfilled(ctx) => {
                let ContextPayload::Template { operation, .. } = ctx.payload() else {
                    panic!("expected template payload");
                };
                let TemplateOperation::DeleteLegacy(names) = operation else {
                    panic!("expected delete operation");
                };
                assert!(names.contains(&tname("t1")));
                assert!(names.iter().any(|n| n.as_str().starts_with("ghost_ROR_")));
                assert!(!names.contains(&tname("ghost")));
            }
            RuleResult::Rejected(_) => panic!("expected fulfilment"),
        }
    }

    #[tokio::test]
    async fn delete_rejects_when_matched_template_is_wider() {
        let services = cluster_with_legacy(vec![Template::Legacy {
            name: tname("t1"),
            patterns: [idx("test1*"), idx("admin*")].into(),
            aliases: [].into(),
        }]);
        let op = TemplateOperation::DeleteLegacy([tname("t1")].into());
        let ctx = BlockContext::initial(Arc::new(template_request(op)));

        assert!(matches!(
            rule(&["test1*"]).check(ctx, &services).await,
            RuleResult::Rejected(Some(RejectionCause::OperationNotAllowed))
        ));
    }

    #[tokio::test]
    async fn template_rule_phase_tracks_variables() {
        assert_eq!(rule(&["test1*"]).phase(), RulePhase::Resource);
        let with_vars = IndicesRule::new(&["logstash_@{user}*".to_owned()], false).unwrap();
        assert_eq!(with_vars.phase(), RulePhase::VariableResource);
    }
}
