//! The indices rule: wildcard-aware, alias-aware, remote-cluster-aware
//! narrowing of the request's index set, plus all template operations.

mod templates;

use std::collections::BTreeSet;

use acl_names::{ClusterIndexName, IndexName, StringName, expand_aliases, filter_permitted};
use async_trait::async_trait;

use crate::context::{BlockContext, ContextPayload, IndicesPack};
use crate::rules::{Collaborators, RejectionCause, Rule, RulePhase, RuleResult};
use crate::variables::{ResolvableNames, VariableCreationError, VariableKind};

/// What the rule can do with a given payload variant.
#[derive(Clone, Copy)]
enum PayloadShape {
    /// Carries a flat index set the rule narrows.
    Indexed,
    /// Carries one index pack per inner query.
    Multi,
    /// Carries a template operation.
    Template,
    /// Carries no indices; the rule passes unless indices are mandatory.
    IndexFree,
    /// A payload this rule does not handle.
    Foreign,
}

impl PayloadShape {
    fn of(payload: &ContextPayload) -> Self {
        match payload {
            ContextPayload::GeneralIndex { .. }
            | ContextPayload::FilterableSingle { .. }
            | ContextPayload::Snapshot { .. } => Self::Indexed,
            ContextPayload::FilterableMulti { .. } => Self::Multi,
            ContextPayload::Template { .. } => Self::Template,
            ContextPayload::RorApi
            | ContextPayload::CurrentUserMetadata
            | ContextPayload::General => Self::IndexFree,
            ContextPayload::Repository { .. } => Self::Foreign,
        }
    }
}

pub struct IndicesRule {
    patterns: ResolvableNames,
    must_involve_indices: bool,
}

impl IndicesRule {
    /// # Errors
    /// Fails when the pattern list is empty or contains a malformed
    /// variable definition.
    pub fn new(
        definitions: &[String],
        must_involve_indices: bool,
    ) -> Result<Self, VariableCreationError> {
        if definitions.is_empty() {
            return Err(VariableCreationError::InvalidVariableDefinition(
                "indices rule requires at least one pattern".to_owned(),
            ));
        }
        Ok(Self {
            patterns: ResolvableNames::from_definitions(definitions)?,
            must_involve_indices,
        })
    }

    #[must_use]
    pub fn uses_variables(&self) -> bool {
        self.patterns.uses_variables()
    }

    /// Variable kinds used, for block-level validation.
    #[must_use]
    pub fn used_kinds(&self) -> Vec<&VariableKind> {
        self.patterns.used_kinds()
    }

    /// Resolve the configured pattern set for this evaluation.
    fn resolve_allowed(
        &self,
        ctx: &BlockContext,
        services: &Collaborators,
    ) -> Result<BTreeSet<ClusterIndexName>, RuleResult> {
        let rc = crate::rules::resolution_context(ctx, services.env.as_ref());
        let resolved = match self.patterns.resolve(&rc) {
            Ok(resolved) => resolved,
            Err(error) => {
                tracing::debug!(%error, "indices rule variable did not resolve");
                return Err(RuleResult::rejected());
            }
        };
        let allowed: BTreeSet<ClusterIndexName> = resolved
            .iter()
            .filter_map(|name| ClusterIndexName::from_raw(name.as_str()).ok())
            .collect();
        if allowed.is_empty() {
            return Err(RuleResult::rejected_with(RejectionCause::OperationNotAllowed));
        }
        Ok(allowed)
    }

    async fn check_general(
        &self,
        ctx: BlockContext,
        services: &Collaborators,
        allowed: BTreeSet<ClusterIndexName>,
    ) -> RuleResult {
        let requested = ctx.filtered_indices().cloned().unwrap_or_default();
        if self.must_involve_indices && requested.is_empty() {
            return RuleResult::rejected_with(RejectionCause::IndexNotFound);
        }

        let found = match self.narrow_indices(&requested, &allowed, services).await {
            Ok(found) => found,
            Err(result) => return result,
        };

        if found.is_empty() {
            let all_patterns =
                !requested.is_empty() && requested.iter().all(ClusterIndexName::is_pattern);
            if !self.must_involve_indices && all_patterns {
                // Wildcard-only requests that narrow to nothing become an
                // empty-hits response downstream, never a 404.
                return RuleResult::fulfilled(
                    ctx.with_filtered_indices(BTreeSet::new(), allowed),
                );
            }
            if self.must_involve_indices || ctx.request().is_index_action() {
                return RuleResult::rejected_with(RejectionCause::IndexNotFound);
            }
            return RuleResult::rejected_with(RejectionCause::OperationNotAllowed);
        }

        RuleResult::fulfilled(ctx.with_filtered_indices(found, allowed))
    }

    async fn check_multi(
        &self,
        ctx: BlockContext,
        services: &Collaborators,
        allowed: BTreeSet<ClusterIndexName>,
    ) -> RuleResult {
        let ContextPayload::FilterableMulti { index_packs, .. } = ctx.payload() else {
            return RuleResult::rejected();
        };
        let packs = index_packs.clone();

        let mut narrowed_packs = Vec::with_capacity(packs.len());
        let mut any_requested = false;
        let mut any_found = false;
        for pack in packs {
            match pack {
                IndicesPack::Found(requested) => {
                    if !requested.is_empty() {
                        any_requested = true;
                    }
                    let found = match self.narrow_indices(&requested, &allowed, services).await {
                        Ok(found) => found,
                        Err(result) => return result,
                    };
                    if !found.is_empty() {
                        any_found = true;
                    }
                    narrowed_packs.push(IndicesPack::Found(found));
                }
                IndicesPack::NotFound => narrowed_packs.push(IndicesPack::NotFound),
            }
        }

        if !any_found && any_requested {
            return RuleResult::rejected_with(RejectionCause::IndexNotFound);
        }
        RuleResult::fulfilled(ctx.with_index_packs(narrowed_packs))
    }

    /// Core narrowing: split requested names by locality, expand aliases,
    /// match both sides and union the admitted subsets.
    async fn narrow_indices(
        &self,
        requested: &BTreeSet<ClusterIndexName>,
        allowed: &BTreeSet<ClusterIndexName>,
        services: &Collaborators,
    ) -> Result<BTreeSet<ClusterIndexName>, RuleResult> {
        let substitute_all =
            requested.is_empty() || requested.iter().any(ClusterIndexName::matches_all);

        let mut local_requested: BTreeSet<IndexName> = BTreeSet::new();
        let mut remote_requested: BTreeSet<ClusterIndexName> = BTreeSet::new();
        if substitute_all {
            local_requested.insert(IndexName::from(StringName::Wildcard));
        } else {
            for name in requested {
                match name {
                    ClusterIndexName::Local(index) => {
                        local_requested.insert(index.clone());
                    }
                    remote @ ClusterIndexName::Remote { .. } => {
                        remote_requested.insert(remote.clone());
                    }
                }
            }
        }

        let local_allowed: BTreeSet<StringName> = allowed
            .iter()
            .filter_map(|name| match name {
                ClusterIndexName::Local(index) => Some(index.name().clone()),
                ClusterIndexName::Remote { .. } => None,
            })
            .collect();
        let remote_allowed: Vec<&ClusterIndexName> =
            allowed.iter().filter(|name| name.is_remote()).collect();

        let mut found = BTreeSet::new();

        if !local_requested.is_empty() && !local_allowed.is_empty() {
            let universe = match services.metadata.local_indices().await {
                Ok(universe) => universe,
                Err(error) => {
                    tracing::warn!(%error, "local indices lookup failed");
                    return Err(RuleResult::rejected_with(RejectionCause::OperationNotAllowed));
                }
            };
            let expanded = expand_aliases(&local_requested, &universe);
            let requested_names: BTreeSet<StringName> =
                expanded.iter().map(|i| i.name().clone()).collect();
            let universe_names: BTreeSet<String> = universe
                .iter()
                .map(|e| e.index.as_str().to_owned())
                .collect();
            for admitted in filter_permitted(&local_allowed, &requested_names, Some(&universe_names))
            {
                found.insert(ClusterIndexName::Local(IndexName::from(admitted)));
            }
        }

        for requested_remote in remote_requested {
            self.narrow_remote(&requested_remote, &remote_allowed, services, &mut found)
                .await?;
        }

        Ok(found)
    }

    /// Remote names match cluster and index parts independently. The remote
    /// universe is consulted only when the requested name carries wildcards
    /// and both-sided expansion is needed; concrete requests are admitted on
    /// pattern match alone and the remote cluster rejects unknowns.
    async fn narrow_remote(
        &self,
        requested: &ClusterIndexName,
        remote_allowed: &[&ClusterIndexName],
        services: &Collaborators,
        found: &mut BTreeSet<ClusterIndexName>,
    ) -> Result<(), RuleResult> {
        let admissible: Vec<&&ClusterIndexName> = remote_allowed
            .iter()
            .filter(|c| c.admits(requested))
            .collect();
        if admissible.is_empty() {
            return Ok(());
        }

        if !requested.is_pattern() {
            found.insert(requested.clone());
            return Ok(());
        }

        let ClusterIndexName::Remote {
            cluster: requested_cluster,
            index: requested_index,
        } = requested
        else {
            return Ok(());
        };

        let universe = match services.metadata.remote_indices(requested_cluster).await {
            Ok(universe) => universe,
            Err(error) => {
                tracing::warn!(%error, "remote indices lookup failed");
                return Err(RuleResult::rejected_with(RejectionCause::OperationNotAllowed));
            }
        };

        if universe.is_empty() {
            // No universe to enumerate: admit the structural intersection of
            // both sides and let the remote cluster do the final narrowing.
            for configured in admissible {
                let ClusterIndexName::Remote { cluster, index } = *configured else {
                    continue;
                };
                let (Some(cluster), Some(index)) = (
                    cluster.intersect(requested_cluster),
                    index.name().intersect(requested_index.name()),
                ) else {
                    continue;
                };
                found.insert(ClusterIndexName::Remote {
                    cluster,
                    index: IndexName::from(index),
                });
            }
            return Ok(());
        }

        for entry in universe.iter() {
            if !requested_cluster.matches(&entry.cluster)
                || !requested_index.matches(entry.index.as_str())
            {
                continue;
            }
            let concrete = ClusterIndexName::Remote {
                cluster: StringName::Full(entry.cluster.clone()),
                index: entry.index.clone(),
            };
            if remote_allowed.iter().any(|c| c.admits(&concrete)) {
                found.insert(concrete);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Rule for IndicesRule {
    fn name(&self) -> &'static str {
        "indices"
    }

    fn phase(&self) -> RulePhase {
        if self.uses_variables() {
            RulePhase::VariableResource
        } else {
            RulePhase::Resource
        }
    }

    async fn check(&self, ctx: BlockContext, services: &Collaborators) -> RuleResult {
        let allowed = match self.resolve_allowed(&ctx, services) {
            Ok(allowed) => allowed,
            Err(result) => return result,
        };
        let shape = PayloadShape::of(ctx.payload());
        match shape {
            PayloadShape::Indexed => self.check_general(ctx, services, allowed).await,
            PayloadShape::Multi => self.check_multi(ctx, services, allowed).await,
            PayloadShape::Template => {
                templates::check_template(self, ctx, services, &allowed).await
            }
            PayloadShape::IndexFree => {
                if self.must_involve_indices {
                    RuleResult::rejected_with(RejectionCause::OperationNotAllowed)
                } else {
                    RuleResult::fulfilled(ctx)
                }
            }
            PayloadShape::Foreign => RuleResult::rejected(),
        }
    }
}
