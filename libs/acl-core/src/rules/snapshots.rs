//! The snapshots rule: the index-rule wildcard machinery constrained to the
//! snapshot name universe.

use std::collections::BTreeSet;

use acl_names::{SnapshotName, StringName, filter_permitted};
use async_trait::async_trait;

use crate::config::RulesLevelCreationError;
use crate::context::{BlockContext, ContextPayload};
use crate::rules::{Collaborators, Rule, RulePhase, RuleResult, resolution_context};
use crate::variables::ResolvableNames;

pub struct SnapshotsRule {
    snapshots: ResolvableNames,
}

impl SnapshotsRule {
    /// # Errors
    /// Fails on an empty list, a malformed variable definition, or a
    /// configured set that statically matches every snapshot.
    pub fn new(definitions: &[String]) -> Result<Self, RulesLevelCreationError> {
        if definitions.is_empty() {
            return Err(RulesLevelCreationError::InvalidValue(
                "snapshots rule requires at least one pattern".to_owned(),
            ));
        }
        let snapshots = ResolvableNames::from_definitions(definitions)?;
        if let Some(names) = snapshots.static_names() {
            if names.iter().any(StringName::matches_all) {
                return Err(RulesLevelCreationError::MatchesAll("snapshots".to_owned()));
            }
        }
        Ok(Self { snapshots })
    }

    #[must_use]
    pub fn uses_variables(&self) -> bool {
        self.snapshots.uses_variables()
    }

    /// Variable kinds used, for block-level validation.
    #[must_use]
    pub fn used_kinds(&self) -> Vec<&crate::variables::VariableKind> {
        self.snapshots.used_kinds()
    }
}

#[async_trait]
impl Rule for SnapshotsRule {
    fn name(&self) -> &'static str {
        "snapshots"
    }

    fn phase(&self) -> RulePhase {
        if self.uses_variables() {
            RulePhase::VariableResource
        } else {
            RulePhase::Resource
        }
    }

    async fn check(&self, ctx: BlockContext, services: &Collaborators) -> RuleResult {
        let ContextPayload::Snapshot { snapshots, .. } = ctx.payload() else {
            return RuleResult::rejected();
        };
        let requested: BTreeSet<StringName> =
            snapshots.iter().map(|s| s.name().clone()).collect();

        let configured = {
            let rc = resolution_context(&ctx, services.env.as_ref());
            match self.snapshots.resolve(&rc) {
                Ok(configured) if !configured.is_empty() => configured,
                Ok(_) => {
                    return RuleResult::rejected_with(
                        crate::rules::RejectionCause::OperationNotAllowed,
                    );
                }
                Err(error) => {
                    tracing::debug!(%error, "snapshots rule variable did not resolve");
                    return RuleResult::rejected();
                }
            }
        };

        let permitted = filter_permitted(&configured, &requested, None);
        if permitted.is_empty() {
            return RuleResult::rejected();
        }
        let narrowed: BTreeSet<SnapshotName> =
            permitted.into_iter().map(SnapshotName::from).collect();
        RuleResult::fulfilled(ctx.with_snapshots(narrowed))
    }
}
