//! The repositories rule: same machinery as snapshots, over the repository
//! name universe.

use std::collections::BTreeSet;

use acl_names::{RepositoryName, StringName, filter_permitted};
use async_trait::async_trait;

use crate::config::RulesLevelCreationError;
use crate::context::{BlockContext, ContextPayload};
use crate::rules::{Collaborators, Rule, RulePhase, RuleResult, resolution_context};
use crate::variables::ResolvableNames;

pub struct RepositoriesRule {
    repositories: ResolvableNames,
}

impl RepositoriesRule {
    /// # Errors
    /// Fails on an empty list, a malformed variable definition, or a
    /// configured set that statically matches every repository.
    pub fn new(definitions: &[String]) -> Result<Self, RulesLevelCreationError> {
        if definitions.is_empty() {
            return Err(RulesLevelCreationError::InvalidValue(
                "repositories rule requires at least one pattern".to_owned(),
            ));
        }
        let repositories = ResolvableNames::from_definitions(definitions)?;
        if let Some(names) = repositories.static_names() {
            if names.iter().any(StringName::matches_all) {
                return Err(RulesLevelCreationError::MatchesAll(
                    "repositories".to_owned(),
                ));
            }
        }
        Ok(Self { repositories })
    }

    #[must_use]
    pub fn uses_variables(&self) -> bool {
        self.repositories.uses_variables()
    }

    /// Variable kinds used, for block-level validation.
    #[must_use]
    pub fn used_kinds(&self) -> Vec<&crate::variables::VariableKind> {
        self.repositories.used_kinds()
    }
}

#[async_trait]
impl Rule for RepositoriesRule {
    fn name(&self) -> &'static str {
        "repositories"
    }

    fn phase(&self) -> RulePhase {
        if self.uses_variables() {
            RulePhase::VariableResource
        } else {
            RulePhase::Resource
        }
    }

    async fn check(&self, ctx: BlockContext, services: &Collaborators) -> RuleResult {
        let repositories = match ctx.payload() {
            ContextPayload::Snapshot { repositories, .. }
            | ContextPayload::Repository { repositories } => repositories,
            _ => return RuleResult::rejected(),
        };
        let requested: BTreeSet<StringName> =
            repositories.iter().map(|r| r.name().clone()).collect();

        let configured = {
            let rc = resolution_context(&ctx, services.env.as_ref());
            match self.repositories.resolve(&rc) {
                Ok(configured) if !configured.is_empty() => configured,
                Ok(_) => {
                    return RuleResult::rejected_with(
                        crate::rules::RejectionCause::OperationNotAllowed,
                    );
                }
                Err(error) => {
                    tracing::debug!(%error, "repositories rule variable did not resolve");
                    return RuleResult::rejected();
                }
            }
        };

        let permitted = filter_permitted(&configured, &requested, None);
        if permitted.is_empty() {
            return RuleResult::rejected();
        }
        let narrowed: BTreeSet<RepositoryName> =
            permitted.into_iter().map(RepositoryName::from).collect();
        RuleResult::fulfilled(ctx.with_repositories(narrowed))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::request::{Request, RequestKind};
    use crate::rules::test_support::collaborators;
    use acl_names::ActionName;
    use std::sync::Arc;

    fn repo(raw: &str) -> RepositoryName {
        RepositoryName::from_raw(raw).unwrap()
    }

    fn repository_request(repositories: &[&str]) -> Request {
        Request::new(
            "test",
            ActionName::from_raw("cluster:admin/repository/get").unwrap(),
            RequestKind::Repository {
                repositories: repositories.iter().map(|r| repo(r)).collect(),
            },
        )
    }

    #[test]
    fn matches_all_configuration_is_rejected() {
        assert!(matches!(
            RepositoriesRule::new(&["*".to_owned()]),
            Err(RulesLevelCreationError::MatchesAll(_))
        ));
    }

    #[tokio::test]
    async fn narrows_requested_repositories() {
        let rule = RepositoriesRule::new(&["archive_*".to_owned()]).unwrap();
        let ctx = BlockContext::initial(Arc::new(repository_request(&[
            "archive_eu",
            "scratch",
        ])));

        match rule.check(ctx, &collaborators()).await {
            RuleResult::Fulfilled(ctx) => {
                let ContextPayload::Repository { repositories } = ctx.payload() else {
                    panic!("expected repository payload");
                };
                assert_eq!(repositories, &[repo("archive_eu")].into());
            }
            RuleResult::Rejected(_) => panic!("expected fulfilment"),
        }
    }
}
