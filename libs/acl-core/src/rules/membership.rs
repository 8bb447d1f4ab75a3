//! Authorisation rules over the authenticated caller: user-id and group
//! membership checks.

use acl_names::{GroupName, UserName};
use async_trait::async_trait;

use crate::context::BlockContext;
use crate::rules::{Collaborators, Rule, RulePhase, RuleResult, resolution_context};
use crate::variables::{VariableCreationError, VariableTemplate};

/// `users` — the logged user id must match one of the configured patterns.
pub struct UsersRule {
    users: Vec<UserName>,
}

impl UsersRule {
    /// # Errors
    /// Fails when the list is empty or a pattern is malformed.
    pub fn new(users: &[String]) -> anyhow::Result<Self> {
        if users.is_empty() {
            anyhow::bail!("users rule requires at least one pattern");
        }
        let users = users
            .iter()
            .map(|u| UserName::from_raw(u))
            .collect::<Result<_, _>>()?;
        Ok(Self { users })
    }
}

#[async_trait]
impl Rule for UsersRule {
    fn name(&self) -> &'static str {
        "users"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Authorization
    }

    async fn check(&self, ctx: BlockContext, _services: &Collaborators) -> RuleResult {
        let Some(user) = ctx.user_metadata().logged_user() else {
            return RuleResult::rejected();
        };
        if self.users.iter().any(|u| u.matches(&user.id)) {
            RuleResult::fulfilled(ctx)
        } else {
            RuleResult::rejected()
        }
    }
}

/// Header a caller may use to pin its preferred group.
pub const CURRENT_GROUP_HEADER: &str = "x-ror-current-group";

/// `groups` — intersect the caller's available groups with the configured
/// (possibly variable) group set; record the narrowed groups and the
/// current group on the user metadata.
pub struct GroupsRule {
    groups: Vec<VariableTemplate>,
}

impl GroupsRule {
    /// # Errors
    /// Fails when the list is empty or any entry is a malformed variable
    /// definition.
    pub fn new(definitions: &[String]) -> Result<Self, VariableCreationError> {
        if definitions.is_empty() {
            return Err(VariableCreationError::InvalidVariableDefinition(
                "groups rule requires at least one group".to_owned(),
            ));
        }
        let groups = definitions
            .iter()
            .map(|d| VariableTemplate::multi(d))
            .collect::<Result<_, _>>()?;
        Ok(Self { groups })
    }

    /// Variable kinds used, for block-level validation.
    pub fn used_kinds(&self) -> impl Iterator<Item = &crate::variables::VariableKind> {
        self.groups.iter().flat_map(VariableTemplate::used_kinds)
    }
}

#[async_trait]
impl Rule for GroupsRule {
    fn name(&self) -> &'static str {
        "groups"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Authorization
    }

    async fn check(&self, ctx: BlockContext, services: &Collaborators) -> RuleResult {
        let configured: Vec<GroupName> = {
            let rc = resolution_context(&ctx, services.env.as_ref());
            let mut resolved = Vec::new();
            for template in &self.groups {
                match template.resolve(&rc) {
                    Ok(values) => {
                        for value in values {
                            if let Ok(group) = GroupName::from_raw(&value) {
                                resolved.push(group);
                            }
                        }
                    }
                    Err(error) => {
                        tracing::debug!(%error, "groups rule could not resolve a group");
                        return RuleResult::rejected();
                    }
                }
            }
            resolved
        };

        let permitted: Vec<GroupName> = ctx
            .user_metadata()
            .available_groups()
            .iter()
            .filter(|g| configured.iter().any(|c| c.matches(g.as_str())))
            .cloned()
            .collect();
        if permitted.is_empty() {
            return RuleResult::rejected();
        }

        let preferred = ctx
            .request()
            .header(CURRENT_GROUP_HEADER)
            .and_then(|raw| GroupName::from_raw(raw).ok())
            .filter(|g| permitted.contains(g));
        let current = match preferred.or_else(|| permitted.first().cloned()) {
            Some(group) => group,
            None => return RuleResult::rejected(),
        };

        RuleResult::fulfilled(ctx.map_user_metadata(|md| {
            md.with_available_groups(permitted).with_current_group(current)
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::LoggedUser;
    use crate::rules::test_support::{collaborators, general_request};
    use std::sync::Arc;

    fn group(raw: &str) -> GroupName {
        GroupName::from_raw(raw).unwrap()
    }

    fn authenticated_ctx(groups: &[&str]) -> BlockContext {
        let ctx = BlockContext::initial(Arc::new(general_request()));
        let groups: Vec<GroupName> = groups.iter().map(|g| group(g)).collect();
        ctx.map_user_metadata(|md| {
            md.with_logged_user(LoggedUser::new("dev1"))
                .with_available_groups(groups)
        })
    }

    #[tokio::test]
    async fn users_rule_matches_patterns() {
        let rule = UsersRule::new(&["dev*".to_owned()]).unwrap();
        let services = collaborators();
        assert!(matches!(
            rule.check(authenticated_ctx(&[]), &services).await,
            RuleResult::Fulfilled(_)
        ));

        let rule = UsersRule::new(&["admin".to_owned()]).unwrap();
        assert!(matches!(
            rule.check(authenticated_ctx(&[]), &services).await,
            RuleResult::Rejected(None)
        ));
    }

    #[tokio::test]
    async fn users_rule_requires_authentication() {
        let rule = UsersRule::new(&["dev*".to_owned()]).unwrap();
        let services = collaborators();
        let ctx = BlockContext::initial(Arc::new(general_request()));
        assert!(matches!(
            rule.check(ctx, &services).await,
            RuleResult::Rejected(None)
        ));
    }

    #[tokio::test]
    async fn groups_rule_intersects_and_picks_current() {
        let rule = GroupsRule::new(&["team_*".to_owned()]).unwrap();
        let services = collaborators();
        let ctx = authenticated_ctx(&["team_a", "other", "team_b"]);

        match rule.check(ctx, &services).await {
            RuleResult::Fulfilled(ctx) => {
                let md = ctx.user_metadata();
                assert_eq!(
                    md.available_groups(),
                    &[group("team_a"), group("team_b")]
                );
                assert_eq!(md.current_group(), Some(&group("team_a")));
            }
            RuleResult::Rejected(_) => panic!("expected fulfilment"),
        }
    }

    #[tokio::test]
    async fn groups_rule_rejects_on_empty_intersection() {
        let rule = GroupsRule::new(&["admins".to_owned()]).unwrap();
        let services = collaborators();
        assert!(matches!(
            rule.check(authenticated_ctx(&["devs"]), &services).await,
            RuleResult::Rejected(None)
        ));
    }
}
