//! The actions rule: pattern match over the request's action name.

use acl_names::ActionName;
use async_trait::async_trait;

use crate::context::BlockContext;
use crate::rules::{Collaborators, Rule, RulePhase, RuleResult};

pub struct ActionsRule {
    actions: Vec<ActionName>,
}

impl ActionsRule {
    /// # Errors
    /// Fails when the list is empty or a pattern is malformed.
    pub fn new(actions: &[String]) -> anyhow::Result<Self> {
        if actions.is_empty() {
            anyhow::bail!("actions rule requires at least one pattern");
        }
        let actions = actions
            .iter()
            .map(|a| ActionName::from_raw(a))
            .collect::<Result<_, _>>()?;
        Ok(Self { actions })
    }
}

#[async_trait]
impl Rule for ActionsRule {
    fn name(&self) -> &'static str {
        "actions"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Resource
    }

    async fn check(&self, ctx: BlockContext, _services: &Collaborators) -> RuleResult {
        let action = ctx.request().action.as_str();
        if self.actions.iter().any(|a| a.matches(action)) {
            RuleResult::fulfilled(ctx)
        } else {
            RuleResult::rejected()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rules::test_support::{collaborators, general_request};
    use std::sync::Arc;

    #[tokio::test]
    async fn action_patterns() {
        let services = collaborators();
        let ctx = || BlockContext::initial(Arc::new(general_request()));

        let rule = ActionsRule::new(&["indices:data/read/*".to_owned()]).unwrap();
        assert!(matches!(
            rule.check(ctx(), &services).await,
            RuleResult::Fulfilled(_)
        ));

        let rule = ActionsRule::new(&["cluster:*".to_owned()]).unwrap();
        assert!(matches!(
            rule.check(ctx(), &services).await,
            RuleResult::Rejected(None)
        ));
    }
}
