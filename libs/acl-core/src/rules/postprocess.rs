//! Postprocessing rules: document filter, field-level security and
//! response-header additions. These never reject on content; they decorate
//! the block context for the adapter to apply.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::RulesLevelCreationError;
use crate::context::{BlockContext, FieldsRestrictions, FilterQuery};
use crate::rules::{Collaborators, Rule, RulePhase, RuleResult, resolution_context};
use crate::variables::{VariableCreationError, VariableTemplate};

/// `filter` — a query fragment the adapter wraps around reads; supports
/// runtime variables (`@{user}` is the common case).
pub struct FilterRule {
    query: VariableTemplate,
}

impl FilterRule {
    /// # Errors
    /// Fails on a malformed variable definition.
    pub fn new(definition: &str) -> Result<Self, VariableCreationError> {
        Ok(Self {
            query: VariableTemplate::single(definition)?,
        })
    }

    /// Variable kinds used, for block-level validation.
    pub fn used_kinds(&self) -> impl Iterator<Item = &crate::variables::VariableKind> {
        self.query.used_kinds()
    }
}

#[async_trait]
impl Rule for FilterRule {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Postprocessing
    }

    async fn check(&self, ctx: BlockContext, services: &Collaborators) -> RuleResult {
        let resolved = {
            let rc = resolution_context(&ctx, services.env.as_ref());
            self.query.resolve(&rc)
        };
        match resolved {
            Ok(values) => {
                let query = values.into_iter().next().unwrap_or_default();
                RuleResult::fulfilled(ctx.with_filter(FilterQuery(query)))
            }
            Err(error) => {
                tracing::debug!(%error, "filter rule variable did not resolve");
                RuleResult::rejected()
            }
        }
    }
}

/// `fields` — FLS. A leading `~` negates; negated and plain entries cannot
/// be mixed.
pub struct FieldsRule {
    restrictions: FieldsRestrictions,
}

impl FieldsRule {
    /// # Errors
    /// Fails on an empty list or on mixed negated and plain entries.
    pub fn new(fields: &[String]) -> Result<Self, RulesLevelCreationError> {
        if fields.is_empty() {
            return Err(RulesLevelCreationError::InvalidValue(
                "fields rule requires at least one field".to_owned(),
            ));
        }
        let negated = fields.iter().filter(|f| f.starts_with('~')).count();
        let restrictions = if negated == fields.len() {
            FieldsRestrictions::Blacklist(
                fields
                    .iter()
                    .map(|f| f.trim_start_matches('~').to_owned())
                    .collect(),
            )
        } else if negated == 0 {
            FieldsRestrictions::Whitelist(fields.iter().cloned().collect())
        } else {
            return Err(RulesLevelCreationError::InvalidValue(
                "fields rule cannot mix negated and plain fields".to_owned(),
            ));
        };
        Ok(Self { restrictions })
    }
}

#[async_trait]
impl Rule for FieldsRule {
    fn name(&self) -> &'static str {
        "fields"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Postprocessing
    }

    async fn check(&self, ctx: BlockContext, _services: &Collaborators) -> RuleResult {
        RuleResult::fulfilled(ctx.with_fields(self.restrictions.clone()))
    }
}

/// Response-header additions recorded on the common context payload.
pub struct ResponseHeadersRule {
    headers: BTreeMap<String, String>,
}

impl ResponseHeadersRule {
    /// # Errors
    /// Fails on an empty map.
    pub fn new(headers: BTreeMap<String, String>) -> Result<Self, RulesLevelCreationError> {
        if headers.is_empty() {
            return Err(RulesLevelCreationError::InvalidValue(
                "response_headers rule requires at least one header".to_owned(),
            ));
        }
        Ok(Self { headers })
    }
}

#[async_trait]
impl Rule for ResponseHeadersRule {
    fn name(&self) -> &'static str {
        "response_headers"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Postprocessing
    }

    async fn check(&self, ctx: BlockContext, _services: &Collaborators) -> RuleResult {
        let mut ctx = ctx;
        for (name, value) in &self.headers {
            ctx = ctx.with_response_header(name.clone(), value.clone());
        }
        RuleResult::fulfilled(ctx)
    }
}
