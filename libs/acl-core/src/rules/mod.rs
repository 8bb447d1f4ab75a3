//! The rule protocol: `check(blockContext) -> Fulfilled | Rejected`.
//!
//! Rules are pure with respect to the block context; effects go through the
//! injected collaborators. A block sorts its rules by phase before running
//! them: authentication first, then authorisation, then resource rules
//! (variable-free before variable-using), then postprocessing.

pub mod actions;
pub mod auth;
pub mod indices;
pub mod kibana;
pub mod membership;
pub mod postprocess;
pub mod repositories;
pub mod snapshots;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::audit::AuditSink;
use crate::context::BlockContext;
use crate::lookup::{AuthenticationService, CachedMetadataSource, EnvVarProvider, IdGenerator};
use crate::variables::ResolutionContext;

/// Why a rule rejected, when it can say.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCause {
    IndexNotFound,
    TemplateNotFound,
    OperationNotAllowed,
    ImpersonationNotAllowed,
    ImpersonationNotSupported,
}

/// Outcome of one rule check.
#[derive(Debug)]
pub enum RuleResult {
    Fulfilled(BlockContext),
    Rejected(Option<RejectionCause>),
}

impl RuleResult {
    #[must_use]
    pub fn fulfilled(ctx: BlockContext) -> Self {
        Self::Fulfilled(ctx)
    }

    #[must_use]
    pub fn rejected() -> Self {
        Self::Rejected(None)
    }

    #[must_use]
    pub fn rejected_with(cause: RejectionCause) -> Self {
        Self::Rejected(Some(cause))
    }
}

/// Evaluation order of a rule within its block. Variants are ordered; a
/// stable sort on this key preserves declaration order inside a phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RulePhase {
    Authentication,
    Authorization,
    Resource,
    VariableResource,
    Postprocessing,
}

/// The engine's injected collaborators, shared across rules and requests.
#[derive(Clone)]
pub struct Collaborators {
    pub metadata: Arc<CachedMetadataSource>,
    pub auth: Arc<dyn AuthenticationService>,
    pub audit: Arc<dyn AuditSink>,
    pub env: Arc<dyn EnvVarProvider>,
    pub ids: Arc<dyn IdGenerator>,
}

#[async_trait]
pub trait Rule: Send + Sync {
    /// Configuration key of the rule, used in history and logs.
    fn name(&self) -> &'static str;

    fn phase(&self) -> RulePhase;

    async fn check(&self, ctx: BlockContext, services: &Collaborators) -> RuleResult;
}


/// Build a variable-resolution context out of the current block context.
#[must_use]
pub fn resolution_context<'a>(
    ctx: &'a BlockContext,
    env: &'a dyn EnvVarProvider,
) -> ResolutionContext<'a> {
    let metadata = ctx.user_metadata();
    ResolutionContext {
        user: metadata.logged_user().map(|u| u.id.as_str()),
        current_group: metadata.current_group(),
        available_groups: metadata.available_groups(),
        headers: &ctx.request().headers,
        jwt_payload: metadata.jwt_payload(),
        env,
    }
}
