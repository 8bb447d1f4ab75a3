//! Blocks, the orchestrator, and the hot-reloadable engine facade.
//!
//! Blocks run in declaration order; the first block whose rules all fulfil
//! dictates the policy. Each block starts from a fresh context built off the
//! original request, so no decision state leaks between blocks.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::config::{AccessControlConfig, BlockPolicy, ConfigError, Verbosity, build_block};
use crate::context::{BlockContext, UserMetadata};
use crate::request::Request;
use crate::rules::{Collaborators, RejectionCause, Rule, RuleResult};

/// Per-rule history entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleOutcome {
    Fulfilled,
    Rejected(Option<RejectionCause>),
}

#[derive(Clone, Debug)]
pub struct RuleHistoryItem {
    pub rule: &'static str,
    pub outcome: RuleOutcome,
}

/// Append-only record of one block's evaluation.
#[derive(Clone, Debug)]
pub struct BlockHistory {
    pub block: String,
    pub matched: bool,
    pub items: Vec<RuleHistoryItem>,
}

/// One named, ordered collection of rules with a policy.
pub struct Block {
    name: String,
    policy: BlockPolicy,
    verbosity: Verbosity,
    rules: Vec<Box<dyn Rule>>,
}

enum BlockResult {
    Fulfilled(BlockContext),
    Rejected(Option<RejectionCause>),
}

impl Block {
    /// Rules are stably sorted by phase at construction; declaration order
    /// survives within a phase.
    #[must_use]
    pub fn new(
        name: String,
        policy: BlockPolicy,
        verbosity: Verbosity,
        mut rules: Vec<Box<dyn Rule>>,
    ) -> Self {
        rules.sort_by_key(|r| r.phase());
        Self {
            name,
            policy,
            verbosity,
            rules,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn policy(&self) -> BlockPolicy {
        self.policy
    }

    async fn evaluate(
        &self,
        initial: BlockContext,
        services: &Collaborators,
    ) -> (BlockResult, BlockHistory) {
        let mut ctx = initial;
        let mut items = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            match rule.check(ctx, services).await {
                RuleResult::Fulfilled(next) => {
                    items.push(RuleHistoryItem {
                        rule: rule.name(),
                        outcome: RuleOutcome::Fulfilled,
                    });
                    ctx = next;
                }
                RuleResult::Rejected(cause) => {
                    items.push(RuleHistoryItem {
                        rule: rule.name(),
                        outcome: RuleOutcome::Rejected(cause),
                    });
                    return (
                        BlockResult::Rejected(cause),
                        BlockHistory {
                            block: self.name.clone(),
                            matched: false,
                            items,
                        },
                    );
                }
            }
        }

        (
            BlockResult::Fulfilled(ctx),
            BlockHistory {
                block: self.name.clone(),
                matched: true,
                items,
            },
        )
    }
}

/// Final decision for one request.
#[derive(Debug)]
pub enum Outcome {
    Allow {
        block: String,
        context: BlockContext,
    },
    ForbiddenByMatched {
        block: String,
    },
    ForbiddenByMismatched {
        causes: BTreeSet<RejectionCause>,
    },
    NotFound,
}

#[derive(Debug)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub history: Vec<BlockHistory>,
}

/// Raised only on an engine invariant violation; the host maps it to an
/// internal error, never to an allow.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine invariant violated: {0}")]
    Interrupted(String),
}

/// The ordered block list compiled from one configuration snapshot.
pub struct AccessControl {
    blocks: Vec<Block>,
}

impl AccessControl {
    /// Compile a validated configuration into an evaluable block list.
    ///
    /// # Errors
    /// Propagates rule-creation and block-validation errors; a config with
    /// no blocks is rejected outright.
    pub fn from_config(config: &AccessControlConfig) -> Result<Self, ConfigError> {
        if config.blocks.is_empty() {
            return Err(ConfigError::NoBlocks);
        }
        let blocks = config
            .blocks
            .iter()
            .map(|block| build_block(block, &config.impersonators))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { blocks })
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Evaluate a request against the block list. Total: every request gets
    /// exactly one outcome.
    ///
    /// # Errors
    /// Only on an engine invariant violation after a fulfilled block.
    pub async fn evaluate(
        &self,
        request: &Arc<Request>,
        services: &Collaborators,
    ) -> Result<Evaluation, EngineError> {
        let mut history = Vec::with_capacity(self.blocks.len());
        let mut causes = BTreeSet::new();

        for block in &self.blocks {
            let ctx = BlockContext::initial(Arc::clone(request));
            let (result, block_history) = block.evaluate(ctx, services).await;
            history.push(block_history);

            match result {
                BlockResult::Fulfilled(ctx) => {
                    verify_invariants(&ctx)?;
                    let outcome = match block.policy {
                        BlockPolicy::Allow => {
                            tracing::debug!(block = %block.name, "request allowed");
                            Outcome::Allow {
                                block: block.name.clone(),
                                context: ctx,
                            }
                        }
                        BlockPolicy::Forbid => {
                            if block.verbosity == Verbosity::Info {
                                tracing::info!(block = %block.name, "request forbidden by matched block");
                            }
                            Outcome::ForbiddenByMatched {
                                block: block.name.clone(),
                            }
                        }
                    };
                    return Ok(Evaluation { outcome, history });
                }
                BlockResult::Rejected(cause) => {
                    if block.verbosity == Verbosity::Error {
                        tracing::debug!(block = %block.name, ?cause, "block did not match");
                    }
                    if let Some(cause) = cause {
                        causes.insert(cause);
                    }
                }
            }
        }

        let outcome = not_matched_outcome(request, causes);
        Ok(Evaluation { outcome, history })
    }

    /// Aggregate user metadata for ReadonlyREST's current-user-metadata
    /// endpoint: every matching allow block contributes, the first match
    /// wins per scalar field and groups accumulate in block order.
    ///
    /// # Errors
    /// Only on an engine invariant violation.
    pub async fn evaluate_user_metadata(
        &self,
        request: &Arc<Request>,
        services: &Collaborators,
    ) -> Result<Option<UserMetadata>, EngineError> {
        let mut merged: Option<UserMetadata> = None;
        let mut groups = Vec::new();

        for block in &self.blocks {
            if block.policy != BlockPolicy::Allow {
                continue;
            }
            let ctx = BlockContext::initial(Arc::clone(request));
            let (result, _) = block.evaluate(ctx, services).await;
            if let BlockResult::Fulfilled(ctx) = result {
                let metadata = ctx.user_metadata();
                groups.extend(metadata.available_groups().iter().cloned());
                if merged.is_none() {
                    merged = Some(metadata.clone());
                }
            }
        }

        Ok(merged.map(|md| md.with_available_groups(groups)))
    }
}

fn not_matched_outcome(request: &Request, causes: BTreeSet<RejectionCause>) -> Outcome {
    let index_miss =
        causes.contains(&RejectionCause::IndexNotFound) && request.is_index_bearing();
    let template_miss =
        causes.contains(&RejectionCause::TemplateNotFound) && request.is_template_bearing();
    if index_miss || template_miss {
        Outcome::NotFound
    } else {
        Outcome::ForbiddenByMismatched { causes }
    }
}

/// `filteredIndices ⊆ allAllowedIndices` whenever both are populated. A
/// violation is a bug in a rewrite, never a policy decision.
fn verify_invariants(ctx: &BlockContext) -> Result<(), EngineError> {
    let (Some(filtered), Some(allowed)) = (ctx.filtered_indices(), ctx.all_allowed_indices())
    else {
        return Ok(());
    };
    if filtered.is_empty() || allowed.is_empty() {
        return Ok(());
    }
    for name in filtered {
        if !allowed.iter().any(|a| a.admits(name)) {
            tracing::error!(index = %name, "filtered index escapes the allowed set");
            return Err(EngineError::Interrupted(format!(
                "filtered index '{name}' escapes the allowed set"
            )));
        }
    }
    Ok(())
}

/// The hot-reloadable engine facade exposed to the host adapter.
pub struct AccessControlEngine {
    current: ArcSwap<AccessControl>,
    services: Collaborators,
}

impl AccessControlEngine {
    /// # Errors
    /// Fails when the initial configuration does not compile.
    pub fn new(config: &AccessControlConfig, services: Collaborators) -> Result<Self, ConfigError> {
        let acl = AccessControl::from_config(config)?;
        Ok(Self {
            current: ArcSwap::from_pointee(acl),
            services,
        })
    }

    /// Swap in a new configuration. A config that fails to compile leaves
    /// the running snapshot untouched.
    ///
    /// # Errors
    /// Propagates compilation errors of the new configuration.
    pub fn reload(&self, config: &AccessControlConfig) -> Result<(), ConfigError> {
        let acl = AccessControl::from_config(config)?;
        self.current.store(Arc::new(acl));
        tracing::info!("access control configuration reloaded");
        Ok(())
    }

    /// Evaluate one request and record an audit event.
    ///
    /// # Errors
    /// Only on an engine invariant violation.
    pub async fn evaluate(&self, request: Request) -> Result<Evaluation, EngineError> {
        let request = Arc::new(request);
        let acl = self.current.load_full();
        let evaluation = acl.evaluate(&request, &self.services).await?;

        let event = AuditEvent::from_evaluation(&request, &evaluation);
        let sink = Arc::clone(&self.services.audit);
        let _ = tokio::spawn(async move { sink.record(event).await });

        Ok(evaluation)
    }

    /// Aggregated user metadata for the current-user-metadata endpoint.
    ///
    /// # Errors
    /// Only on an engine invariant violation.
    pub async fn evaluate_user_metadata(
        &self,
        request: Request,
    ) -> Result<Option<UserMetadata>, EngineError> {
        let request = Arc::new(request);
        let acl = self.current.load_full();
        acl.evaluate_user_metadata(&request, &self.services).await
    }
}
