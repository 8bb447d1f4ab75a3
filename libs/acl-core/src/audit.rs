//! Audit events built from a finished evaluation, handed to the host's
//! sink fire-and-forget.

use async_trait::async_trait;
use serde::Serialize;

use crate::engine::{BlockHistory, Evaluation, Outcome, RuleOutcome};
use crate::request::Request;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Sink that drops everything; the default when the host wires no audit.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: AuditEvent) {}
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditRuleEntry {
    pub rule: &'static str,
    pub fulfilled: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditBlockEntry {
    pub block: String,
    pub matched: bool,
    pub rules: Vec<AuditRuleEntry>,
}

/// One decision, flattened for the sink.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub request_id: String,
    pub action: String,
    pub uri_path: String,
    pub user: Option<String>,
    pub verdict: &'static str,
    pub block: Option<String>,
    pub history: Vec<AuditBlockEntry>,
}

impl AuditEvent {
    #[must_use]
    pub fn from_evaluation(request: &Request, evaluation: &Evaluation) -> Self {
        let (verdict, block, user) = match &evaluation.outcome {
            Outcome::Allow { block, context } => (
                "allowed",
                Some(block.clone()),
                context.user_metadata().logged_user().map(|u| u.id.clone()),
            ),
            Outcome::ForbiddenByMatched { block } => ("forbidden", Some(block.clone()), None),
            Outcome::ForbiddenByMismatched { .. } => ("forbidden", None, None),
            Outcome::NotFound => ("not_found", None, None),
        };

        let history = evaluation
            .history
            .iter()
            .map(|entry: &BlockHistory| AuditBlockEntry {
                block: entry.block.clone(),
                matched: entry.matched,
                rules: entry
                    .items
                    .iter()
                    .map(|item| AuditRuleEntry {
                        rule: item.rule,
                        fulfilled: matches!(item.outcome, RuleOutcome::Fulfilled),
                    })
                    .collect(),
            })
            .collect();

        Self {
            request_id: request.id.clone(),
            action: request.action.as_str().to_owned(),
            uri_path: request.uri_path.clone(),
            user,
            verdict,
            block,
            history,
        }
    }
}
