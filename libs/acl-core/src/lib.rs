//! Block-and-rule access control decision engine.
//!
//! Every intercepted request is classified into a request kind, wrapped in a
//! fresh [`context::BlockContext`], and evaluated against an ordered list of
//! blocks. The first block whose rules all fulfil dictates the policy; its
//! context carries the rewrite instructions (narrowed index, snapshot,
//! repository and template sets, kibana index, filter and FLS restrictions)
//! the host adapter applies to the outbound action.
//!
//! External effects — cluster metadata, authentication back-ends, the audit
//! sink — sit behind the narrow traits in [`lookup`] and [`audit`], so the
//! engine itself is a pure function of `(config, request, collaborators)`.

pub mod audit;
pub mod config;
pub mod context;
pub mod engine;
pub mod lookup;
pub mod request;
pub mod rules;
pub mod variables;

pub use audit::{AuditEvent, AuditSink, NoopAuditSink};
pub use config::{AccessControlConfig, BlockPolicy, ConfigError, ImpersonatorConfig, Verbosity};
pub use context::{
    BlockContext, ContextPayload, FieldsRestrictions, FilterQuery, IndicesPack, KibanaAccess,
    LoggedUser, TemplateResponseFilter, UserMetadata,
};
pub use engine::{
    AccessControl, AccessControlEngine, BlockHistory, EngineError, Evaluation, Outcome,
    RuleHistoryItem, RuleOutcome,
};
pub use lookup::{
    AuthenticatedUser, AuthenticationService, CachedMetadataSource, Credentials, EnvVarProvider,
    IdGenerator, LookupError, MetadataSource, OsEnv, StaticEnv, UuidGenerator,
};
pub use request::{Request, RequestKind};
pub use rules::{Collaborators, RejectionCause};
