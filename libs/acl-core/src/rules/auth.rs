//! Authentication rules. These run first in every block and are the only
//! rules allowed to establish the logged user.

use acl_names::{GroupName, UserName};
use async_trait::async_trait;

use crate::context::{BlockContext, LoggedUser};
use crate::lookup::Credentials;
use crate::rules::{Collaborators, RejectionCause, Rule, RulePhase, RuleResult};

/// Header through which an already authenticated caller asks to act as
/// another user.
pub const IMPERSONATE_AS_HEADER: &str = "x-ror-impersonating";

/// One impersonation grant: which authenticated callers may act as which
/// users.
#[derive(Clone)]
pub struct Impersonator {
    who: UserName,
    users: Vec<UserName>,
}

impl Impersonator {
    /// # Errors
    /// Fails when the users list is empty or a pattern is malformed.
    pub fn new(impersonator: &str, users: &[String]) -> anyhow::Result<Self> {
        if users.is_empty() {
            anyhow::bail!("impersonation grant requires at least one user pattern");
        }
        Ok(Self {
            who: UserName::from_raw(impersonator)?,
            users: users
                .iter()
                .map(|u| UserName::from_raw(u))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Resolve the effective logged user for an authenticated caller,
/// honouring the impersonation header. Rules without grants do not support
/// impersonation at all; grants that do not cover the pair reject it.
fn logged_user_for(
    ctx: &BlockContext,
    authenticated: &str,
    grants: &[Impersonator],
) -> Result<LoggedUser, RejectionCause> {
    let Some(target) = ctx.request().header(IMPERSONATE_AS_HEADER) else {
        return Ok(LoggedUser::new(authenticated));
    };
    if grants.is_empty() {
        return Err(RejectionCause::ImpersonationNotSupported);
    }
    let allowed = grants.iter().any(|grant| {
        grant.who.matches(authenticated) && grant.users.iter().any(|u| u.matches(target))
    });
    if allowed {
        Ok(LoggedUser::impersonated(target, authenticated))
    } else {
        Err(RejectionCause::ImpersonationNotAllowed)
    }
}

/// `auth_key: user:password` — static basic-auth credentials compared
/// locally, no back-end round trip.
pub struct AuthKeyRule {
    user: String,
    password: String,
    impersonation: Vec<Impersonator>,
}

impl AuthKeyRule {
    /// # Errors
    /// Fails when the definition is not of the `user:password` form.
    pub fn new(definition: &str) -> anyhow::Result<Self> {
        let (user, password) = definition
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("auth_key must look like 'user:password'"))?;
        if user.is_empty() || password.is_empty() {
            anyhow::bail!("auth_key user and password cannot be empty");
        }
        Ok(Self {
            user: user.to_owned(),
            password: password.to_owned(),
            impersonation: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_impersonation(mut self, grants: Vec<Impersonator>) -> Self {
        self.impersonation = grants;
        self
    }
}

#[async_trait]
impl Rule for AuthKeyRule {
    fn name(&self) -> &'static str {
        "auth_key"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Authentication
    }

    async fn check(&self, ctx: BlockContext, _services: &Collaborators) -> RuleResult {
        match ctx.request().basic_auth_credentials() {
            Some((user, password)) if user == self.user && password == self.password => {
                match logged_user_for(&ctx, &user, &self.impersonation) {
                    Ok(logged) => RuleResult::fulfilled(
                        ctx.map_user_metadata(|md| md.with_logged_user(logged)),
                    ),
                    Err(cause) => RuleResult::rejected_with(cause),
                }
            }
            _ => RuleResult::rejected(),
        }
    }
}

/// `proxy_auth` — the reverse proxy has already authenticated the caller
/// and forwards the user id in a header.
pub struct ProxyAuthRule {
    header: String,
    users: Vec<UserName>,
    impersonation: Vec<Impersonator>,
}

impl ProxyAuthRule {
    pub const DEFAULT_HEADER: &'static str = "X-Forwarded-User";

    /// # Errors
    /// Fails when the users list is empty or a user pattern is malformed.
    pub fn new(header: Option<String>, users: &[String]) -> anyhow::Result<Self> {
        if users.is_empty() {
            anyhow::bail!("proxy_auth requires at least one user pattern");
        }
        let users = users
            .iter()
            .map(|u| UserName::from_raw(u))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            header: header.unwrap_or_else(|| Self::DEFAULT_HEADER.to_owned()),
            users,
            impersonation: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_impersonation(mut self, grants: Vec<Impersonator>) -> Self {
        self.impersonation = grants;
        self
    }
}

#[async_trait]
impl Rule for ProxyAuthRule {
    fn name(&self) -> &'static str {
        "proxy_auth"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Authentication
    }

    async fn check(&self, ctx: BlockContext, _services: &Collaborators) -> RuleResult {
        let Some(user) = ctx.request().header(&self.header).map(str::to_owned) else {
            return RuleResult::rejected();
        };
        if !self.users.iter().any(|u| u.matches(&user)) {
            return RuleResult::rejected();
        }
        match logged_user_for(&ctx, &user, &self.impersonation) {
            Ok(logged) => {
                RuleResult::fulfilled(ctx.map_user_metadata(|md| md.with_logged_user(logged)))
            }
            Err(cause) => RuleResult::rejected_with(cause),
        }
    }
}

/// `jwt_auth` — bearer-token authentication. Signature verification and
/// claim extraction happen behind the authentication service; the rule
/// binds the reported user, groups and claims payload into the context.
/// Token-based sessions cannot impersonate.
pub struct JwtAuthRule {
    provider: String,
}

impl JwtAuthRule {
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

#[async_trait]
impl Rule for JwtAuthRule {
    fn name(&self) -> &'static str {
        "jwt_auth"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Authentication
    }

    async fn check(&self, ctx: BlockContext, services: &Collaborators) -> RuleResult {
        let Some(token) = ctx.request().bearer_token().map(str::to_owned) else {
            return RuleResult::rejected();
        };
        if ctx.request().header(IMPERSONATE_AS_HEADER).is_some() {
            return RuleResult::rejected_with(RejectionCause::ImpersonationNotSupported);
        }
        let credentials = Credentials::Jwt { token };
        match services.auth.authenticate(&credentials).await {
            Ok(Some(user)) => {
                let groups: Vec<GroupName> = user
                    .groups
                    .iter()
                    .filter_map(|g| GroupName::from_raw(g).ok())
                    .collect();
                RuleResult::fulfilled(ctx.map_user_metadata(|md| {
                    let md = md
                        .with_logged_user(LoggedUser::new(user.id.clone()))
                        .with_available_groups(groups);
                    match user.jwt_payload.clone() {
                        Some(payload) => md.with_jwt_payload(payload),
                        None => md,
                    }
                }))
            }
            Ok(None) => RuleResult::rejected(),
            Err(error) => {
                tracing::warn!(
                    provider = %self.provider,
                    %error,
                    "JWT authentication back-end failed"
                );
                RuleResult::rejected_with(RejectionCause::OperationNotAllowed)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rules::test_support::{collaborators, general_request};
    use std::sync::Arc;

    fn grants(impersonator: &str, users: &[&str]) -> Vec<Impersonator> {
        vec![
            Impersonator::new(
                impersonator,
                &users.iter().map(|u| (*u).to_owned()).collect::<Vec<_>>(),
            )
            .unwrap(),
        ]
    }

    #[tokio::test]
    async fn auth_key_accepts_matching_credentials() {
        let rule = AuthKeyRule::new("dev1:test").unwrap();
        // "dev1:test"
        let request = general_request().with_header("Authorization", "Basic ZGV2MTp0ZXN0");
        let ctx = BlockContext::initial(Arc::new(request));
        let services = collaborators();

        match rule.check(ctx, &services).await {
            RuleResult::Fulfilled(ctx) => {
                let logged = ctx.user_metadata().logged_user().unwrap();
                assert_eq!(logged.id, "dev1");
                assert_eq!(logged.impersonated_by, None);
            }
            RuleResult::Rejected(_) => panic!("expected fulfilment"),
        }
    }

    #[tokio::test]
    async fn auth_key_rejects_wrong_password() {
        let rule = AuthKeyRule::new("dev1:test").unwrap();
        // "dev1:wrong"
        let request = general_request().with_header("Authorization", "Basic ZGV2MTp3cm9uZw==");
        let ctx = BlockContext::initial(Arc::new(request));
        let services = collaborators();

        assert!(matches!(
            rule.check(ctx, &services).await,
            RuleResult::Rejected(None)
        ));
    }

    #[tokio::test]
    async fn proxy_auth_matches_user_patterns() {
        let rule = ProxyAuthRule::new(None, &["dev*".to_owned()]).unwrap();
        let request = general_request().with_header("X-Forwarded-User", "dev42");
        let ctx = BlockContext::initial(Arc::new(request));
        let services = collaborators();

        match rule.check(ctx, &services).await {
            RuleResult::Fulfilled(ctx) => {
                assert_eq!(ctx.user_metadata().logged_user().unwrap().id, "dev42");
            }
            RuleResult::Rejected(_) => panic!("expected fulfilment"),
        }
    }

    #[test]
    fn auth_key_definition_must_have_both_parts() {
        assert!(AuthKeyRule::new("no-colon").is_err());
        assert!(AuthKeyRule::new(":empty-user").is_err());
    }

    #[tokio::test]
    async fn impersonation_without_grants_is_not_supported() {
        let rule = AuthKeyRule::new("admin:pass").unwrap();
        // "admin:pass"
        let request = general_request()
            .with_header("Authorization", "Basic YWRtaW46cGFzcw==")
            .with_header(IMPERSONATE_AS_HEADER, "dev1");
        let ctx = BlockContext::initial(Arc::new(request));

        assert!(matches!(
            rule.check(ctx, &collaborators()).await,
            RuleResult::Rejected(Some(RejectionCause::ImpersonationNotSupported))
        ));
    }

    #[tokio::test]
    async fn impersonation_with_matching_grant_switches_the_logged_user() {
        let rule = AuthKeyRule::new("admin:pass")
            .unwrap()
            .with_impersonation(grants("admin", &["dev*"]));
        let request = general_request()
            .with_header("Authorization", "Basic YWRtaW46cGFzcw==")
            .with_header(IMPERSONATE_AS_HEADER, "dev1");
        let ctx = BlockContext::initial(Arc::new(request));

        match rule.check(ctx, &collaborators()).await {
            RuleResult::Fulfilled(ctx) => {
                let logged = ctx.user_metadata().logged_user().unwrap();
                assert_eq!(logged.id, "dev1");
                assert_eq!(logged.impersonated_by.as_deref(), Some("admin"));
            }
            RuleResult::Rejected(_) => panic!("expected fulfilment"),
        }
    }

    #[tokio::test]
    async fn impersonation_outside_the_grant_is_not_allowed() {
        let rule = ProxyAuthRule::new(None, &["admin".to_owned()])
            .unwrap()
            .with_impersonation(grants("admin", &["dev*"]));
        let request = general_request()
            .with_header("X-Forwarded-User", "admin")
            .with_header(IMPERSONATE_AS_HEADER, "root");
        let ctx = BlockContext::initial(Arc::new(request));

        assert!(matches!(
            rule.check(ctx, &collaborators()).await,
            RuleResult::Rejected(Some(RejectionCause::ImpersonationNotAllowed))
        ));
    }

    #[tokio::test]
    async fn jwt_sessions_cannot_impersonate() {
        let rule = JwtAuthRule::new("jwt1");
        let request = general_request()
            .with_header("Authorization", "Bearer some.jwt.token")
            .with_header(IMPERSONATE_AS_HEADER, "dev1");
        let ctx = BlockContext::initial(Arc::new(request));

        assert!(matches!(
            rule.check(ctx, &collaborators()).await,
            RuleResult::Rejected(Some(RejectionCause::ImpersonationNotSupported))
        ));
    }
}
