//! Kibana rules: the table-driven access rule plus the kibana-index and
//! hidden-apps rewrites.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use acl_names::{ActionName, ClusterIndexName, IndexName, KibanaApp};
use async_trait::async_trait;
use regex::Regex;

use crate::context::{BlockContext, KibanaAccess};
use crate::rules::{Collaborators, Rule, RulePhase, RuleResult, resolution_context};
use crate::variables::{VariableCreationError, VariableKind, VariableTemplate};

pub const DEFAULT_KIBANA_INDEX: &str = ".kibana";

/// Actions Kibana needs for read-only work.
static RO_ACTIONS: LazyLock<Vec<ActionName>> = LazyLock::new(|| {
    action_patterns(&[
        "indices:admin/exists",
        "indices:admin/mappings/fields/get*",
        "indices:admin/mappings/get*",
        "indices:admin/validate/query",
        "indices:admin/get*",
        "indices:admin/refresh*",
        "indices:admin/resolve/*",
        "indices:data/read/*",
    ])
});

/// Write actions Kibana issues against its own index.
static RW_ACTIONS: LazyLock<Vec<ActionName>> = LazyLock::new(|| {
    action_patterns(&[
        "indices:admin/create",
        "indices:admin/mapping/put",
        "indices:data/write/delete*",
        "indices:data/write/index",
        "indices:data/write/update*",
        "indices:data/write/bulk*",
    ])
});

/// Cluster-level actions any functional Kibana needs.
static CLUSTER_ACTIONS: LazyLock<Vec<ActionName>> = LazyLock::new(|| {
    action_patterns(&[
        "cluster:monitor/*",
        "cluster:admin/xpack/monitoring*",
        "indices:admin/template/get*",
    ])
});

/// Administrative actions reserved to `admin` access.
static ADMIN_ACTIONS: LazyLock<Vec<ActionName>> = LazyLock::new(|| {
    action_patterns(&[
        "cluster:admin/rradmin/*",
        "indices:monitor/*",
        "indices:admin/*",
    ])
});

/// ReadonlyREST's own administrative actions.
static ROR_ADMIN_ACTIONS: LazyLock<Vec<ActionName>> = LazyLock::new(|| {
    action_patterns(&[
        "cluster:ror/user_metadata",
        "cluster:ror/config/get",
        "cluster:ror/config/update",
        "cluster:ror/audit_event",
    ])
});

fn action_patterns(raw: &[&str]) -> Vec<ActionName> {
    raw.iter()
        .filter_map(|r| ActionName::from_raw(r).ok())
        .collect()
}

fn matches_any(patterns: &[ActionName], action: &str) -> bool {
    patterns.iter().any(|p| p.matches(action))
}

/// `kibana_access: ro_strict|ro|rw|admin|unrestricted`, with an optional
/// custom kibana index.
pub struct KibanaAccessRule {
    access: KibanaAccess,
    kibana_index: Option<VariableTemplate>,
}

impl KibanaAccessRule {
    /// # Errors
    /// Fails when the kibana-index value is a malformed variable
    /// definition.
    pub fn new(
        access: KibanaAccess,
        kibana_index: Option<&str>,
    ) -> Result<Self, VariableCreationError> {
        let kibana_index = kibana_index.map(VariableTemplate::single).transpose()?;
        Ok(Self {
            access,
            kibana_index,
        })
    }

    #[must_use]
    pub fn uses_variables(&self) -> bool {
        self.kibana_index.as_ref().is_some_and(|t| !t.is_static())
    }

    /// Variable kinds used, for block-level validation.
    pub fn used_kinds(&self) -> impl Iterator<Item = &VariableKind> {
        self.kibana_index
            .iter()
            .flat_map(VariableTemplate::used_kinds)
    }

    fn resolve_kibana_index(&self, ctx: &BlockContext, services: &Collaborators) -> Option<String> {
        match &self.kibana_index {
            Some(template) => {
                let rc = resolution_context(ctx, services.env.as_ref());
                template.resolve(&rc).ok()?.into_iter().next()
            }
            None => Some(
                ctx.user_metadata()
                    .found_kibana_index()
                    .map_or(DEFAULT_KIBANA_INDEX, IndexName::as_str)
                    .to_owned(),
            ),
        }
    }

    /// The small allow-list of write URI shapes Kibana itself issues
    /// against its own index.
    fn writes_into_kibana_index(&self, ctx: &BlockContext, kibana_index: &str) -> bool {
        let action = ctx.request().action.as_str();
        if !action.starts_with("indices:data/write/") {
            return false;
        }
        let uri = &ctx.request().uri_path;
        let escaped = regex::escape(kibana_index);
        let own_index = Regex::new(&format!(
            "^/{escaped}/(doc|_create|_update|_doc|url|index-pattern|config)/.*"
        ));
        let template = Regex::new("^/_template/kibana_index_template.*");
        own_index.is_ok_and(|re| re.is_match(uri))
            || template.is_ok_and(|re| re.is_match(uri))
    }

    fn only_kibana_index_requested(&self, ctx: &BlockContext, kibana_index: &str) -> bool {
        match ctx.filtered_indices() {
            Some(indices) if !indices.is_empty() => indices.iter().all(|i| match i {
                ClusterIndexName::Local(index) => index.as_str() == kibana_index,
                ClusterIndexName::Remote { .. } => false,
            }),
            _ => false,
        }
    }

    fn allows(&self, ctx: &BlockContext, kibana_index: &str) -> bool {
        let action = ctx.request().action.as_str();

        if self.access == KibanaAccess::Unrestricted {
            return true;
        }
        if matches_any(&ROR_ADMIN_ACTIONS, action) {
            return self.access == KibanaAccess::Admin;
        }

        let ro = matches_any(&RO_ACTIONS, action);
        let rw = matches_any(&RW_ACTIONS, action);
        let cluster = matches_any(&CLUSTER_ACTIONS, action);
        let admin = matches_any(&ADMIN_ACTIONS, action);
        let rw_allowed = self.writes_into_kibana_index(ctx, kibana_index)
            || self.only_kibana_index_requested(ctx, kibana_index);

        match self.access {
            KibanaAccess::Unrestricted => true,
            KibanaAccess::RoStrict => ro,
            KibanaAccess::Ro => ro || cluster,
            KibanaAccess::Rw => ro || cluster || (rw && rw_allowed),
            KibanaAccess::Admin => ro || cluster || (rw && rw_allowed) || admin,
        }
    }
}

#[async_trait]
impl Rule for KibanaAccessRule {
    fn name(&self) -> &'static str {
        "kibana_access"
    }

    fn phase(&self) -> RulePhase {
        if self.uses_variables() {
            RulePhase::VariableResource
        } else {
            RulePhase::Resource
        }
    }

    async fn check(&self, ctx: BlockContext, services: &Collaborators) -> RuleResult {
        let Some(kibana_index) = self.resolve_kibana_index(&ctx, services) else {
            return RuleResult::rejected();
        };
        if !self.allows(&ctx, &kibana_index) {
            return RuleResult::rejected();
        }

        let access = self.access;
        let custom_index = self
            .kibana_index
            .as_ref()
            .and_then(|_| IndexName::from_raw(&kibana_index).ok());
        RuleResult::fulfilled(ctx.map_user_metadata(|md| {
            let md = md.with_kibana_access(access);
            match custom_index {
                Some(index) => md.with_kibana_index(index),
                None => md,
            }
        }))
    }
}

/// `kibana_index` — pins the kibana index for the tenant.
pub struct KibanaIndexRule {
    index: VariableTemplate,
}

impl KibanaIndexRule {
    /// # Errors
    /// Fails on a malformed variable definition.
    pub fn new(definition: &str) -> Result<Self, VariableCreationError> {
        Ok(Self {
            index: VariableTemplate::single(definition)?,
        })
    }

    #[must_use]
    pub fn uses_variables(&self) -> bool {
        !self.index.is_static()
    }

    /// Variable kinds used, for block-level validation.
    pub fn used_kinds(&self) -> impl Iterator<Item = &VariableKind> {
        self.index.used_kinds()
    }
}

#[async_trait]
impl Rule for KibanaIndexRule {
    fn name(&self) -> &'static str {
        "kibana_index"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Postprocessing
    }

    async fn check(&self, ctx: BlockContext, services: &Collaborators) -> RuleResult {
        let resolved = {
            let rc = resolution_context(&ctx, services.env.as_ref());
            self.index.resolve(&rc)
        };
        match resolved {
            Ok(values) => {
                let Some(index) = values
                    .into_iter()
                    .next()
                    .and_then(|raw| IndexName::from_raw(&raw).ok())
                else {
                    return RuleResult::rejected();
                };
                RuleResult::fulfilled(
                    ctx.map_user_metadata(|md| md.with_kibana_index(index)),
                )
            }
            Err(_) => RuleResult::rejected(),
        }
    }
}

/// `kibana_hide_apps` — records the apps the tenant should not see.
pub struct KibanaHideAppsRule {
    apps: BTreeSet<KibanaApp>,
}

impl KibanaHideAppsRule {
    /// # Errors
    /// Fails when the list is empty or an app name is malformed.
    pub fn new(apps: &[String]) -> anyhow::Result<Self> {
        if apps.is_empty() {
            anyhow::bail!("kibana_hide_apps requires at least one app");
        }
        let apps = apps
            .iter()
            .map(|a| KibanaApp::from_raw(a))
            .collect::<Result<_, _>>()?;
        Ok(Self { apps })
    }
}

#[async_trait]
impl Rule for KibanaHideAppsRule {
    fn name(&self) -> &'static str {
        "kibana_hide_apps"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Postprocessing
    }

    async fn check(&self, ctx: BlockContext, _services: &Collaborators) -> RuleResult {
        let apps = self.apps.clone();
        RuleResult::fulfilled(
            ctx.map_user_metadata(|md| md.with_hidden_kibana_apps(apps)),
        )
    }
}
