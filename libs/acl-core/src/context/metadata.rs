//! Metadata about the caller, accumulated while a block evaluates.

use std::collections::BTreeSet;

use acl_names::{GroupName, IndexName, KibanaApp};
use serde::{Deserialize, Serialize};

/// The authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedUser {
    pub id: String,
    /// Set when the session runs on behalf of another user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonated_by: Option<String>,
}

impl LoggedUser {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            impersonated_by: None,
        }
    }

    /// A user the session acts as on behalf of `by`.
    #[must_use]
    pub fn impersonated(id: impl Into<String>, by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            impersonated_by: Some(by.into()),
        }
    }
}

/// Kibana access level granted to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KibanaAccess {
    RoStrict,
    Ro,
    Rw,
    Admin,
    Unrestricted,
}

impl KibanaAccess {
    /// Parse the configuration form (`ro_strict`, `ro`, `rw`, `admin`,
    /// `unrestricted`).
    #[must_use]
    pub fn from_config(raw: &str) -> Option<Self> {
        match raw {
            "ro_strict" => Some(Self::RoStrict),
            "ro" => Some(Self::Ro),
            "rw" => Some(Self::Rw),
            "admin" => Some(Self::Admin),
            "unrestricted" => Some(Self::Unrestricted),
            _ => None,
        }
    }
}

/// Everything the engine has learned about the caller so far.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserMetadata {
    logged_user: Option<LoggedUser>,
    current_group: Option<GroupName>,
    /// Ordered, duplicate-free.
    available_groups: Vec<GroupName>,
    found_kibana_index: Option<IndexName>,
    hidden_kibana_apps: BTreeSet<KibanaApp>,
    kibana_access: Option<KibanaAccess>,
    user_origin: Option<String>,
    jwt_payload: Option<serde_json::Value>,
}

impl UserMetadata {
    #[must_use]
    pub fn logged_user(&self) -> Option<&LoggedUser> {
        self.logged_user.as_ref()
    }

    #[must_use]
    pub fn current_group(&self) -> Option<&GroupName> {
        self.current_group.as_ref()
    }

    #[must_use]
    pub fn available_groups(&self) -> &[GroupName] {
        &self.available_groups
    }

    #[must_use]
    pub fn found_kibana_index(&self) -> Option<&IndexName> {
        self.found_kibana_index.as_ref()
    }

    #[must_use]
    pub fn hidden_kibana_apps(&self) -> &BTreeSet<KibanaApp> {
        &self.hidden_kibana_apps
    }

    #[must_use]
    pub fn kibana_access(&self) -> Option<KibanaAccess> {
        self.kibana_access
    }

    #[must_use]
    pub fn user_origin(&self) -> Option<&str> {
        self.user_origin.as_deref()
    }

    #[must_use]
    pub fn jwt_payload(&self) -> Option<&serde_json::Value> {
        self.jwt_payload.as_ref()
    }

    #[must_use]
    pub fn with_logged_user(mut self, user: LoggedUser) -> Self {
        self.logged_user = Some(user);
        self
    }

    #[must_use]
    pub fn with_current_group(mut self, group: GroupName) -> Self {
        self.current_group = Some(group);
        self
    }

    /// Replace the available groups, preserving order and dropping
    /// duplicates.
    #[must_use]
    pub fn with_available_groups(mut self, groups: Vec<GroupName>) -> Self {
        let mut seen = BTreeSet::new();
        self.available_groups = groups
            .into_iter()
            .filter(|g| seen.insert(g.clone()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_kibana_index(mut self, index: IndexName) -> Self {
        self.found_kibana_index = Some(index);
        self
    }

    #[must_use]
    pub fn with_hidden_kibana_apps(mut self, apps: BTreeSet<KibanaApp>) -> Self {
        self.hidden_kibana_apps = apps;
        self
    }

    #[must_use]
    pub fn with_kibana_access(mut self, access: KibanaAccess) -> Self {
        self.kibana_access = Some(access);
        self
    }

    #[must_use]
    pub fn with_user_origin(mut self, origin: impl Into<String>) -> Self {
        self.user_origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn with_jwt_payload(mut self, payload: serde_json::Value) -> Self {
        self.jwt_payload = Some(payload);
        self
    }
}
