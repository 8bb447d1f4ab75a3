//! The immutable, classified view of an inbound request.
//!
//! The host adapter intercepts a REST or transport action, classifies it
//! into a [`RequestKind`], and hands the engine this read-only handle. The
//! engine never mutates it; narrowed resource sets accumulate on the block
//! context instead.

use std::collections::{BTreeMap, BTreeSet};

use acl_names::{ActionName, ClusterIndexName, RepositoryName, SnapshotName, TemplateOperation};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Request shape, as classified by the framing adapter.
#[derive(Clone, Debug)]
pub enum RequestKind {
    /// A document-oriented request touching a flat set of indices.
    GeneralIndex { indices: BTreeSet<ClusterIndexName> },
    /// A single filterable query (search, get) eligible for filter/FLS.
    FilterableSingle { indices: BTreeSet<ClusterIndexName> },
    /// A multi-search request carrying one index pack per inner query.
    FilterableMulti { packs: Vec<BTreeSet<ClusterIndexName>> },
    /// Any template get/add/delete operation.
    Template { operation: TemplateOperation },
    /// A snapshot-oriented request.
    Snapshot {
        snapshots: BTreeSet<SnapshotName>,
        repositories: BTreeSet<RepositoryName>,
        indices: BTreeSet<ClusterIndexName>,
    },
    /// A repository-oriented request.
    Repository { repositories: BTreeSet<RepositoryName> },
    /// ReadonlyREST's own API (config reload, audit).
    RorApi,
    /// ReadonlyREST's current-user-metadata endpoint.
    CurrentUserMetadata,
    /// Anything else (cluster-admin and the like).
    General,
}

/// One intercepted request.
#[derive(Clone, Debug)]
pub struct Request {
    pub id: String,
    pub action: ActionName,
    pub uri_path: String,
    /// Header names are stored lowercased.
    pub headers: BTreeMap<String, String>,
    pub kind: RequestKind,
}

impl Request {
    #[must_use]
    pub fn new(id: impl Into<String>, action: ActionName, kind: RequestKind) -> Self {
        Self {
            id: id.into(),
            action,
            uri_path: String::new(),
            headers: BTreeMap::new(),
            kind,
        }
    }

    #[must_use]
    pub fn with_uri_path(mut self, path: impl Into<String>) -> Self {
        self.uri_path = path.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Basic-auth credentials from the `Authorization` header, if present
    /// and well-formed.
    #[must_use]
    pub fn basic_auth_credentials(&self) -> Option<(String, String)> {
        let value = self.header("authorization")?;
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = BASE64.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_owned(), password.to_owned()))
    }

    /// Bearer token from the `Authorization` header, if present.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")?.strip_prefix("Bearer ")
    }

    /// Whether the action addresses indices (`indices:*`).
    #[must_use]
    pub fn is_index_action(&self) -> bool {
        self.action.as_str().starts_with("indices:")
    }

    /// Whether the request shape carries indices at all.
    #[must_use]
    pub fn is_index_bearing(&self) -> bool {
        matches!(
            self.kind,
            RequestKind::GeneralIndex { .. }
                | RequestKind::FilterableSingle { .. }
                | RequestKind::FilterableMulti { .. }
                | RequestKind::Snapshot { .. }
        )
    }

    /// Whether the request shape carries template operations.
    #[must_use]
    pub fn is_template_bearing(&self) -> bool {
        matches!(self.kind, RequestKind::Template { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn action(raw: &str) -> ActionName {
        ActionName::from_raw(raw).unwrap()
    }

    #[test]
    fn basic_auth_decoding() {
        // "dev1:test"
        let req = Request::new("1", action("indices:data/read/search"), RequestKind::General)
            .with_header("Authorization", "Basic ZGV2MTp0ZXN0");
        assert_eq!(
            req.basic_auth_credentials(),
            Some(("dev1".to_owned(), "test".to_owned()))
        );
    }

    #[test]
    fn malformed_authorization_is_none() {
        let req = Request::new("1", action("indices:data/read/search"), RequestKind::General)
            .with_header("Authorization", "Basic not-base64!!");
        assert_eq!(req.basic_auth_credentials(), None);

        let req = Request::new("1", action("indices:data/read/search"), RequestKind::General);
        assert_eq!(req.basic_auth_credentials(), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::new("1", action("cluster:monitor/health"), RequestKind::General)
            .with_header("X-Forwarded-User", "admin");
        assert_eq!(req.header("x-forwarded-user"), Some("admin"));
        assert_eq!(req.header("X-FORWARDED-USER"), Some("admin"));
    }

    #[test]
    fn action_classification() {
        let req = Request::new(
            "1",
            action("indices:data/read/search"),
            RequestKind::GeneralIndex {
                indices: BTreeSet::new(),
            },
        );
        assert!(req.is_index_action());
        assert!(req.is_index_bearing());
        assert!(!req.is_template_bearing());
    }
}
