//! The block context: the accumulated, possibly rewritten view of a request.
//!
//! A context is created fresh per request from the immutable request handle
//! and threaded through rules; each rule returns a new context. The payload
//! is a tagged variant per request shape so invariants live in the type, not
//! in presence checks.

pub mod metadata;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use acl_names::{
    ClusterIndexName, RepositoryName, SnapshotName, StringName, Template, TemplateOperation,
    narrow,
};

use crate::request::{Request, RequestKind};

pub use metadata::{KibanaAccess, LoggedUser, UserMetadata};

/// One pack of a multi-search request, after narrowing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndicesPack {
    Found(BTreeSet<ClusterIndexName>),
    NotFound,
}

impl IndicesPack {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Found(indices) => indices.is_empty(),
            Self::NotFound => true,
        }
    }
}

/// A resolved document-filter query fragment, applied by the adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterQuery(pub String);

/// Field-level security restrictions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldsRestrictions {
    Whitelist(BTreeSet<String>),
    Blacklist(BTreeSet<String>),
}

/// Rewrite instruction for template responses: drop or narrow every
/// template that leaks outside the allowed pattern set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateResponseFilter {
    allowed: BTreeSet<StringName>,
}

impl TemplateResponseFilter {
    #[must_use]
    pub fn new(allowed: BTreeSet<StringName>) -> Self {
        Self { allowed }
    }

    /// Apply the filter to a response template set.
    #[must_use]
    pub fn apply(&self, templates: &[Template]) -> Vec<Template> {
        templates
            .iter()
            .filter_map(|t| narrow(t, &self.allowed))
            .collect()
    }
}

/// Request-shape-specific payload of the block context.
#[derive(Clone, Debug)]
pub enum ContextPayload {
    GeneralIndex {
        filtered_indices: BTreeSet<ClusterIndexName>,
        all_allowed_indices: BTreeSet<ClusterIndexName>,
    },
    FilterableSingle {
        filtered_indices: BTreeSet<ClusterIndexName>,
        all_allowed_indices: BTreeSet<ClusterIndexName>,
        filter: Option<FilterQuery>,
        fields: Option<FieldsRestrictions>,
    },
    FilterableMulti {
        index_packs: Vec<IndicesPack>,
        filter: Option<FilterQuery>,
        fields: Option<FieldsRestrictions>,
    },
    Template {
        operation: TemplateOperation,
        all_allowed_indices: BTreeSet<ClusterIndexName>,
        response_filter: Option<TemplateResponseFilter>,
    },
    Snapshot {
        snapshots: BTreeSet<SnapshotName>,
        repositories: BTreeSet<RepositoryName>,
        filtered_indices: BTreeSet<ClusterIndexName>,
        all_allowed_indices: BTreeSet<ClusterIndexName>,
    },
    Repository {
        repositories: BTreeSet<RepositoryName>,
    },
    RorApi,
    CurrentUserMetadata,
    General,
}

impl ContextPayload {
    fn initial(kind: &RequestKind) -> Self {
        match kind {
            RequestKind::GeneralIndex { indices } => Self::GeneralIndex {
                filtered_indices: indices.clone(),
                all_allowed_indices: BTreeSet::new(),
            },
            RequestKind::FilterableSingle { indices } => Self::FilterableSingle {
                filtered_indices: indices.clone(),
                all_allowed_indices: BTreeSet::new(),
                filter: None,
                fields: None,
            },
            RequestKind::FilterableMulti { packs } => Self::FilterableMulti {
                index_packs: packs.iter().map(|p| IndicesPack::Found(p.clone())).collect(),
                filter: None,
                fields: None,
            },
            RequestKind::Template { operation } => Self::Template {
                operation: operation.clone(),
                all_allowed_indices: BTreeSet::new(),
                response_filter: None,
            },
            RequestKind::Snapshot {
                snapshots,
                repositories,
                indices,
            } => Self::Snapshot {
                snapshots: snapshots.clone(),
                repositories: repositories.clone(),
                filtered_indices: indices.clone(),
                all_allowed_indices: BTreeSet::new(),
            },
            RequestKind::Repository { repositories } => Self::Repository {
                repositories: repositories.clone(),
            },
            RequestKind::RorApi => Self::RorApi,
            RequestKind::CurrentUserMetadata => Self::CurrentUserMetadata,
            RequestKind::General => Self::General,
        }
    }
}

/// The accumulated view of one request inside one block.
#[derive(Clone, Debug)]
pub struct BlockContext {
    request: Arc<Request>,
    user_metadata: UserMetadata,
    response_headers: BTreeMap<String, String>,
    payload: ContextPayload,
}

impl BlockContext {
    /// Fresh context for a request; the payload mirrors the request shape.
    #[must_use]
    pub fn initial(request: Arc<Request>) -> Self {
        let payload = ContextPayload::initial(&request.kind);
        Self {
            request,
            user_metadata: UserMetadata::default(),
            response_headers: BTreeMap::new(),
            payload,
        }
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    #[must_use]
    pub fn user_metadata(&self) -> &UserMetadata {
        &self.user_metadata
    }

    #[must_use]
    pub fn response_headers(&self) -> &BTreeMap<String, String> {
        &self.response_headers
    }

    #[must_use]
    pub fn payload(&self) -> &ContextPayload {
        &self.payload
    }

    /// The request's current (possibly already narrowed) index set, for
    /// payloads that carry one.
    #[must_use]
    pub fn filtered_indices(&self) -> Option<&BTreeSet<ClusterIndexName>> {
        match &self.payload {
            ContextPayload::GeneralIndex {
                filtered_indices, ..
            }
            | ContextPayload::FilterableSingle {
                filtered_indices, ..
            }
            | ContextPayload::Snapshot {
                filtered_indices, ..
            } => Some(filtered_indices),
            _ => None,
        }
    }

    #[must_use]
    pub fn all_allowed_indices(&self) -> Option<&BTreeSet<ClusterIndexName>> {
        match &self.payload {
            ContextPayload::GeneralIndex {
                all_allowed_indices,
                ..
            }
            | ContextPayload::FilterableSingle {
                all_allowed_indices,
                ..
            }
            | ContextPayload::Template {
                all_allowed_indices,
                ..
            }
            | ContextPayload::Snapshot {
                all_allowed_indices,
                ..
            } => Some(all_allowed_indices),
            _ => None,
        }
    }

    #[must_use]
    pub fn map_user_metadata(mut self, f: impl FnOnce(UserMetadata) -> UserMetadata) -> Self {
        self.user_metadata = f(self.user_metadata);
        self
    }

    #[must_use]
    pub fn with_response_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers.insert(name.into(), value.into());
        self
    }

    /// Narrow the index set of an index-bearing payload. No-op for payloads
    /// without one.
    #[must_use]
    pub fn with_filtered_indices(
        mut self,
        filtered: BTreeSet<ClusterIndexName>,
        all_allowed: BTreeSet<ClusterIndexName>,
    ) -> Self {
        match &mut self.payload {
            ContextPayload::GeneralIndex {
                filtered_indices,
                all_allowed_indices,
            }
            | ContextPayload::FilterableSingle {
                filtered_indices,
                all_allowed_indices,
                ..
            }
            | ContextPayload::Snapshot {
                filtered_indices,
                all_allowed_indices,
                ..
            } => {
                *filtered_indices = filtered;
                *all_allowed_indices = all_allowed;
            }
            _ => {}
        }
        self
    }

    /// Replace the packs of a multi-search payload. No-op otherwise.
    #[must_use]
    pub fn with_index_packs(mut self, packs: Vec<IndicesPack>) -> Self {
        if let ContextPayload::FilterableMulti { index_packs, .. } = &mut self.payload {
            *index_packs = packs;
        }
        self
    }

    /// Replace the template operation and record the allowed set. No-op for
    /// non-template payloads.
    #[must_use]
    pub fn with_template_operation(
        mut self,
        op: TemplateOperation,
        all_allowed: BTreeSet<ClusterIndexName>,
    ) -> Self {
        if let ContextPayload::Template {
            operation,
            all_allowed_indices,
            ..
        } = &mut self.payload
        {
            *operation = op;
            *all_allowed_indices = all_allowed;
        }
        self
    }

    #[must_use]
    pub fn with_template_response_filter(mut self, filter: TemplateResponseFilter) -> Self {
        if let ContextPayload::Template {
            response_filter, ..
        } = &mut self.payload
        {
            *response_filter = Some(filter);
        }
        self
    }

    #[must_use]
    pub fn with_snapshots(mut self, narrowed: BTreeSet<SnapshotName>) -> Self {
        if let ContextPayload::Snapshot { snapshots, .. } = &mut self.payload {
            *snapshots = narrowed;
        }
        self
    }

    /// Narrow the repositories of snapshot- and repository-shaped payloads.
    #[must_use]
    pub fn with_repositories(mut self, narrowed: BTreeSet<RepositoryName>) -> Self {
        match &mut self.payload {
            ContextPayload::Snapshot { repositories, .. }
            | ContextPayload::Repository { repositories } => {
                *repositories = narrowed;
            }
            _ => {}
        }
        self
    }

    #[must_use]
    pub fn with_filter(mut self, query: FilterQuery) -> Self {
        match &mut self.payload {
            ContextPayload::FilterableSingle { filter, .. }
            | ContextPayload::FilterableMulti { filter, .. } => {
                *filter = Some(query);
            }
            _ => {}
        }
        self
    }

    #[must_use]
    pub fn with_fields(mut self, restrictions: FieldsRestrictions) -> Self {
        match &mut self.payload {
            ContextPayload::FilterableSingle { fields, .. }
            | ContextPayload::FilterableMulti { fields, .. } => {
                *fields = Some(restrictions);
            }
            _ => {}
        }
        self
    }
}
