//! Typed resource names and the wildcard-aware matcher.
//!
//! Everything a block rule matches against lives here: canonicalised string
//! names (`_all` and `*` folded into their own variants), the glob matcher
//! with both-sided wildcard support, cross-cluster index names, alias
//! expansion, and the template model with its operations.

pub mod glob;
pub mod index;
pub mod matcher;
pub mod name;
pub mod template;

pub use glob::Glob;
pub use index::{ClusterIndexName, IndexWithAliases, RemoteIndexWithAliases, expand_aliases};
pub use matcher::filter_permitted;
pub use name::{
    ActionName, AliasName, GroupName, IndexName, KibanaApp, NameError, RepositoryName,
    SnapshotName, StringName, TemplateName, UserName,
};
pub use matcher::is_subset_of;
pub use template::{
    INDEX_PLACEHOLDER, Template, TemplateOperation, TemplatesInventory, aliases_allowed,
    expand_alias_placeholder, narrow, patterns_allowed,
};
