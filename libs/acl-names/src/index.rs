//! Cross-cluster index names and alias-aware universes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::name::{AliasName, IndexName, NameError, StringName};

/// An index name with locality. The wire form of a remote name is
/// `cluster:index`, where the cluster part may itself be a pattern.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterIndexName {
    Local(IndexName),
    Remote {
        cluster: StringName,
        index: IndexName,
    },
}

impl ClusterIndexName {
    /// Parse a wire-form name, splitting on the first `:`.
    ///
    /// # Errors
    /// Returns [`NameError::Empty`] when the whole name, or either part of a
    /// remote name, is empty.
    pub fn from_raw(raw: &str) -> Result<Self, NameError> {
        match raw.split_once(':') {
            Some((cluster, index)) => Ok(Self::Remote {
                cluster: StringName::from_raw(cluster)?,
                index: IndexName::from_raw(index)?,
            }),
            None => Ok(Self::Local(IndexName::from_raw(raw)?)),
        }
    }

    #[must_use]
    pub fn local(name: IndexName) -> Self {
        Self::Local(name)
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// The index part, regardless of locality.
    #[must_use]
    pub fn index(&self) -> &IndexName {
        match self {
            Self::Local(i) | Self::Remote { index: i, .. } => i,
        }
    }

    /// True for `_all`, `*` and `*:*`-like forms that select everything.
    #[must_use]
    pub fn matches_all(&self) -> bool {
        match self {
            Self::Local(i) => i.matches_all(),
            Self::Remote { cluster, index } => cluster.matches_all() && index.matches_all(),
        }
    }

    /// True when either part carries glob characters.
    #[must_use]
    pub fn is_pattern(&self) -> bool {
        match self {
            Self::Local(i) => i.is_pattern(),
            Self::Remote { cluster, index } => cluster.is_pattern() || index.is_pattern(),
        }
    }

    /// Does this configured name admit the given requested name?
    ///
    /// Cluster and index parts match independently. A local configured name
    /// never matches a remote requested name and vice versa. Pattern-vs-
    /// pattern parts intersect structurally; a non-empty intersection admits.
    #[must_use]
    pub fn admits(&self, requested: &ClusterIndexName) -> bool {
        match (self, requested) {
            (Self::Local(c), Self::Local(r)) => part_admits(c.name(), r.name()),
            (
                Self::Remote {
                    cluster: cc,
                    index: ci,
                },
                Self::Remote {
                    cluster: rc,
                    index: ri,
                },
            ) => part_admits(cc, rc) && part_admits(ci.name(), ri.name()),
            _ => false,
        }
    }
}

fn part_admits(configured: &StringName, requested: &StringName) -> bool {
    if requested.is_pattern() {
        configured.intersect(requested).is_some()
    } else {
        configured.matches(requested.as_str())
    }
}

impl fmt::Display for ClusterIndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(i) => f.write_str(i.as_str()),
            Self::Remote { cluster, index } => write!(f, "{cluster}:{index}"),
        }
    }
}

impl Serialize for ClusterIndexName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ClusterIndexName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_raw(&raw).map_err(serde::de::Error::custom)
    }
}

/// A concrete local index together with its aliases, as reported by the
/// cluster metadata source. Alias membership is many-to-many.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexWithAliases {
    pub index: IndexName,
    pub aliases: BTreeSet<AliasName>,
}

impl IndexWithAliases {
    #[must_use]
    pub fn new(index: IndexName, aliases: BTreeSet<AliasName>) -> Self {
        Self { index, aliases }
    }
}

/// A concrete remote index with its aliases, qualified by the concrete
/// cluster it lives in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIndexWithAliases {
    pub cluster: String,
    pub index: IndexName,
    pub aliases: BTreeSet<AliasName>,
}

/// Expand requested names over an alias universe: any requested name that
/// matches an alias of some entry contributes the entry's backing index to
/// the output, alongside the requested names themselves.
#[must_use]
pub fn expand_aliases(
    requested: &BTreeSet<IndexName>,
    universe: &[IndexWithAliases],
) -> BTreeSet<IndexName> {
    let mut out = requested.clone();
    for entry in universe {
        for alias in &entry.aliases {
            if requested.iter().any(|r| r.matches(alias.as_str())) {
                out.insert(entry.index.clone());
            }
        }
    }
    out
}
