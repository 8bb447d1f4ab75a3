//! Canonicalised string names.
//!
//! Every configured or requested name is parsed once into a [`StringName`]:
//! the literal `_all` and the bare `*` fold into their own variants, strings
//! carrying glob characters become precompiled patterns, everything else is a
//! full (concrete) name. Empty names are rejected at parse time.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::glob::Glob;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name cannot be empty")]
    Empty,
}

/// A canonicalised resource name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StringName {
    /// A concrete name without glob characters.
    Full(String),
    /// A name carrying `*` or `?`, precompiled.
    Pattern(Glob),
    /// The literal `_all`.
    All,
    /// The literal `*`.
    Wildcard,
}

impl StringName {
    /// Parse and canonicalise a raw name.
    ///
    /// # Errors
    /// Returns [`NameError::Empty`] when the input is empty.
    pub fn from_raw(raw: &str) -> Result<Self, NameError> {
        match raw {
            "" => Err(NameError::Empty),
            "_all" => Ok(Self::All),
            "*" => Ok(Self::Wildcard),
            s if s.contains(['*', '?']) => Ok(Self::Pattern(Glob::new(s))),
            s => Ok(Self::Full(s.to_owned())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Full(s) => s,
            Self::Pattern(g) => g.as_str(),
            Self::All => "_all",
            Self::Wildcard => "*",
        }
    }

    /// True for the `_all` and `*` forms.
    #[must_use]
    pub fn matches_all(&self) -> bool {
        matches!(self, Self::All | Self::Wildcard)
    }

    /// True when this name can match more than one concrete name.
    #[must_use]
    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern(_) | Self::All | Self::Wildcard)
    }

    /// Does this (configured) name match the given concrete candidate?
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Full(s) => s == candidate,
            Self::Pattern(g) => g.matches(candidate),
            Self::All | Self::Wildcard => true,
        }
    }

    /// Language containment: does every concrete name matched by `other`
    /// also match `self`? Concrete names are singletons; a pattern never
    /// sits inside a concrete name.
    #[must_use]
    pub fn contains(&self, other: &StringName) -> bool {
        match (self, other) {
            (Self::All | Self::Wildcard, _) => true,
            (_, Self::All | Self::Wildcard) => false,
            (Self::Full(a), Self::Full(b)) => a == b,
            (Self::Full(_), Self::Pattern(_)) => false,
            (Self::Pattern(g), Self::Full(b)) => g.matches(b),
            (Self::Pattern(a), Self::Pattern(b)) => a.contains(b),
        }
    }

    /// Structural intersection with another name, for the pattern-vs-pattern
    /// case when no universe is available.
    #[must_use]
    pub fn intersect(&self, other: &StringName) -> Option<StringName> {
        match (self, other) {
            (Self::All | Self::Wildcard, o) => Some(o.clone()),
            (s, Self::All | Self::Wildcard) => Some(s.clone()),
            (Self::Full(a), Self::Full(b)) if a == b => Some(self.clone()),
            (Self::Full(a), Self::Pattern(g)) | (Self::Pattern(g), Self::Full(a)) => {
                g.matches(a).then(|| Self::Full(a.clone()))
            }
            (Self::Pattern(a), Self::Pattern(b)) => a.intersect(b).map(Self::Pattern),
            (Self::Full(_), Self::Full(_)) => None,
        }
    }
}

impl fmt::Display for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StringName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StringName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_raw(&raw).map_err(serde::de::Error::custom)
    }
}

macro_rules! typed_name {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(StringName);

        impl $name {
            /// # Errors
            /// Returns [`NameError::Empty`] when the input is empty.
            pub fn from_raw(raw: &str) -> Result<Self, NameError> {
                StringName::from_raw(raw).map(Self)
            }

            #[must_use]
            pub fn full(raw: &str) -> Option<Self> {
                match StringName::from_raw(raw) {
                    Ok(n @ StringName::Full(_)) => Some(Self(n)),
                    _ => None,
                }
            }

            #[must_use]
            pub fn name(&self) -> &StringName {
                &self.0
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            #[must_use]
            pub fn matches(&self, candidate: &str) -> bool {
                self.0.matches(candidate)
            }

            #[must_use]
            pub fn matches_all(&self) -> bool {
                self.0.matches_all()
            }

            #[must_use]
            pub fn is_pattern(&self) -> bool {
                self.0.is_pattern()
            }
        }

        impl From<StringName> for $name {
            fn from(n: StringName) -> Self {
                Self(n)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

typed_name!(
    /// A local index name or pattern.
    IndexName
);
typed_name!(
    /// An index alias name or pattern.
    AliasName
);
typed_name!(
    /// A snapshot name or pattern.
    SnapshotName
);
typed_name!(
    /// A snapshot repository name or pattern.
    RepositoryName
);
typed_name!(
    /// A template name or pattern.
    TemplateName
);
typed_name!(
    /// A Kibana application name.
    KibanaApp
);
typed_name!(
    /// A user group name or pattern.
    GroupName
);
typed_name!(
    /// A user id or pattern.
    UserName
);
typed_name!(
    /// An Elasticsearch action name or pattern.
    ActionName
);
