//! Runtime-resolvable variables.
//!
//! Rule values may embed `@{user}`, `@{header:NAME}`, `@{jwt:claim.path}`,
//! `@{env:NAME}`, `@{current_group}`, `@{available_groups}` and the legacy
//! `${NAME}` environment form. The `@explode{...}` prefix marks a variable
//! multi-valued; a template may carry at most one of those and a template
//! used in a single-valued position may carry none.

use std::collections::{BTreeMap, BTreeSet};

use acl_names::{GroupName, StringName};
use thiserror::Error;

use crate::lookup::EnvVarProvider;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VariableCreationError {
    #[error("malformed variable definition: {0}")]
    InvalidVariableDefinition(String),
    #[error("a multi-valued variable cannot be used in a single-variable context")]
    CannotUseMultiVariableInSingleVariableContext,
    #[error("only one multi-valued variable can be used in a template")]
    OnlyOneMultiVariableCanBeUsed,
}

/// Failure to resolve a variable at evaluation time. The owning rule turns
/// this into a rejection.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot resolve variable: {variable}")]
pub struct Unresolvable {
    pub variable: String,
}

/// What a variable reads from the resolution context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VariableKind {
    User,
    CurrentGroup,
    AvailableGroups,
    Header(String),
    Jwt(Vec<String>),
    Env(String),
}

impl VariableKind {
    /// Variables of these kinds only make sense once the caller is
    /// authenticated.
    #[must_use]
    pub fn requires_authentication(&self) -> bool {
        matches!(
            self,
            Self::User | Self::CurrentGroup | Self::AvailableGroups | Self::Jwt(_)
        )
    }

    #[must_use]
    pub fn requires_jwt(&self) -> bool {
        matches!(self, Self::Jwt(_))
    }

    fn describe(&self) -> String {
        match self {
            Self::User => "@{user}".to_owned(),
            Self::CurrentGroup => "@{current_group}".to_owned(),
            Self::AvailableGroups => "@{available_groups}".to_owned(),
            Self::Header(name) => format!("@{{header:{name}}}"),
            Self::Jwt(path) => format!("@{{jwt:{}}}", path.join(".")),
            Self::Env(name) => format!("@{{env:{name}}}"),
        }
    }
}

impl std::fmt::Display for VariableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Clone, Debug)]
enum Segment {
    Text(String),
    Variable { kind: VariableKind, multi: bool },
}

/// A parsed value template, mixing literal text and variables.
#[derive(Clone, Debug)]
pub struct VariableTemplate {
    raw: String,
    segments: Vec<Segment>,
}

/// Values a variable resolves against, derived from the current block
/// context plus the process environment.
pub struct ResolutionContext<'a> {
    pub user: Option<&'a str>,
    pub current_group: Option<&'a GroupName>,
    pub available_groups: &'a [GroupName],
    /// Lowercased header names.
    pub headers: &'a BTreeMap<String, String>,
    pub jwt_payload: Option<&'a serde_json::Value>,
    pub env: &'a dyn EnvVarProvider,
}

impl VariableTemplate {
    /// Parse a template for a single-valued position.
    ///
    /// # Errors
    /// Fails on malformed definitions and on any `@explode` usage.
    pub fn single(def: &str) -> Result<Self, VariableCreationError> {
        let parsed = Self::parse(def)?;
        if parsed.has_multi() {
            return Err(VariableCreationError::CannotUseMultiVariableInSingleVariableContext);
        }
        Ok(parsed)
    }

    /// Parse a template for a multi-valued position.
    ///
    /// # Errors
    /// Fails on malformed definitions and on more than one `@explode`.
    pub fn multi(def: &str) -> Result<Self, VariableCreationError> {
        let parsed = Self::parse(def)?;
        let multis = parsed
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Variable { multi: true, .. }))
            .count();
        if multis > 1 {
            return Err(VariableCreationError::OnlyOneMultiVariableCanBeUsed);
        }
        Ok(parsed)
    }

    fn parse(def: &str) -> Result<Self, VariableCreationError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = def;

        while !rest.is_empty() {
            let (multi, after_open) = if let Some(r) = rest.strip_prefix("@explode{") {
                (true, r)
            } else if let Some(r) = rest.strip_prefix("@{") {
                (false, r)
            } else if let Some(r) = rest.strip_prefix("${") {
                // Legacy environment-variable syntax.
                let Some((name, tail)) = r.split_once('}') else {
                    return Err(VariableCreationError::InvalidVariableDefinition(
                        def.to_owned(),
                    ));
                };
                if name.is_empty() {
                    return Err(VariableCreationError::InvalidVariableDefinition(
                        def.to_owned(),
                    ));
                }
                flush_text(&mut segments, &mut text);
                segments.push(Segment::Variable {
                    kind: VariableKind::Env(name.to_owned()),
                    multi: false,
                });
                rest = tail;
                continue;
            } else {
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    text.push(c);
                }
                rest = chars.as_str();
                continue;
            };

            let Some((inner, tail)) = after_open.split_once('}') else {
                return Err(VariableCreationError::InvalidVariableDefinition(
                    def.to_owned(),
                ));
            };
            flush_text(&mut segments, &mut text);
            segments.push(Segment::Variable {
                kind: parse_kind(inner, def)?,
                multi,
            });
            rest = tail;
        }
        flush_text(&mut segments, &mut text);

        Ok(Self {
            raw: def.to_owned(),
            segments,
        })
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// True when the template carries no variables at all.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Text(_)))
    }

    #[must_use]
    pub fn has_multi(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Variable { multi: true, .. }))
    }

    /// Variable kinds used by this template, for block-level validation.
    pub fn used_kinds(&self) -> impl Iterator<Item = &VariableKind> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable { kind, .. } => Some(kind),
            Segment::Text(_) => None,
        })
    }

    /// Resolve against the given context. The result is a single string for
    /// templates without `@explode`, and one string per value of the
    /// multi-valued variable otherwise.
    ///
    /// # Errors
    /// Returns [`Unresolvable`] when any used variable is absent from the
    /// context.
    pub fn resolve(&self, rc: &ResolutionContext<'_>) -> Result<Vec<String>, Unresolvable> {
        let mut acc = vec![String::new()];
        for segment in &self.segments {
            let values = match segment {
                Segment::Text(t) => vec![t.clone()],
                Segment::Variable { kind, multi } => resolve_kind(kind, *multi, rc)?,
            };
            acc = acc
                .iter()
                .flat_map(|prefix| {
                    values
                        .iter()
                        .map(move |v| format!("{prefix}{v}"))
                })
                .collect();
        }
        Ok(acc)
    }
}

fn flush_text(segments: &mut Vec<Segment>, text: &mut String) {
    if !text.is_empty() {
        segments.push(Segment::Text(std::mem::take(text)));
    }
}

fn parse_kind(inner: &str, def: &str) -> Result<VariableKind, VariableCreationError> {
    let malformed = || VariableCreationError::InvalidVariableDefinition(def.to_owned());
    match inner {
        "" => Err(malformed()),
        "user" => Ok(VariableKind::User),
        "current_group" => Ok(VariableKind::CurrentGroup),
        "available_groups" => Ok(VariableKind::AvailableGroups),
        _ => match inner.split_once(':') {
            Some(("header", name)) if !name.is_empty() => {
                Ok(VariableKind::Header(name.to_lowercase()))
            }
            Some(("jwt", path)) if !path.is_empty() => Ok(VariableKind::Jwt(
                path.split('.').map(str::to_owned).collect(),
            )),
            Some(("env", name)) if !name.is_empty() => Ok(VariableKind::Env(name.to_owned())),
            Some(_) => Err(malformed()),
            // Bare `@{X-Custom-Header}` is the old header shorthand.
            None => Ok(VariableKind::Header(inner.to_lowercase())),
        },
    }
}

fn resolve_kind(
    kind: &VariableKind,
    multi: bool,
    rc: &ResolutionContext<'_>,
) -> Result<Vec<String>, Unresolvable> {
    let missing = || Unresolvable {
        variable: kind.describe(),
    };
    match kind {
        VariableKind::User => rc
            .user
            .map(|u| vec![u.to_owned()])
            .ok_or_else(missing),
        VariableKind::CurrentGroup => rc
            .current_group
            .map(|g| g.as_str().to_owned())
            .or_else(|| rc.available_groups.first().map(|g| g.as_str().to_owned()))
            .map(|g| vec![g])
            .ok_or_else(missing),
        VariableKind::AvailableGroups => {
            if rc.available_groups.is_empty() {
                return Err(missing());
            }
            let groups: Vec<String> = rc
                .available_groups
                .iter()
                .map(|g| g.as_str().to_owned())
                .collect();
            if multi {
                Ok(groups)
            } else {
                Ok(vec![groups.join(",")])
            }
        }
        VariableKind::Header(name) => rc
            .headers
            .get(name)
            .map(|v| vec![v.clone()])
            .ok_or_else(missing),
        VariableKind::Jwt(path) => {
            let payload = rc.jwt_payload.ok_or_else(missing)?;
            let leaf = select_json_path(payload, path).ok_or_else(missing)?;
            json_leaf_values(leaf, multi).ok_or_else(missing)
        }
        VariableKind::Env(name) => rc
            .env
            .get(name)
            .map(|v| vec![v])
            .ok_or_else(missing),
    }
}

fn select_json_path<'a>(
    payload: &'a serde_json::Value,
    path: &[String],
) -> Option<&'a serde_json::Value> {
    let mut current = payload;
    for key in path {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

fn json_leaf_values(leaf: &serde_json::Value, multi: bool) -> Option<Vec<String>> {
    use serde_json::Value;
    match leaf {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Number(n) => Some(vec![n.to_string()]),
        Value::Bool(b) => Some(vec![b.to_string()]),
        Value::Array(items) => {
            let values: Option<Vec<String>> = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect();
            let values = values?;
            if multi {
                Some(values)
            } else {
                Some(vec![values.join(",")])
            }
        }
        Value::Null | Value::Object(_) => None,
    }
}

/// A configured set of names, either fully static or awaiting runtime
/// resolution. Keeping the static case explicit lets configuration-time
/// checks (redundant `*`, subset tests) short-circuit.
#[derive(Clone, Debug)]
pub enum ResolvableNames {
    AlreadyResolved(BTreeSet<StringName>),
    ToBeResolved(Vec<VariableTemplate>),
}

impl ResolvableNames {
    /// Parse a list of configured values.
    ///
    /// # Errors
    /// Fails when any value is a malformed variable definition or when a
    /// static value is empty.
    pub fn from_definitions(defs: &[String]) -> Result<Self, VariableCreationError> {
        let templates: Vec<VariableTemplate> = defs
            .iter()
            .map(|d| VariableTemplate::multi(d))
            .collect::<Result<_, _>>()?;

        if templates.iter().all(VariableTemplate::is_static) {
            let names = templates
                .iter()
                .map(|t| {
                    StringName::from_raw(t.raw()).map_err(|_| {
                        VariableCreationError::InvalidVariableDefinition(t.raw().to_owned())
                    })
                })
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(Self::AlreadyResolved(names))
        } else {
            Ok(Self::ToBeResolved(templates))
        }
    }

    #[must_use]
    pub fn uses_variables(&self) -> bool {
        matches!(self, Self::ToBeResolved(_))
    }

    /// The static names, when no runtime resolution is needed.
    #[must_use]
    pub fn static_names(&self) -> Option<&BTreeSet<StringName>> {
        match self {
            Self::AlreadyResolved(names) => Some(names),
            Self::ToBeResolved(_) => None,
        }
    }

    /// Variable kinds used across all entries.
    pub fn used_kinds(&self) -> Vec<&VariableKind> {
        match self {
            Self::AlreadyResolved(_) => Vec::new(),
            Self::ToBeResolved(templates) => {
                templates.iter().flat_map(VariableTemplate::used_kinds).collect()
            }
        }
    }

    /// Resolve the configured set against the context. Values resolving to
    /// the empty string are dropped.
    ///
    /// # Errors
    /// Returns [`Unresolvable`] when any entry references an absent
    /// variable.
    pub fn resolve(&self, rc: &ResolutionContext<'_>) -> Result<BTreeSet<StringName>, Unresolvable> {
        match self {
            Self::AlreadyResolved(names) => Ok(names.clone()),
            Self::ToBeResolved(templates) => {
                let mut out = BTreeSet::new();
                for template in templates {
                    for value in template.resolve(rc)? {
                        if let Ok(name) = StringName::from_raw(&value) {
                            out.insert(name);
                        }
                    }
                }
                Ok(out)
            }
        }
    }
}
