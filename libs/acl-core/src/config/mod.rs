//! The typed, in-memory configuration model and its errors.
//!
//! Decoding from YAML lives in [`decode`]; compiling blocks into rule
//! objects (with block-level validation) lives in [`factory`].

mod decode;
mod factory;

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::context::KibanaAccess;
use crate::variables::VariableCreationError;

pub(crate) use factory::build_block;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockPolicy {
    #[default]
    Allow,
    Forbid,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[default]
    Info,
    Error,
}

/// One rule, as configured. Order in the block follows the declaration
/// order produced by the decoder; phases still dominate at evaluation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleConfig {
    AuthKey(String),
    ProxyAuth {
        header: Option<String>,
        users: Vec<String>,
    },
    JwtAuth {
        provider: String,
    },
    Users(Vec<String>),
    Groups(Vec<String>),
    Actions(Vec<String>),
    Indices {
        patterns: Vec<String>,
        must_involve_indices: bool,
    },
    Snapshots(Vec<String>),
    Repositories(Vec<String>),
    KibanaAccess {
        access: KibanaAccess,
        kibana_index: Option<String>,
    },
    KibanaIndex(String),
    KibanaHideApps(Vec<String>),
    Filter(String),
    Fields(Vec<String>),
    ResponseHeaders(BTreeMap<String, String>),
}

#[derive(Clone, Debug)]
pub struct BlockConfig {
    pub name: String,
    pub policy: BlockPolicy,
    pub verbosity: Verbosity,
    pub rules: Vec<RuleConfig>,
}

/// One impersonation grant: which authenticated callers may act as which
/// users. Applied to every credential-based authentication rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImpersonatorConfig {
    pub impersonator: String,
    pub users: Vec<String>,
}

/// The whole ACL document.
#[derive(Clone, Debug)]
pub struct AccessControlConfig {
    pub blocks: Vec<BlockConfig>,
    pub impersonators: Vec<ImpersonatorConfig>,
}

impl AccessControlConfig {
    /// Decode and validate a YAML document.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on malformed YAML, unknown rule keys,
    /// malformed variables, redundant `*` patterns in snapshot/repository
    /// rules, or blocks failing variable-context validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config = decode::from_yaml_str(yaml)?;
        // Compile every block once so creation and validation errors
        // surface at decode time, not at first evaluation.
        for block in &config.blocks {
            build_block(block, &config.impersonators)?;
        }
        Ok(config)
    }
}

/// Errors raised while creating a single rule.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RulesLevelCreationError {
    #[error("configured {0} set matches all resources, which is redundant")]
    MatchesAll(String),
    #[error("invalid rule value: {0}")]
    InvalidValue(String),
    #[error(transparent)]
    Variable(#[from] VariableCreationError),
}

/// Errors raised while validating a whole block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockValidationError {
    #[error("variable '{variable}' requires a preceding authentication rule")]
    AuthenticationRequired { variable: String },
    #[error("variable '{variable}' requires a JWT authentication rule")]
    JwtAuthenticationRequired { variable: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed ACL document: {0}")]
    Malformed(String),
    #[error("no access control blocks defined")]
    NoBlocks,
    #[error("block '{block}': {error}")]
    RulesLevelCreation {
        block: String,
        error: RulesLevelCreationError,
    },
    #[error("block '{block}': {error}")]
    BlockValidation {
        block: String,
        error: BlockValidationError,
    },
}
