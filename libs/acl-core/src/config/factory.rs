//! Compile one block configuration into rule objects, with block-level
//! validation of variable usage.

use crate::engine::Block;
use crate::rules::Rule;
use crate::rules::actions::ActionsRule;
use crate::rules::auth::{AuthKeyRule, Impersonator, JwtAuthRule, ProxyAuthRule};
use crate::rules::indices::IndicesRule;
use crate::rules::kibana::{KibanaAccessRule, KibanaHideAppsRule, KibanaIndexRule};
use crate::rules::membership::{GroupsRule, UsersRule};
use crate::rules::postprocess::{FieldsRule, FilterRule, ResponseHeadersRule};
use crate::rules::repositories::RepositoriesRule;
use crate::rules::snapshots::SnapshotsRule;
use crate::variables::VariableKind;

use super::{
    BlockConfig, BlockValidationError, ConfigError, ImpersonatorConfig, RuleConfig,
    RulesLevelCreationError,
};

pub(crate) fn build_block(
    config: &BlockConfig,
    impersonators: &[ImpersonatorConfig],
) -> Result<Block, ConfigError> {
    let creation_error = |error: RulesLevelCreationError| ConfigError::RulesLevelCreation {
        block: config.name.clone(),
        error,
    };
    let invalid =
        |e: anyhow::Error| creation_error(RulesLevelCreationError::InvalidValue(e.to_string()));

    let grants: Vec<Impersonator> = impersonators
        .iter()
        .map(|def| Impersonator::new(&def.impersonator, &def.users))
        .collect::<anyhow::Result<_>>()
        .map_err(invalid)?;

    let mut rules: Vec<Box<dyn Rule>> = Vec::with_capacity(config.rules.len());
    let mut used_kinds: Vec<VariableKind> = Vec::new();
    let mut has_authentication = false;
    let mut has_jwt = false;

    for rule in &config.rules {
        match rule {
            RuleConfig::AuthKey(definition) => {
                has_authentication = true;
                let rule = AuthKeyRule::new(definition)
                    .map_err(invalid)?
                    .with_impersonation(grants.clone());
                rules.push(Box::new(rule));
            }
            RuleConfig::ProxyAuth { header, users } => {
                has_authentication = true;
                let rule = ProxyAuthRule::new(header.clone(), users)
                    .map_err(invalid)?
                    .with_impersonation(grants.clone());
                rules.push(Box::new(rule));
            }
            RuleConfig::JwtAuth { provider } => {
                has_authentication = true;
                has_jwt = true;
                rules.push(Box::new(JwtAuthRule::new(provider.clone())));
            }
            RuleConfig::Users(users) => {
                rules.push(Box::new(UsersRule::new(users).map_err(invalid)?));
            }
            RuleConfig::Groups(groups) => {
                let rule = GroupsRule::new(groups)
                    .map_err(|e| creation_error(RulesLevelCreationError::Variable(e)))?;
                used_kinds.extend(rule.used_kinds().cloned());
                rules.push(Box::new(rule));
            }
            RuleConfig::Actions(actions) => {
                rules.push(Box::new(ActionsRule::new(actions).map_err(invalid)?));
            }
            RuleConfig::Indices {
                patterns,
                must_involve_indices,
            } => {
                let rule = IndicesRule::new(patterns, *must_involve_indices)
                    .map_err(|e| creation_error(RulesLevelCreationError::Variable(e)))?;
                used_kinds.extend(rule.used_kinds().into_iter().cloned());
                rules.push(Box::new(rule));
            }
            RuleConfig::Snapshots(snapshots) => {
                let rule = SnapshotsRule::new(snapshots).map_err(creation_error)?;
                used_kinds.extend(rule.used_kinds().into_iter().cloned());
                rules.push(Box::new(rule));
            }
            RuleConfig::Repositories(repositories) => {
                let rule = RepositoriesRule::new(repositories).map_err(creation_error)?;
                used_kinds.extend(rule.used_kinds().into_iter().cloned());
                rules.push(Box::new(rule));
            }
            RuleConfig::KibanaAccess {
                access,
                kibana_index,
            } => {
                let rule = KibanaAccessRule::new(*access, kibana_index.as_deref())
                    .map_err(|e| creation_error(RulesLevelCreationError::Variable(e)))?;
                used_kinds.extend(rule.used_kinds().cloned());
                rules.push(Box::new(rule));
            }
            RuleConfig::KibanaIndex(index) => {
                let rule = KibanaIndexRule::new(index)
                    .map_err(|e| creation_error(RulesLevelCreationError::Variable(e)))?;
                used_kinds.extend(rule.used_kinds().cloned());
                rules.push(Box::new(rule));
            }
            RuleConfig::KibanaHideApps(apps) => {
                rules.push(Box::new(KibanaHideAppsRule::new(apps).map_err(invalid)?));
            }
            RuleConfig::Filter(query) => {
                let rule = FilterRule::new(query)
                    .map_err(|e| creation_error(RulesLevelCreationError::Variable(e)))?;
                used_kinds.extend(rule.used_kinds().cloned());
                rules.push(Box::new(rule));
            }
            RuleConfig::Fields(fields) => {
                rules.push(Box::new(FieldsRule::new(fields).map_err(creation_error)?));
            }
            RuleConfig::ResponseHeaders(headers) => {
                rules.push(Box::new(
                    ResponseHeadersRule::new(headers.clone()).map_err(creation_error)?,
                ));
            }
        }
    }

    validate_variable_usage(&used_kinds, has_authentication, has_jwt).map_err(|error| {
        ConfigError::BlockValidation {
            block: config.name.clone(),
            error,
        }
    })?;

    Ok(Block::new(
        config.name.clone(),
        config.policy,
        config.verbosity,
        rules,
    ))
}

/// User-, group- and JWT-derived variables only make sense when the block
/// authenticates the caller first.
fn validate_variable_usage(
    used_kinds: &[VariableKind],
    has_authentication: bool,
    has_jwt: bool,
) -> Result<(), BlockValidationError> {
    for kind in used_kinds {
        if kind.requires_jwt() && !has_jwt {
            return Err(BlockValidationError::JwtAuthenticationRequired {
                variable: kind.to_string(),
            });
        }
        if kind.requires_authentication() && !has_authentication {
            return Err(BlockValidationError::AuthenticationRequired {
                variable: kind.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{AccessControlConfig, BlockPolicy, Verbosity};

    fn block(rules: Vec<RuleConfig>) -> BlockConfig {
        BlockConfig {
            name: "test".to_owned(),
            policy: BlockPolicy::Allow,
            verbosity: Verbosity::Info,
            rules,
        }
    }

    #[test]
    fn user_variable_without_authentication_fails_validation() {
        let config = block(vec![RuleConfig::Indices {
            patterns: vec!["logstash_@{user}*".to_owned()],
            must_involve_indices: false,
        }]);
        assert!(matches!(
            build_block(&config, &[]),
            Err(ConfigError::BlockValidation {
                error: BlockValidationError::AuthenticationRequired { .. },
                ..
            })
        ));
    }

    #[test]
    fn user_variable_with_auth_key_passes() {
        let config = block(vec![
            RuleConfig::AuthKey("dev1:test".to_owned()),
            RuleConfig::Indices {
                patterns: vec!["logstash_@{user}*".to_owned()],
                must_involve_indices: false,
            },
        ]);
        assert!(build_block(&config, &[]).is_ok());
    }

    #[test]
    fn jwt_variable_requires_jwt_auth_specifically() {
        let config = block(vec![
            RuleConfig::AuthKey("dev1:test".to_owned()),
            RuleConfig::Indices {
                patterns: vec!["idx_@{jwt:tenant}*".to_owned()],
                must_involve_indices: false,
            },
        ]);
        assert!(matches!(
            build_block(&config, &[]),
            Err(ConfigError::BlockValidation {
                error: BlockValidationError::JwtAuthenticationRequired { .. },
                ..
            })
        ));

        let config = block(vec![
            RuleConfig::JwtAuth {
                provider: "jwt1".to_owned(),
            },
            RuleConfig::Indices {
                patterns: vec!["idx_@{jwt:tenant}*".to_owned()],
                must_involve_indices: false,
            },
        ]);
        assert!(build_block(&config, &[]).is_ok());
    }

    #[test]
    fn kibana_index_jwt_variable_requires_jwt_auth() {
        let config = block(vec![
            RuleConfig::AuthKey("dev1:test".to_owned()),
            RuleConfig::KibanaAccess {
                access: crate::context::KibanaAccess::Rw,
                kibana_index: Some(".kibana_@{jwt:tenant}".to_owned()),
            },
        ]);
        assert!(matches!(
            build_block(&config, &[]),
            Err(ConfigError::BlockValidation {
                error: BlockValidationError::JwtAuthenticationRequired { .. },
                ..
            })
        ));

        let config = block(vec![RuleConfig::KibanaIndex(
            ".kibana_@{user}".to_owned(),
        )]);
        assert!(matches!(
            build_block(&config, &[]),
            Err(ConfigError::BlockValidation {
                error: BlockValidationError::AuthenticationRequired { .. },
                ..
            })
        ));
    }

    #[test]
    fn malformed_impersonation_grant_fails_creation() {
        let config = block(vec![RuleConfig::AuthKey("dev1:test".to_owned())]);
        let grants = vec![ImpersonatorConfig {
            impersonator: "admin".to_owned(),
            users: vec![],
        }];
        assert!(matches!(
            build_block(&config, &grants),
            Err(ConfigError::RulesLevelCreation {
                error: RulesLevelCreationError::InvalidValue(_),
                ..
            })
        ));
    }

    #[test]
    fn redundant_wildcard_snapshot_rule_fails_creation() {
        let config = block(vec![RuleConfig::Snapshots(vec!["*".to_owned()])]);
        assert!(matches!(
            build_block(&config, &[]),
            Err(ConfigError::RulesLevelCreation {
                error: RulesLevelCreationError::MatchesAll(_),
                ..
            })
        ));
    }

    #[test]
    fn whole_document_compiles() {
        let yaml = r#"
access_control_rules:
  - name: "tenant"
    auth_key: "dev1:test"
    indices: ["logstash_@{user}*"]
    filter: '{"term":{"owner":"@{user}"}}'
  - name: "kibana"
    auth_key: "kibana:kibana"
    kibana_access: admin
"#;
        assert!(AccessControlConfig::from_yaml(yaml).is_ok());
    }
}
