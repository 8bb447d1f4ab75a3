//! YAML decoding of the ACL document into the typed model.

use std::collections::BTreeMap;

use figment::Figment;
use figment::providers::{Format, Yaml};
use serde::Deserialize;

use crate::context::KibanaAccess;

use super::{
    AccessControlConfig, BlockConfig, BlockPolicy, ConfigError, ImpersonatorConfig, RuleConfig,
    Verbosity,
};

/// A scalar-or-list value, as YAML rule shorthand allows.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(one) => vec![one],
            OneOrMany::Many(many) => many,
        }
    }
}

/// `indices:` accepts the bare short form and the extended object form.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum RawIndices {
    Short(OneOrMany),
    Extended {
        patterns: Vec<String>,
        #[serde(default)]
        must_involve_indices: bool,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum RawProxyAuth {
    Short(OneOrMany),
    Extended {
        users: OneOrMany,
        #[serde(default)]
        header: Option<String>,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBlock {
    name: String,
    #[serde(rename = "type", default)]
    policy: BlockPolicy,
    #[serde(default)]
    verbosity: Verbosity,

    #[serde(default)]
    auth_key: Option<String>,
    #[serde(default)]
    proxy_auth: Option<RawProxyAuth>,
    #[serde(default)]
    jwt_auth: Option<String>,
    #[serde(default)]
    users: Option<OneOrMany>,
    #[serde(default)]
    groups: Option<OneOrMany>,
    #[serde(default)]
    actions: Option<OneOrMany>,
    #[serde(default)]
    indices: Option<RawIndices>,
    #[serde(default)]
    snapshots: Option<OneOrMany>,
    #[serde(default)]
    repositories: Option<OneOrMany>,
    #[serde(default)]
    kibana_access: Option<String>,
    #[serde(default)]
    kibana_index: Option<String>,
    #[serde(default)]
    kibana_hide_apps: Option<OneOrMany>,
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    fields: Option<OneOrMany>,
    #[serde(default)]
    response_headers: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Deserialize)]
struct RawImpersonator {
    impersonator: String,
    users: OneOrMany,
}

#[derive(Clone, Debug, Deserialize)]
struct RawAcl {
    access_control_rules: Vec<RawBlock>,
    #[serde(default)]
    impersonation: Vec<RawImpersonator>,
}

pub(super) fn from_yaml_str(yaml: &str) -> Result<AccessControlConfig, ConfigError> {
    let raw: RawAcl = Figment::new()
        .merge(Yaml::string(yaml))
        .extract()
        .map_err(|e| ConfigError::Malformed(e.to_string()))?;

    let blocks = raw
        .access_control_rules
        .into_iter()
        .map(convert_block)
        .collect::<Result<Vec<_>, _>>()?;
    let impersonators = raw
        .impersonation
        .into_iter()
        .map(|def| ImpersonatorConfig {
            impersonator: def.impersonator,
            users: def.users.into(),
        })
        .collect();
    Ok(AccessControlConfig {
        blocks,
        impersonators,
    })
}

fn convert_block(raw: RawBlock) -> Result<BlockConfig, ConfigError> {
    if raw.name.is_empty() {
        return Err(ConfigError::Malformed(
            "block name cannot be empty".to_owned(),
        ));
    }

    let mut rules = Vec::new();
    if let Some(auth_key) = raw.auth_key {
        rules.push(RuleConfig::AuthKey(auth_key));
    }
    if let Some(proxy_auth) = raw.proxy_auth {
        let (header, users) = match proxy_auth {
            RawProxyAuth::Short(users) => (None, users.into()),
            RawProxyAuth::Extended { users, header } => (header, users.into()),
        };
        rules.push(RuleConfig::ProxyAuth { header, users });
    }
    if let Some(provider) = raw.jwt_auth {
        rules.push(RuleConfig::JwtAuth { provider });
    }
    if let Some(users) = raw.users {
        rules.push(RuleConfig::Users(users.into()));
    }
    if let Some(groups) = raw.groups {
        rules.push(RuleConfig::Groups(groups.into()));
    }
    if let Some(actions) = raw.actions {
        rules.push(RuleConfig::Actions(actions.into()));
    }
    if let Some(indices) = raw.indices {
        let (patterns, must_involve_indices) = match indices {
            RawIndices::Short(patterns) => (patterns.into(), false),
            RawIndices::Extended {
                patterns,
                must_involve_indices,
            } => (patterns, must_involve_indices),
        };
        rules.push(RuleConfig::Indices {
            patterns,
            must_involve_indices,
        });
    }
    if let Some(snapshots) = raw.snapshots {
        rules.push(RuleConfig::Snapshots(snapshots.into()));
    }
    if let Some(repositories) = raw.repositories {
        rules.push(RuleConfig::Repositories(repositories.into()));
    }
    match (raw.kibana_access, raw.kibana_index) {
        (Some(access), kibana_index) => {
            let access = KibanaAccess::from_config(&access).ok_or_else(|| {
                ConfigError::Malformed(format!("unknown kibana_access level: {access}"))
            })?;
            rules.push(RuleConfig::KibanaAccess {
                access,
                kibana_index,
            });
        }
        (None, Some(kibana_index)) => {
            rules.push(RuleConfig::KibanaIndex(kibana_index));
        }
        (None, None) => {}
    }
    if let Some(apps) = raw.kibana_hide_apps {
        rules.push(RuleConfig::KibanaHideApps(apps.into()));
    }
    if let Some(filter) = raw.filter {
        rules.push(RuleConfig::Filter(filter));
    }
    if let Some(fields) = raw.fields {
        rules.push(RuleConfig::Fields(fields.into()));
    }
    if let Some(headers) = raw.response_headers {
        rules.push(RuleConfig::ResponseHeaders(headers));
    }

    Ok(BlockConfig {
        name: raw.name,
        policy: raw.policy,
        verbosity: raw.verbosity,
        rules,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_short_and_extended_forms() {
        let yaml = r#"
access_control_rules:
  - name: "test1"
    auth_key: "dev1:test"
    indices: ["test1_index", "odd:test1_index"]
  - name: "forbid logs"
    type: forbid
    verbosity: error
    indices:
      patterns: ["*-logs-smg-stats-*"]
      must_involve_indices: true
"#;
        let config = from_yaml_str(yaml).unwrap();
        assert_eq!(config.blocks.len(), 2);

        let first = &config.blocks[0];
        assert_eq!(first.name, "test1");
        assert_eq!(first.policy, BlockPolicy::Allow);
        assert_eq!(
            first.rules,
            vec![
                RuleConfig::AuthKey("dev1:test".to_owned()),
                RuleConfig::Indices {
                    patterns: vec!["test1_index".to_owned(), "odd:test1_index".to_owned()],
                    must_involve_indices: false,
                },
            ]
        );

        let second = &config.blocks[1];
        assert_eq!(second.policy, BlockPolicy::Forbid);
        assert_eq!(second.verbosity, Verbosity::Error);
        assert_eq!(
            second.rules,
            vec![RuleConfig::Indices {
                patterns: vec!["*-logs-smg-stats-*".to_owned()],
                must_involve_indices: true,
            }]
        );
    }

    #[test]
    fn single_string_shorthand() {
        let yaml = r#"
access_control_rules:
  - name: "one index"
    indices: "only_this"
"#;
        let config = from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.blocks[0].rules,
            vec![RuleConfig::Indices {
                patterns: vec!["only_this".to_owned()],
                must_involve_indices: false,
            }]
        );
    }

    #[test]
    fn kibana_access_with_custom_index() {
        let yaml = r#"
access_control_rules:
  - name: "kibana rw"
    auth_key: "test:test"
    kibana_access: rw
    kibana_index: ".kibana-xcs"
"#;
        let config = from_yaml_str(yaml).unwrap();
        assert!(matches!(
            &config.blocks[0].rules[1],
            RuleConfig::KibanaAccess {
                access: KibanaAccess::Rw,
                kibana_index: Some(index),
            } if index == ".kibana-xcs"
        ));
    }

    #[test]
    fn impersonation_grants_decode() {
        let yaml = r#"
impersonation:
  - impersonator: admin
    users: ["dev*", "qa1"]
access_control_rules:
  - name: "all"
    auth_key: "admin:pass"
"#;
        let config = from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.impersonators,
            vec![ImpersonatorConfig {
                impersonator: "admin".to_owned(),
                users: vec!["dev*".to_owned(), "qa1".to_owned()],
            }]
        );
    }

    #[test]
    fn unknown_rule_key_is_rejected() {
        let yaml = r#"
access_control_rules:
  - name: "bad"
    no_such_rule: true
"#;
        assert!(matches!(
            from_yaml_str(yaml),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_kibana_access_level_is_rejected() {
        let yaml = r#"
access_control_rules:
  - name: "bad"
    kibana_access: sudo
"#;
        assert!(matches!(
            from_yaml_str(yaml),
            Err(ConfigError::Malformed(_))
        ));
    }
}
