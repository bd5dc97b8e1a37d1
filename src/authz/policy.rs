//! Policy tables for the role-based engines.
//!
//! A table is a list of lines:
//!
//! ```text
//! p, <subject>, <object>, <action-or-dimensions>, <allow|deny>
//! g, <member>, role:<role>
//! ```
//!
//! `p` rows grant or deny, `g` rows put a member (an external group, a user
//! name or another role) into a role. Blank lines and `#` comments are
//! skipped. Anything else is rejected before the rows reach casbin.
//!
//! The rows are loaded into a [`casbin::Enforcer`] running one of two
//! models: [`MODEL_V1`] matches subject, object and action with `keyMatch`,
//! [`MODEL_V2`] matches the RPC with `keyMatch` and the serialized
//! dimensions with the `dimensionMatch` function registered here. Both let a
//! matching `deny` row override any `allow`.
//!
//! ```rust
//! use casbin::CoreApi;
//! use tdf_authz_core::authz::{MODEL_V1, PolicyLines, build_enforcer};
//!
//! let lines = PolicyLines::parse("p, role:admin, *, *, allow\ng, opentdf-admin, role:admin").unwrap();
//! let enforcer = futures::executor::block_on(build_enforcer(MODEL_V1, &lines)).unwrap();
//! assert!(enforcer.enforce(("opentdf-admin", "kas.AccessService/Rewrap", "write")).unwrap());
//! ```

use std::collections::HashMap;

use casbin::function_map::OperatorFunction;
use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi};
use rhai::Dynamic;
use tracing::debug;

use super::dimensions::dimension_match;
use crate::config::AuthorizerConfig;
use crate::error::AuthzError;

pub const ROLE_PREFIX: &str = "role:";
pub const UNKNOWN_ROLE: &str = "role:unknown";
pub const ALLOW: &str = "allow";
pub const DENY: &str = "deny";

/// Path and action model.
pub const MODEL_V1: &str = include_str!("models/v1.conf");
/// RPC and dimension model.
pub const MODEL_V2: &str = include_str!("models/v2.conf");

/// Default table for path-based (v1) authorization.
pub const DEFAULT_V1_POLICY: &str = r#"
# admin may do anything
p, role:admin, *, *, allow

# standard users read policy and decisions, and may rewrap
p, role:standard, policy*, read, allow
p, role:standard, /attributes*, read, allow
p, role:standard, /namespaces*, read, allow
p, role:standard, /subject-mappings*, read, allow
p, role:standard, /resource-mappings*, read, allow
p, role:standard, authorization.AuthorizationService/GetDecisions*, read, allow
p, role:standard, authorization.AuthorizationService/GetEntitlements, read, allow
p, role:standard, authorization.v2.AuthorizationService/*, read, allow
p, role:standard, /v1/authorization, write, allow
p, role:standard, /v1/entitlements, write, allow
p, role:standard, kas.AccessService/Rewrap, *, allow
p, role:standard, /kas/v2/rewrap, *, allow

# anyone holding a valid token may rewrap
p, role:unknown, kas.AccessService/Rewrap, *, allow
p, role:unknown, /kas/v2/rewrap, *, allow

g, opentdf-admin, role:admin
g, opentdf-standard, role:standard
"#;

/// Default table for RPC and dimension (v2) authorization.
pub const DEFAULT_V2_POLICY: &str = r#"
p, role:admin, *, *, allow

p, role:standard, /policy.attributes.AttributesService/Get*, *, allow
p, role:standard, /policy.attributes.AttributesService/List*, *, allow
p, role:standard, /policy.namespaces.NamespaceService/Get*, *, allow
p, role:standard, /policy.namespaces.NamespaceService/List*, *, allow
p, role:standard, /policy.subjectmapping.SubjectMappingService/Get*, *, allow
p, role:standard, /policy.subjectmapping.SubjectMappingService/List*, *, allow
p, role:standard, /authorization.v2.AuthorizationService/*, *, allow
p, role:standard, /kas.AccessService/Rewrap, *, allow

p, role:unknown, /kas.AccessService/Rewrap, *, allow

g, opentdf-admin, role:admin
g, opentdf-standard, role:standard
"#;

/// The `p` and `g` rows of a table, ready for the enforcer.
///
/// A grouping whose member is a bare name (`g, opentdf-admin, role:admin`)
/// is also recorded for the prefixed form (`role:opentdf-admin`), since
/// subjects extracted from tokens carry the prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyLines {
    pub policies: Vec<Vec<String>>,
    pub groupings: Vec<Vec<String>>,
}

fn line_error(number: usize, line: &str, reason: &str) -> AuthzError {
    AuthzError::ParseError(format!("policy line {number} '{line}': {reason}"))
}

/// `*` may only close a pattern.
fn wildcard_is_trailing(pattern: &str) -> bool {
    pattern
        .find('*')
        .is_none_or(|idx| idx + 1 == pattern.len())
}

impl PolicyLines {
    pub fn parse(text: &str) -> Result<Self, AuthzError> {
        let mut lines = PolicyLines::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let number = idx + 1;
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields[0] {
                "p" => {
                    if fields.len() < 5 {
                        return Err(line_error(number, line, "missing effect"));
                    }
                    if fields.len() > 5 {
                        return Err(line_error(number, line, "too many fields"));
                    }
                    if fields[1..4].iter().any(|f| f.is_empty()) {
                        return Err(line_error(number, line, "empty field"));
                    }
                    if fields[4] != ALLOW && fields[4] != DENY {
                        return Err(line_error(number, line, "effect must be allow or deny"));
                    }
                    if !wildcard_is_trailing(fields[2]) {
                        return Err(line_error(number, line, "'*' must end the object pattern"));
                    }
                    lines
                        .policies
                        .push(fields[1..].iter().map(|f| f.to_string()).collect());
                }
                "g" => {
                    if fields.len() != 3 || fields[1].is_empty() {
                        return Err(line_error(number, line, "grouping needs a member and a role"));
                    }
                    if !fields[2].starts_with(ROLE_PREFIX) || fields[2].len() == ROLE_PREFIX.len() {
                        return Err(line_error(
                            number,
                            line,
                            "grouping target must be a role: name",
                        ));
                    }
                    let (member, role) = (fields[1], fields[2]);
                    lines.groupings.push(vec![member.to_string(), role.to_string()]);
                    if !member.starts_with(ROLE_PREFIX) {
                        lines
                            .groupings
                            .push(vec![format!("{ROLE_PREFIX}{member}"), role.to_string()]);
                    }
                }
                _ => return Err(line_error(number, line, "line must start with p or g")),
            }
        }
        debug!(
            event = "Policy",
            phase = "Parsed",
            rules = lines.policies.len(),
            groupings = lines.groupings.len()
        );
        Ok(lines)
    }
}

fn dimension_match_fn(request: Dynamic, policy: Dynamic) -> Dynamic {
    let request = request.into_string().unwrap_or_default();
    let policy = policy.into_string().unwrap_or_default();
    dimension_match(&request, &policy).into()
}

/// Build an in-memory enforcer for `model` loaded with `lines`.
pub async fn build_enforcer(model: &str, lines: &PolicyLines) -> Result<Enforcer, AuthzError> {
    let model = DefaultModel::from_str(model)
        .await
        .map_err(|err| AuthzError::ParseError(format!("casbin model: {err}")))?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;
    enforcer.add_function("dimensionMatch", OperatorFunction::Arg2(dimension_match_fn));

    for policy in &lines.policies {
        enforcer.add_policy(policy.clone()).await?;
    }
    for grouping in &lines.groupings {
        enforcer.add_grouping_policy(grouping.clone()).await?;
    }
    enforcer.build_role_links()?;
    Ok(enforcer)
}

/// Replace the groupings of mapped roles in `text`: the role map names the
/// external group (value) that should hold each internal role (key).
fn apply_role_map(text: &str, role_map: &HashMap<String, String>) -> String {
    if role_map.is_empty() {
        return text.to_string();
    }
    let mut lines: Vec<String> = text
        .lines()
        .filter(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            !(fields.len() == 3
                && fields[0] == "g"
                && fields[2]
                    .strip_prefix(ROLE_PREFIX)
                    .is_some_and(|role| role_map.contains_key(role)))
        })
        .map(str::to_string)
        .collect();
    let mut mapped: Vec<(&String, &String)> = role_map.iter().collect();
    mapped.sort();
    for (role, group) in mapped {
        lines.push(format!("g, {group}, {ROLE_PREFIX}{role}"));
    }
    lines.join("\n")
}

/// The table text an authorizer runs with: `csv` if set, else `builtin`, else
/// the default, with the role map applied and `extension` appended.
pub fn assemble_policy(default: &str, config: &AuthorizerConfig) -> String {
    let base = config
        .csv
        .as_deref()
        .or(config.builtin.as_deref())
        .unwrap_or(default);
    let mut text = apply_role_map(base, &config.role_map);
    if let Some(extension) = config.extension.as_deref().filter(|e| !e.trim().is_empty()) {
        text.push('\n');
        text.push_str(extension);
    }
    text
}
