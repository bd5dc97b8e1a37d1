//! Subjects an authorization request is evaluated as.

use crate::token::Claims;

use super::policy::{ROLE_PREFIX, UNKNOWN_ROLE};

/// Roles found under each claim path, in the token first and then in the
/// user info. Empty strings are dropped, duplicates kept once.
pub fn extract_roles(
    token: &Claims,
    user_info: Option<&Claims>,
    groups_claim: &[String],
) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    let sources = std::iter::once(token).chain(user_info);
    for claims in sources {
        for path in groups_claim {
            for role in claims.strings_at(path) {
                if !role.is_empty() && !roles.contains(&role) {
                    roles.push(role);
                }
            }
        }
    }
    roles
}

/// `role:<r>` for every extracted role (or `role:unknown` when there are
/// none), followed by the user name claim when present.
pub fn subjects(
    token: &Claims,
    user_info: Option<&Claims>,
    groups_claim: &[String],
    username_claim: &str,
) -> Vec<String> {
    let mut subjects: Vec<String> = extract_roles(token, user_info, groups_claim)
        .into_iter()
        .map(|role| format!("{ROLE_PREFIX}{role}"))
        .collect();
    if subjects.is_empty() {
        subjects.push(UNKNOWN_ROLE.to_string());
    }
    if let Some(username) = token.get_str(username_claim).filter(|u| !u.is_empty()) {
        subjects.push(username.to_string());
    }
    subjects
}
