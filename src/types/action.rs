//! Actions performed on resources.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display as StrumDisplay, EnumIter, EnumString};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::AuthzError;

/// Well-known actions. Anything else is a custom action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StandardAction {
    Create,
    Read,
    Update,
    Delete,
}

/// An action, identified by name. Names compare case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate, Eq)]
pub struct Action {
    #[validate(custom(function = "crate::validation::not_blank"))]
    pub name: String,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Action { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive name comparison.
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn standard(&self) -> Option<StandardAction> {
        StandardAction::from_str(&self.name).ok()
    }

    /// ASCII-lowercased name, the key used in entitlement maps. Agrees with
    /// [`Action::matches`], so equal actions always share a key.
    pub fn key(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.name)
    }
}

impl std::hash::Hash for Action {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name)
    }
}

impl From<StandardAction> for Action {
    fn from(action: StandardAction) -> Self {
        Action::new(action.as_ref())
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Action::new(name)
    }
}

impl FromStr for Action {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AuthzError::validation("action.name", "must not be empty"));
        }
        Ok(Action::new(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use yare::parameterized;

    #[parameterized(
        same_case = { "read", "read", true },
        upper = { "READ", "read", true },
        mixed = { "Custom_Export", "custom_export", true },
        different = { "read", "create", false },
    )]
    fn test_action_matches(a: &str, b: &str, expected: bool) {
        assert_eq!(Action::new(a).matches(b), expected);
        assert_eq!(Action::new(a) == Action::new(b), expected);
    }

    #[test]
    fn test_action_hash_is_case_insensitive() {
        let set: HashSet<Action> = ["Read", "READ", "read"].into_iter().map(Action::new).collect();
        assert_eq!(set.len(), 1);
    }

    #[parameterized(
        create = { "create", Some(StandardAction::Create) },
        read_upper = { "READ", Some(StandardAction::Read) },
        custom = { "export", None },
    )]
    fn test_standard_action(name: &str, expected: Option<StandardAction>) {
        assert_eq!(Action::new(name).standard(), expected);
    }

    #[test]
    fn test_action_from_str_rejects_empty() {
        assert!("".parse::<Action>().is_err());
        assert!("   ".parse::<Action>().is_err());
        assert_eq!("decrypt".parse::<Action>().unwrap().name(), "decrypt");
    }

    #[parameterized(
        ascii = { "READ", "read" },
        dotted_i = { "Export\u{130}", "export\u{130}" },
        sharp_s = { "STRA\u{df}E", "stra\u{df}e" },
        greek = { "\u{3a3}IGN", "\u{3a3}ign" },
    )]
    fn test_key_folds_ascii_only(name: &str, key: &str) {
        let action = Action::new(name);
        assert_eq!(action.key(), key);
        // equal actions hash to the same key, unequal ones never collide
        let lower = Action::new(name.to_lowercase());
        assert_eq!(action == lower, action.key() == lower.key());
    }
}
