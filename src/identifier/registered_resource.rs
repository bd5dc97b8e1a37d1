use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{FullyQualified, IdentifierError, SCHEME, normalize, validate_name};

/// Literal authority used in registered resource FQNs in place of a namespace.
pub const REGISTERED_RESOURCE_AUTHORITY: &str = "reg_res";

static VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://reg_res/(?P<name>[^/]+)/value/(?P<value>[^/]+)$").expect("static regex")
});

/// `https://reg_res/<name>/value/<value>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FullyQualifiedRegisteredResourceValue {
    name: String,
    value: String,
}

impl FullyQualifiedRegisteredResourceValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            value: value.into().to_ascii_lowercase(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl FullyQualified for FullyQualifiedRegisteredResourceValue {
    fn parse(fqn: &str) -> Result<Self, IdentifierError> {
        let fqn = normalize(fqn)?;
        let Some(caps) = VALUE_RE.captures(&fqn) else {
            return Err(IdentifierError::InvalidFqnFormat(format!(
                "'{fqn}' (expected https://{REGISTERED_RESOURCE_AUTHORITY}/<name>/value/<value>)"
            )));
        };
        let parsed = Self::new(&caps["name"], &caps["value"]);
        parsed.validate()?;
        Ok(parsed)
    }

    fn fqn(&self) -> String {
        format!(
            "{SCHEME}{REGISTERED_RESOURCE_AUTHORITY}/{}/value/{}",
            self.name, self.value
        )
        .to_ascii_lowercase()
    }

    fn validate(&self) -> Result<(), IdentifierError> {
        validate_name("registered resource", &self.name)?;
        validate_name("registered resource value", &self.value)
    }
}

impl Display for FullyQualifiedRegisteredResourceValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.fqn())
    }
}

impl FromStr for FullyQualifiedRegisteredResourceValue {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[test]
    fn test_build_and_parse() {
        let rr = FullyQualifiedRegisteredResourceValue::new("Network", "Internal");
        assert_eq!(rr.fqn(), "https://reg_res/network/value/internal");

        let parsed: FullyQualifiedRegisteredResourceValue =
            "https://REG_RES/network/value/internal".parse().unwrap();
        assert_eq!(parsed, rr);
    }

    #[parameterized(
        namespace_authority = { "https://example.com/network/value/internal" },
        missing_value = { "https://reg_res/network" },
        empty_value = { "https://reg_res/network/value/" },
        trailing = { "https://reg_res/network/value/internal/extra" },
        bad_name = { "https://reg_res/-network/value/internal" },
    )]
    fn test_parse_rejects(fqn: &str) {
        assert!(FullyQualifiedRegisteredResourceValue::parse(fqn).is_err());
    }
}
