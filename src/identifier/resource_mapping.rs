use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{FullyQualified, IdentifierError, SCHEME, normalize, validate_name, validate_namespace};

static GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://(?P<ns>[^/]+)/resm/(?P<group>[^/]+)$").expect("static regex"));

/// `https://<ns>/resm/<group>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FullyQualifiedResourceMappingGroup {
    namespace: String,
    group: String,
}

impl FullyQualifiedResourceMappingGroup {
    pub fn new(namespace: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().to_ascii_lowercase(),
            group: group.into().to_ascii_lowercase(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

impl FullyQualified for FullyQualifiedResourceMappingGroup {
    fn parse(fqn: &str) -> Result<Self, IdentifierError> {
        let fqn = normalize(fqn)?;
        let Some(caps) = GROUP_RE.captures(&fqn) else {
            return Err(IdentifierError::InvalidFqnFormat(format!(
                "'{fqn}' (expected https://<namespace>/resm/<group>)"
            )));
        };
        let parsed = Self::new(&caps["ns"], &caps["group"]);
        parsed.validate()?;
        Ok(parsed)
    }

    fn fqn(&self) -> String {
        format!("{SCHEME}{}/resm/{}", self.namespace, self.group).to_ascii_lowercase()
    }

    fn validate(&self) -> Result<(), IdentifierError> {
        validate_namespace(&self.namespace)?;
        validate_name("resource mapping group", &self.group)
    }
}

impl Display for FullyQualifiedResourceMappingGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.fqn())
    }
}

impl FromStr for FullyQualifiedResourceMappingGroup {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_mapping_group() {
        let group: FullyQualifiedResourceMappingGroup =
            "https://Example.com/resm/Finance".parse().unwrap();
        assert_eq!(group.namespace(), "example.com");
        assert_eq!(group.group(), "finance");
        assert_eq!(group.to_string(), "https://example.com/resm/finance");

        assert!("https://example.com/resm/".parse::<FullyQualifiedResourceMappingGroup>().is_err());
        assert!("https://example/resm/finance".parse::<FullyQualifiedResourceMappingGroup>().is_err());
    }
}
