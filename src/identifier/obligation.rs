use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{FullyQualified, IdentifierError, SCHEME, normalize, validate_name, validate_namespace};

static VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://(?P<ns>[^/]+)/obl/(?P<name>[^/]+)/value/(?P<value>[^/]+)$")
        .expect("static regex")
});
static DEFINITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://(?P<ns>[^/]+)/obl/(?P<name>[^/]+)$").expect("static regex"));
static NAMESPACE_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://(?P<ns>[^/]+)$").expect("static regex"));

/// An obligation namespace, definition or value FQN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FullyQualifiedObligation {
    namespace: String,
    name: Option<String>,
    value: Option<String>,
}

impl FullyQualifiedObligation {
    pub fn namespace_only(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().to_ascii_lowercase(),
            name: None,
            value: None,
        }
    }

    pub fn definition(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().to_ascii_lowercase(),
            name: Some(name.into().to_ascii_lowercase()),
            value: None,
        }
    }

    pub fn value(
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into().to_ascii_lowercase(),
            name: Some(name.into().to_ascii_lowercase()),
            value: Some(value.into().to_ascii_lowercase()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn obligation_value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Parse a string that must name an obligation *value*.
    pub fn parse_value(fqn: &str) -> Result<Self, IdentifierError> {
        let parsed = Self::parse(fqn)?;
        if parsed.value.is_none() {
            return Err(IdentifierError::InvalidFqnFormat(format!(
                "'{fqn}' is not an obligation value FQN"
            )));
        }
        Ok(parsed)
    }
}

impl FullyQualified for FullyQualifiedObligation {
    fn parse(fqn: &str) -> Result<Self, IdentifierError> {
        let fqn = normalize(fqn)?;

        let parsed = if let Some(caps) = VALUE_RE.captures(&fqn) {
            Self::value(&caps["ns"], &caps["name"], &caps["value"])
        } else if let Some(caps) = DEFINITION_RE.captures(&fqn) {
            Self::definition(&caps["ns"], &caps["name"])
        } else if let Some(caps) = NAMESPACE_ONLY_RE.captures(&fqn) {
            Self::namespace_only(&caps["ns"])
        } else {
            return Err(IdentifierError::InvalidFqnFormat(format!(
                "'{fqn}' (expected https://<namespace>[/obl/<name>[/value/<value>]])"
            )));
        };

        parsed.validate()?;
        Ok(parsed)
    }

    fn fqn(&self) -> String {
        let mut out = format!("{SCHEME}{}", self.namespace);
        if let Some(name) = &self.name {
            out.push_str("/obl/");
            out.push_str(name);
            if let Some(value) = &self.value {
                out.push_str("/value/");
                out.push_str(value);
            }
        }
        out.to_ascii_lowercase()
    }

    fn validate(&self) -> Result<(), IdentifierError> {
        validate_namespace(&self.namespace)?;
        if let Some(name) = &self.name {
            validate_name("obligation", name)?;
        }
        if let Some(value) = &self.value {
            validate_name("obligation value", value)?;
        }
        Ok(())
    }
}

impl Display for FullyQualifiedObligation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.fqn())
    }
}

impl FromStr for FullyQualifiedObligation {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
