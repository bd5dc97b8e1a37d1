use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{FullyQualified, IdentifierError, SCHEME, normalize, validate_name, validate_namespace};

static VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://(?P<ns>[^/]+)/attr/(?P<name>[^/]+)/value/(?P<value>[^/]+)$")
        .expect("static regex")
});
static DEFINITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://(?P<ns>[^/]+)/attr/(?P<name>[^/]+)$").expect("static regex"));
static NAMESPACE_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://(?P<ns>[^/]+)$").expect("static regex"));

/// An attribute namespace, definition or value FQN.
///
/// `name` is present for definitions and values, `value` only for values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FullyQualifiedAttribute {
    namespace: String,
    name: Option<String>,
    value: Option<String>,
}

impl FullyQualifiedAttribute {
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

    pub fn attribute_value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_value(&self) -> bool {
        self.value.is_some()
    }

    /// `https://<ns>` for any form.
    pub fn namespace_fqn(&self) -> String {
        format!("{SCHEME}{}", self.namespace)
    }

    /// The definition this FQN belongs to, if it names one.
    pub fn to_definition(&self) -> Option<Self> {
        self.name
            .as_ref()
            .map(|name| Self::definition(self.namespace.clone(), name.clone()))
    }
}

impl FullyQualified for FullyQualifiedAttribute {
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
                "'{fqn}' (expected https://<namespace>[/attr/<name>[/value/<value>]])"
            )));
        };

        parsed.validate()?;
        Ok(parsed)
    }

    fn fqn(&self) -> String {
        let mut out = format!("{SCHEME}{}", self.namespace);
        if let Some(name) = &self.name {
            out.push_str("/attr/");
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
            validate_name("attribute", name)?;
        }
        if let Some(value) = &self.value {
            validate_name("attribute value", value)?;
        }
        Ok(())
    }
}

impl Display for FullyQualifiedAttribute {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.fqn())
    }
}

impl FromStr for FullyQualifiedAttribute {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
