//! Fully-qualified names (FQNs) for policy objects.
//!
//! Canonical forms, always lowercase:
//! - namespace: `https://<ns>`
//! - attribute definition: `https://<ns>/attr/<name>`
//! - attribute value: `https://<ns>/attr/<name>/value/<value>`
//! - obligation: `https://<ns>/obl/<name>` or `https://<ns>/obl/<name>/value/<value>`
//! - registered resource value: `https://reg_res/<name>/value/<value>`
//! - resource-mapping group: `https://<ns>/resm/<group>`
//!
//! Parsing lowercases its input, rejects whitespace, matches the shape and
//! then validates every name segment.

mod attribute;
mod obligation;
mod registered_resource;
mod resource_mapping;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use attribute::FullyQualifiedAttribute;
pub use obligation::FullyQualifiedObligation;
pub use registered_resource::{FullyQualifiedRegisteredResourceValue, REGISTERED_RESOURCE_AUTHORITY};
pub use resource_mapping::FullyQualifiedResourceMappingGroup;

pub(crate) const SCHEME: &str = "https://";

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9_-]{0,251}[A-Za-z0-9])?$").expect("static regex"));

static NAMESPACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,}$").expect("static regex")
});

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierError {
    #[error("invalid FQN format: {0}")]
    InvalidFqnFormat(String),

    #[error("invalid {field} name: '{name}'")]
    InvalidName { field: String, name: String },

    #[error("invalid namespace: '{0}'")]
    InvalidNamespace(String),
}

/// A policy object addressable by a fully-qualified name.
pub trait FullyQualified: Sized {
    /// Parse and validate an FQN string.
    fn parse(fqn: &str) -> Result<Self, IdentifierError>;

    /// Render the canonical, lowercase FQN.
    fn fqn(&self) -> String;

    /// Check every segment against the name and namespace rules.
    fn validate(&self) -> Result<(), IdentifierError>;
}

/// Parse any [`FullyQualified`] type.
///
/// ```rust
/// use tdf_authz_core::identifier::{parse, FullyQualified, FullyQualifiedAttribute};
/// let fqn: FullyQualifiedAttribute =
///     parse("https://Example.com/attr/Classification/value/Secret").unwrap();
/// assert_eq!(fqn.fqn(), "https://example.com/attr/classification/value/secret");
/// ```
pub fn parse<T: FullyQualified>(fqn: &str) -> Result<T, IdentifierError> {
    T::parse(fqn)
}

/// Lowercase the input after rejecting empty strings and whitespace.
pub(crate) fn normalize(fqn: &str) -> Result<String, IdentifierError> {
    if fqn.is_empty() {
        return Err(IdentifierError::InvalidFqnFormat("empty FQN".to_string()));
    }
    if fqn.chars().any(char::is_whitespace) {
        return Err(IdentifierError::InvalidFqnFormat(format!(
            "whitespace is not permitted: '{fqn}'"
        )));
    }
    Ok(fqn.to_ascii_lowercase())
}

pub(crate) fn validate_name(field: &str, name: &str) -> Result<(), IdentifierError> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(IdentifierError::InvalidName {
            field: field.to_string(),
            name: name.to_string(),
        })
    }
}

pub(crate) fn validate_namespace(namespace: &str) -> Result<(), IdentifierError> {
    if NAMESPACE_RE.is_match(namespace) {
        Ok(())
    } else {
        Err(IdentifierError::InvalidNamespace(namespace.to_string()))
    }
}

/// Definition FQN (`https://<ns>/attr/<name>`) of an attribute value FQN.
pub fn definition_fqn_of(value_fqn: &str) -> Result<String, IdentifierError> {
    let parsed = FullyQualifiedAttribute::parse(value_fqn)?;
    match parsed.name() {
        Some(name) => Ok(FullyQualifiedAttribute::definition(parsed.namespace(), name).fqn()),
        None => Err(IdentifierError::InvalidFqnFormat(format!(
            "'{value_fqn}' does not name an attribute definition"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        simple = { "example.com" },
        subdomain = { "sub.example.com" },
        hyphenated = { "my-org.example.co" },
    )]
    fn test_namespace_accepts(ns: &str) {
        assert!(validate_namespace(ns).is_ok());
    }

    #[parameterized(
        no_tld = { "example" },
        leading_hyphen = { "-example.com" },
        trailing_hyphen = { "example-.com" },
        numeric_tld = { "example.c0m" },
        short_tld = { "example.c" },
    )]
    fn test_namespace_rejects(ns: &str) {
        assert_eq!(
            validate_namespace(ns),
            Err(IdentifierError::InvalidNamespace(ns.to_string()))
        );
    }

    #[parameterized(
        plain = { "classification" },
        hyphen_inside = { "security-level" },
        underscore_inside = { "top_secret123" },
        single_char = { "a" },
    )]
    fn test_name_accepts(name: &str) {
        assert!(validate_name("attribute", name).is_ok());
    }

    #[parameterized(
        leading_underscore = { "_secret" },
        trailing_hyphen = { "secret-" },
        dot = { "sec.ret" },
        empty = { "" },
    )]
    fn test_name_rejects(name: &str) {
        assert!(validate_name("attribute", name).is_err());
    }

    #[test]
    fn test_normalize_rejects_whitespace() {
        assert!(normalize("https://example.com/attr/a b").is_err());
        assert!(normalize("").is_err());
        assert_eq!(normalize("HTTPS://Example.COM").unwrap(), "https://example.com");
    }

    #[test]
    fn test_definition_fqn_of_value() {
        assert_eq!(
            definition_fqn_of("https://example.com/attr/Classification/value/S").unwrap(),
            "https://example.com/attr/classification"
        );
        assert!(definition_fqn_of("https://example.com").is_err());
    }
}
