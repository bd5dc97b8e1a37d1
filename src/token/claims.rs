use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The claim set of a verified token, or of resolved user info.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn new(map: Map<String, Value>) -> Self {
        Claims(map)
    }

    /// Build from any JSON value; non-objects yield an empty claim set.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Claims(map),
            _ => Claims::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a dot-separated path such as `realm_access.roles`.
    ///
    /// An empty path, or any missing segment, yields `None`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get_path(path).and_then(Value::as_str)
    }

    /// String values at `path`: a single string, or the string members of an array.
    pub fn strings_at(&self, path: &str) -> Vec<String> {
        match self.get_path(path) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Claims(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use yare::parameterized;

    fn claims() -> Claims {
        Claims::from_value(json!({
            "preferred_username": "alice",
            "realm_access": { "roles": ["opentdf-admin", "viewer", 7] },
            "group": "finance",
            "nested": { "deep": { "value": "x" } }
        }))
    }

    #[parameterized(
        top = { "preferred_username", Some(json!("alice")) },
        nested = { "nested.deep.value", Some(json!("x")) },
        missing = { "nested.missing", None },
        through_scalar = { "group.name", None },
        empty = { "", None },
    )]
    fn test_get_path(path: &str, expected: Option<Value>) {
        assert_eq!(claims().get_path(path).cloned(), expected);
    }

    #[test]
    fn test_strings_at() {
        let c = claims();
        assert_eq!(c.strings_at("realm_access.roles"), vec!["opentdf-admin", "viewer"]);
        assert_eq!(c.strings_at("group"), vec!["finance"]);
        assert!(c.strings_at("realm_access.missing").is_empty());
    }

    #[test]
    fn test_from_non_object() {
        assert!(Claims::from_value(json!([1, 2])).is_empty());
    }
}
