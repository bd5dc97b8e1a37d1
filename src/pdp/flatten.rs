//! Flattening of entity property bags into selector-addressable leaves.
//!
//! Objects contribute `.key` segments and arrays `[i]`, so
//! `{"realm_access": {"roles": ["a"]}}` flattens to `.realm_access.roles[0]`.
//! Each leaf is stored once under its indexed path. A `[]` segment in a
//! selector stands for any index at that position, which keeps storage
//! linear in the number of leaves however deeply arrays nest.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flattened {
    items: Vec<(String, Value)>,
}

impl Flattened {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut items = Vec::new();
        for (key, value) in map {
            walk(&format!(".{key}"), value, &mut items);
        }
        Flattened { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Every leaf under `selector`.
    ///
    /// The leading `.` is optional, `[]` matches any index, and a selector
    /// naming an array also matches its members, so `realm_access.roles`
    /// yields each role once.
    pub fn lookup(&self, selector: &str) -> Vec<&Value> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Vec::new();
        }
        let key = if selector.starts_with('.') {
            selector.to_string()
        } else {
            format!(".{selector}")
        };
        self.items
            .iter()
            .filter(|(k, _)| selector_matches(&key, k))
            .map(|(_, v)| v)
            .collect()
    }
}

fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                walk(&format!("{prefix}.{key}"), child, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                walk(&format!("{prefix}[{i}]"), child, out);
            }
        }
        leaf => out.push((prefix.to_string(), leaf.clone())),
    }
}

/// Strip one leading `[<digits>]` segment.
fn strip_index(key: &str) -> Option<&str> {
    let rest = key.strip_prefix('[')?;
    let close = rest.find(']')?;
    let (digits, rest) = rest.split_at(close);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(&rest[1..])
}

fn selector_matches(selector: &str, key: &str) -> bool {
    let (mut selector, mut key) = (selector, key);
    loop {
        let literal_end = selector.find("[]").unwrap_or(selector.len());
        let (literal, rest) = selector.split_at(literal_end);
        let Some(after) = key.strip_prefix(literal) else {
            return false;
        };
        key = after;
        if rest.is_empty() {
            return key.is_empty() || strip_index(key) == Some("");
        }
        selector = &rest[2..];
        match strip_index(key) {
            Some(after) => key = after,
            None => return false,
        }
    }
}
