//! Canonical dimension strings for v2 policy rows.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::resolver::ResolverContext;

pub const WILDCARD: &str = "*";

/// Merge every resource's dimensions (later resources win), sort by key and
/// join as `k1=v1&k2=v2`. No dimensions serialize to `*`.
pub fn serialize_dimensions(ctx: Option<&ResolverContext>) -> String {
    let Some(ctx) = ctx else {
        return WILDCARD.to_string();
    };
    let merged: BTreeMap<&str, &str> = ctx
        .resources
        .iter()
        .flat_map(|r| r.0.iter())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if merged.is_empty() {
        return WILDCARD.to_string();
    }
    merged.iter().map(|(k, v)| format!("{k}={v}")).join("&")
}

/// Parse a serialized dimension string. `*` and the empty string are empty;
/// clauses without `=` are ignored.
pub fn parse_dimensions(dims: &str) -> BTreeMap<String, String> {
    if dims == WILDCARD || dims.is_empty() {
        return BTreeMap::new();
    }
    dims.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Does a request's dimension string satisfy a policy's?
///
/// `*` matches anything. Otherwise every `k=v` clause of the policy needs `k`
/// in the request, with `v` either `*` or equal to the request's value. An
/// empty policy only matches a request without dimensions.
pub fn dimension_match(request: &str, policy: &str) -> bool {
    if policy == WILDCARD {
        return true;
    }
    let request = parse_dimensions(request);
    if policy.is_empty() {
        return request.is_empty();
    }
    policy
        .split('&')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .all(|clause| match clause.split_once('=') {
            None => false,
            Some((key, expected)) => request
                .get(key)
                .is_some_and(|actual| expected == WILDCARD || expected == actual),
        })
}
