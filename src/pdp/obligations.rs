//! Obligation triggers, indexed by action and attribute value.

use std::collections::HashMap;

use tracing::debug;

use crate::error::AuthzError;
use crate::types::{Action, Obligation};

type ByValue = HashMap<String, Vec<String>>;

/// Triggers of every obligation value in a snapshot.
///
/// Unscoped triggers apply to every client. Scoped triggers apply only to the
/// client ids they list.
#[derive(Debug, Clone, Default)]
pub struct ObligationIndex {
    unscoped: HashMap<String, ByValue>,
    scoped: HashMap<String, HashMap<String, ByValue>>,
}

fn push_unique(list: &mut Vec<String>, fqn: &str) {
    if !list.iter().any(|f| f == fqn) {
        list.push(fqn.to_string());
    }
}

impl ObligationIndex {
    pub fn new(obligations: &[Obligation]) -> Result<Self, AuthzError> {
        let mut index = ObligationIndex::default();
        let mut triggers = 0usize;
        for obligation in obligations {
            for value in &obligation.values {
                let obligation_fqn = value.fqn.to_ascii_lowercase();
                for trigger in &value.triggers {
                    let action = trigger.action.key();
                    let attribute = trigger.attribute_value_fqn.to_ascii_lowercase();
                    triggers += 1;
                    if trigger.client_ids.is_empty() {
                        let slot = index
                            .unscoped
                            .entry(action)
                            .or_default()
                            .entry(attribute)
                            .or_default();
                        push_unique(slot, &obligation_fqn);
                        continue;
                    }
                    for client in &trigger.client_ids {
                        if client.is_empty() {
                            return Err(AuthzError::Internal(format!(
                                "obligation trigger for {obligation_fqn} has an empty client id"
                            )));
                        }
                        let slot = index
                            .scoped
                            .entry(client.clone())
                            .or_default()
                            .entry(action.clone())
                            .or_default()
                            .entry(attribute.clone())
                            .or_default();
                        push_unique(slot, &obligation_fqn);
                    }
                }
            }
        }
        debug!(event = "Obligations", phase = "Indexed", triggers);
        Ok(index)
    }

    pub fn is_empty(&self) -> bool {
        self.unscoped.is_empty() && self.scoped.is_empty()
    }

    /// Obligation value FQNs triggered by `action` on any of `attribute_value_fqns`,
    /// deduplicated, unscoped triggers first.
    pub fn required_for(
        &self,
        action: &Action,
        attribute_value_fqns: &[String],
        client_id: Option<&str>,
    ) -> Vec<String> {
        let action = action.key();
        let mut required = Vec::new();
        let mut collect = |by_value: Option<&ByValue>| {
            let Some(by_value) = by_value else {
                return;
            };
            for fqn in attribute_value_fqns {
                if let Some(obligations) = by_value.get(&fqn.to_ascii_lowercase()) {
                    for obligation in obligations {
                        push_unique(&mut required, obligation);
                    }
                }
            }
        };
        collect(self.unscoped.get(&action));
        if let Some(client) = client_id.filter(|c| !c.is_empty()) {
            collect(self.scoped.get(client).and_then(|m| m.get(&action)));
        }
        required
    }
}

/// True when every required obligation appears in `fulfillable`, compared
/// ASCII case-insensitively like every other FQN comparison.
pub fn all_fulfillable(required: &[String], fulfillable: &[String]) -> bool {
    required
        .iter()
        .all(|r| fulfillable.iter().any(|f| f.eq_ignore_ascii_case(r)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObligationValue;

    const S: &str = "https://example.com/attr/classification/value/s";
    const TS: &str = "https://example.com/attr/classification/value/ts";
    const PRINT: &str = "https://example.com/obl/drm/value/prevent_print";
    const WATERMARK: &str = "https://example.com/obl/drm/value/watermark";

    fn index() -> ObligationIndex {
        let drm = Obligation::new(
            "example.com",
            "drm",
            vec![
                ObligationValue::new("example.com", "drm", "prevent_print")
                    .triggered_by("read", S, &["alpha"]),
                ObligationValue::new("example.com", "drm", "watermark")
                    .triggered_by("read", S, &[])
                    .triggered_by("read", TS, &[]),
            ],
        );
        ObligationIndex::new(&[drm]).unwrap()
    }

    fn fqns(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_scoped_triggers_need_matching_client() {
        let index = index();
        let read = Action::new("READ");
        assert_eq!(
            index.required_for(&read, &fqns(&[S]), Some("alpha")),
            vec![WATERMARK, PRINT]
        );
        assert_eq!(index.required_for(&read, &fqns(&[S]), Some("beta")), vec![WATERMARK]);
        assert_eq!(index.required_for(&read, &fqns(&[S]), None), vec![WATERMARK]);
    }

    #[test]
    fn test_required_is_deduplicated_and_action_bound() {
        let index = index();
        assert_eq!(
            index.required_for(&Action::new("read"), &fqns(&[S, TS]), None),
            vec![WATERMARK]
        );
        assert!(index
            .required_for(&Action::new("create"), &fqns(&[S]), Some("alpha"))
            .is_empty());
    }

    #[test]
    fn test_empty_client_in_trigger_is_internal() {
        let bad = Obligation::new(
            "example.com",
            "drm",
            vec![ObligationValue::new("example.com", "drm", "x").triggered_by("read", S, &[""])],
        );
        let err = ObligationIndex::new(&[bad]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn test_all_fulfillable() {
        let required = fqns(&[PRINT]);
        assert!(!all_fulfillable(&required, &[]));
        assert!(all_fulfillable(&required, &fqns(&[PRINT.to_uppercase().as_str()])));
        assert!(all_fulfillable(&[], &[]));
    }

    #[test]
    fn test_fulfillable_folds_ascii_only() {
        let required = vec!["https://Example.com/obl/DRM/value/\u{dc}nder".to_ascii_lowercase()];
        let upper = vec!["HTTPS://EXAMPLE.COM/OBL/DRM/VALUE/\u{dc}NDER".to_string()];
        let unicode_lower = vec!["https://example.com/obl/drm/value/\u{fc}nder".to_string()];
        assert!(all_fulfillable(&required, &upper));
        assert!(!all_fulfillable(&required, &unicode_lower));
    }
}
