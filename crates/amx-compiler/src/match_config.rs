use std::collections::BTreeMap;

use amx_core::{Action, FailUnexpected, MatchConfig, MessageStructure};
use indexmap::IndexMap;

use crate::alerts::{AlertCollector, AlertContext};

/// Match settings one row declares for itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOverrides {
    pub precision: BTreeMap<String, f64>,
    pub fail_unexpected: Option<FailUnexpected>,
    pub key_fields: Vec<String>,
    pub side_values: IndexMap<String, String>,
}

impl MatchOverrides {
    pub fn from_action(
        action: &Action,
        message: Option<&MessageStructure>,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Self {
        let mut overrides = Self::default();

        for (field, raw) in &action.precision {
            match raw.trim().parse::<f64>() {
                Ok(tolerance) if tolerance >= 0.0 && tolerance.is_finite() => {
                    overrides.precision.insert(field.clone(), tolerance);
                }
                _ => {
                    alerts.error(
                        &context.with_column(field.as_str()),
                        format!(
                            "Precision \"{}\" for field \"{}\" is not a non-negative number.",
                            raw, field
                        ),
                    );
                }
            }
        }

        if let Some(raw) = action
            .fail_unexpected
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
        {
            match FailUnexpected::parse(raw) {
                Some(policy) => overrides.fail_unexpected = Some(policy),
                None => {
                    alerts.error(
                        &context.with_column("fail_unexpected"),
                        format!(
                            "Invalid fail-unexpected value \"{}\"; expected N, Y or A.",
                            raw
                        ),
                    );
                }
            }
        }

        for key in action.key_field_names() {
            if let Some(message) = message {
                if message.field(&key).is_none() {
                    alerts.error(
                        &context.with_column("key_fields"),
                        format!(
                            "Key field \"{}\" is not defined in message \"{}\".",
                            key, message.name
                        ),
                    );
                    continue;
                }
            }
            overrides.key_fields.push(key);
        }

        for (column, value) in &action.custom {
            overrides.side_values.insert(column.clone(), value.clone());
        }
        overrides
    }

    /// Nothing here differs from what the parent would pass down.
    pub fn is_empty(&self) -> bool {
        self.precision.is_empty()
            && self.fail_unexpected.is_none()
            && self.key_fields.is_empty()
            && self.side_values.is_empty()
    }

    fn to_config(&self) -> MatchConfig {
        MatchConfig {
            precision: self.precision.clone(),
            fail_unexpected: self.fail_unexpected,
            key_fields: self.key_fields.clone(),
            side_values: self.side_values.clone(),
            children: Vec::new(),
        }
    }
}

/// Nested rows of a compiled action as seen by the match builder.
pub trait MatchTreeSource {
    fn overrides(&self, node: usize) -> Option<&MatchOverrides>;

    /// `(field path, child node)` pairs in field order.
    fn children(&self, node: usize) -> Vec<(String, usize)>;
}

pub fn build_match_tree(
    source: &dyn MatchTreeSource,
    root: usize,
    default_policy: FailUnexpected,
) -> MatchConfig {
    let mut config = source
        .overrides(root)
        .map(MatchOverrides::to_config)
        .unwrap_or_default();
    if config.fail_unexpected.is_none() {
        config.fail_unexpected = Some(default_policy);
    }
    let mut visiting = vec![root];
    attach_children(source, &mut config, root, &mut visiting);
    config
}

/// Returns whether any child node was attached under `parent`.
fn attach_children(
    source: &dyn MatchTreeSource,
    parent: &mut MatchConfig,
    node: usize,
    visiting: &mut Vec<usize>,
) -> bool {
    let mut attached = false;
    for (path, child) in source.children(node) {
        if visiting.contains(&child) {
            continue;
        }
        let overrides = source.overrides(child);
        let mut config = overrides.map(MatchOverrides::to_config).unwrap_or_default();
        config.inherit_from(parent);

        visiting.push(child);
        let has_descendants = attach_children(source, &mut config, child, visiting);
        visiting.pop();

        if has_descendants || overrides.is_some_and(|overrides| !overrides.is_empty()) {
            parent.attach_child(path, config);
            attached = true;
        }
    }
    attached
}
