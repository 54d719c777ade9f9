use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MatrixError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Send,
    Receive,
    #[default]
    None,
}

impl Direction {
    pub fn is_receive(&self) -> bool {
        matches!(self, Self::Receive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilityHandle {
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub uri: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub return_type: Option<String>,
    /// Results of this action are also published to the matrix static table.
    #[serde(default)]
    pub produces_static: bool,
    #[serde(default)]
    pub utilities: Vec<UtilityHandle>,
}

pub trait ActionRegistry {
    fn resolve_action(&self, uri: &str) -> Option<&ActionInfo>;

    fn display_name(&self, uri: &str) -> Option<&str>;
}

pub trait UtilityRegistry {
    /// Lookup by fully qualified uri, e.g. `General:Math.Add`.
    fn qualified_utility(&self, uri: &str) -> Option<UtilityHandle>;

    /// Utilities contributed by one action.
    fn action_utility(&self, action_uri: &str, name: &str) -> Option<UtilityHandle>;

    fn global_utility(&self, name: &str) -> Option<UtilityHandle>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub actions: Vec<ActionInfo>,
    #[serde(default)]
    pub global_utilities: Vec<UtilityHandle>,
}

/// In-memory registry; action uris compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    actions: BTreeMap<String, ActionInfo>,
    display_names: BTreeMap<String, String>,
    global_utilities: BTreeMap<String, UtilityHandle>,
    utilities_by_uri: BTreeMap<String, UtilityHandle>,
}

impl StaticRegistry {
    pub fn from_document(document: RegistryDocument) -> Result<Self, MatrixError> {
        let mut registry = Self::default();

        for utility in document.global_utilities {
            if registry.global_utilities.contains_key(&utility.name) {
                return Err(MatrixError::new(
                    "REGISTRY_UTILITY_DUPLICATE",
                    format!("Duplicate global utility \"{}\".", utility.name),
                ));
            }
            registry
                .utilities_by_uri
                .insert(utility.uri.clone(), utility.clone());
            registry
                .global_utilities
                .insert(utility.name.clone(), utility);
        }

        for action in document.actions {
            let key = action_key(&action.uri);
            if registry.actions.contains_key(&key) {
                return Err(MatrixError::new(
                    "REGISTRY_ACTION_DUPLICATE",
                    format!("Duplicate action \"{}\".", action.uri),
                ));
            }
            let display_name = action
                .display_name
                .clone()
                .unwrap_or_else(|| default_display_name(&action.uri));
            registry.display_names.insert(key.clone(), display_name);
            for utility in &action.utilities {
                registry
                    .utilities_by_uri
                    .insert(utility.uri.clone(), utility.clone());
            }
            registry.actions.insert(key, action);
        }

        Ok(registry)
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}

fn action_key(uri: &str) -> String {
    uri.trim().to_ascii_lowercase()
}

/// `Plugin:Group.SendOrder` -> `SendOrder`
fn default_display_name(uri: &str) -> String {
    uri.rsplit([':', '.'])
        .next()
        .unwrap_or(uri)
        .trim()
        .to_string()
}

impl ActionRegistry for StaticRegistry {
    fn resolve_action(&self, uri: &str) -> Option<&ActionInfo> {
        self.actions.get(&action_key(uri))
    }

    fn display_name(&self, uri: &str) -> Option<&str> {
        self.display_names.get(&action_key(uri)).map(String::as_str)
    }
}

impl UtilityRegistry for StaticRegistry {
    fn qualified_utility(&self, uri: &str) -> Option<UtilityHandle> {
        self.utilities_by_uri.get(uri).cloned()
    }

    fn action_utility(&self, action_uri: &str, name: &str) -> Option<UtilityHandle> {
        self.resolve_action(action_uri)?
            .utilities
            .iter()
            .find(|utility| utility.name == name)
            .cloned()
    }

    fn global_utility(&self, name: &str) -> Option<UtilityHandle> {
        self.global_utilities.get(name).cloned()
    }
}
