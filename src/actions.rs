//! Dynamic palette actions contributed by extensions at runtime.
//!
//! Every id that reaches the palette is namespaced `"{extension_id}.{action_id}"`.
//! All registration goes through [`namespace_actions`] and an [`ActionSink`];
//! nothing inserts into the palette directly.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicAction {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Remaining display fields, passed through to the palette untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DynamicAction {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            subtitle: None,
            icon: None,
            keywords: Vec::new(),
            mode: None,
            extra: Map::new(),
        }
    }
}

/// `"{extension_id}.{action_id}"`, leaving already-prefixed ids alone.
pub fn namespaced_id(extension_id: &str, action_id: &str) -> String {
    let prefix = format!("{}.", extension_id);
    if action_id.starts_with(&prefix) {
        action_id.to_string()
    } else {
        format!("{}{}", prefix, action_id)
    }
}

pub fn namespace_actions(extension_id: &str, actions: Vec<DynamicAction>) -> Vec<DynamicAction> {
    actions
        .into_iter()
        .map(|mut action| {
            action.id = namespaced_id(extension_id, &action.id);
            action
        })
        .collect()
}

/// Receiver for namespaced action registrations (the palette's action set).
pub trait ActionSink: Send + Sync {
    fn register(&self, extension_id: &str, actions: Vec<DynamicAction>);
    fn unregister(&self, extension_id: &str, action_ids: &[String]);
}

/// In-memory palette action set keyed by namespaced id.
#[derive(Default)]
pub struct ActionRegistry {
    actions: Mutex<BTreeMap<String, (String, DynamicAction)>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<DynamicAction> {
        self.lock().get(id).map(|(_, action)| action.clone())
    }

    pub fn list(&self) -> Vec<DynamicAction> {
        self.lock().values().map(|(_, action)| action.clone()).collect()
    }

    pub fn owned_by(&self, extension_id: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, (owner, _))| owner == extension_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, (String, DynamicAction)>> {
        self.actions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ActionSink for ActionRegistry {
    fn register(&self, extension_id: &str, actions: Vec<DynamicAction>) {
        let mut map = self.lock();
        for action in actions {
            if let Some((owner, _)) = map.get(&action.id) {
                if owner != extension_id {
                    log::warn!(
                        "Action '{}' from '{}' replaces one owned by '{}'",
                        action.id,
                        extension_id,
                        owner
                    );
                }
            }
            map.insert(action.id.clone(), (extension_id.to_string(), action));
        }
    }

    fn unregister(&self, extension_id: &str, action_ids: &[String]) {
        let mut map = self.lock();
        for id in action_ids {
            match map.get(id) {
                Some((owner, _)) if owner == extension_id => {
                    map.remove(id);
                }
                Some(_) => log::warn!(
                    "Extension '{}' tried to unregister foreign action '{}'",
                    extension_id,
                    id
                ),
                None => {}
            }
        }
    }
}
