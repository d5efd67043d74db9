//! The task node definition shared by handlers and the engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single typed unit of work in a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    /// Unique identifier within the flow (referenced by edges).
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Handler discriminator, matched against `TaskHandler::node_type`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Key under which the node's result is stored in the run data.
    /// Empty means "use the node id".
    #[serde(default)]
    pub result_name: String,
    /// Non-empty marks the node as failure tolerant.
    #[serde(default)]
    pub exception_handle: String,
    #[serde(default)]
    pub disabled: bool,
    /// Type-specific configuration, decoded only by the matching handler.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl TaskNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    /// Builder-style property setter, mostly used by tests and fixtures.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_exception_handle(mut self, policy: impl Into<String>) -> Self {
        self.exception_handle = policy.into();
        self
    }

    pub fn with_result_name(mut self, name: impl Into<String>) -> Self {
        self.result_name = name.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn result_key(&self) -> &str {
        if self.result_name.is_empty() {
            &self.id
        } else {
            &self.result_name
        }
    }

    pub fn tolerates_failure(&self) -> bool {
        !self.exception_handle.is_empty()
    }

    /// Name for log lines; falls back to the id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}
