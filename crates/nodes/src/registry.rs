//! Node type → handler lookup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::{HandlerError, TaskHandler};

/// Maps node type names to shared handler implementations.
///
/// Built explicitly at startup and handed to the engine; there is no global
/// registration.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its own type name. A later registration for
    /// the same type replaces the earlier one.
    pub fn register(&mut self, handler: impl TaskHandler + 'static) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn TaskHandler>) {
        let node_type = handler.node_type().to_owned();
        if self.handlers.insert(node_type.clone(), handler).is_some() {
            debug!("handler for '{node_type}' replaced");
        }
    }

    pub fn get(&self, node_type: &str) -> Result<Arc<dyn TaskHandler>, HandlerError> {
        self.handlers
            .get(node_type)
            .cloned()
            .ok_or_else(|| HandlerError::NotFound(node_type.to_owned()))
    }

    /// Every registered type name, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHandler;
    use serde_json::json;

    #[test]
    fn lookup_by_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(MockHandler::returning("alpha", json!(1)));
        registry.register(MockHandler::returning("beta", json!(2)));

        assert_eq!(registry.types(), vec!["alpha", "beta"]);
        assert_eq!(registry.get("alpha").expect("registered").node_type(), "alpha");
    }

    #[test]
    fn unknown_type_is_not_found() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.get("ghost"),
            Err(HandlerError::NotFound(t)) if t == "ghost"
        ));
    }

    #[test]
    fn last_registration_wins() {
        let first = MockHandler::returning("dup", json!("first"));
        let second = MockHandler::returning("dup", json!("second"));
        let second_calls = second.calls();

        let mut registry = HandlerRegistry::new();
        registry.register(first);
        registry.register(second);
        assert_eq!(registry.len(), 1);

        let handler = registry.get("dup").expect("registered");
        let rt = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
        let ctx = crate::ExecutionContext::new("f", Default::default(), false);
        let node = crate::TaskNode::new("n", "dup");
        let out = rt
            .block_on(handler.handle(&Default::default(), &node, &ctx))
            .expect("mock succeeds");
        assert_eq!(out, json!("second"));
        assert_eq!(second_calls.lock().len(), 1);
    }
}
