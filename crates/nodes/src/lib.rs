//! `dagflow-nodes`: the `TaskHandler` contract, the per-run
//! `ExecutionContext`, expression evaluation and the built-in handlers.
//!
//! Every handler, built-in or embedder-provided, implements
//! [`TaskHandler`]. The engine crate dispatches node execution through this
//! trait object and a [`HandlerRegistry`] it receives at construction.

pub mod context;
pub mod error;
pub mod expr;
pub mod mock;
pub mod node;
pub mod props;
pub mod registry;
pub mod script;
pub mod system;
pub mod traits;

use std::sync::Arc;

pub use context::{
    Claim, ExecutionContext, ExecutionSnapshot, LogEntry, LogLevel, NodeStatus, RunLogger,
};
pub use error::{ExprError, HandlerError};
pub use expr::{is_truthy, Evaluator, JexlEvaluator};
pub use node::TaskNode;
pub use registry::HandlerRegistry;
pub use script::{ScriptConfig, ScriptHandler};
pub use traits::TaskHandler;

/// Registry with the built-in handlers: `start`, `end`, `log`, `sleep` and
/// `script`.
pub fn builtin_registry(script: ScriptConfig, evaluator: Arc<dyn Evaluator>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(system::StartHandler);
    registry.register(system::EndHandler);
    registry.register(system::LogHandler::new(Arc::clone(&evaluator)));
    registry.register(system::SleepHandler);
    registry.register(ScriptHandler::new(script, evaluator));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = builtin_registry(ScriptConfig::default(), Arc::new(JexlEvaluator));
        assert_eq!(registry.types(), vec!["end", "log", "script", "sleep", "start"]);
    }
}
