use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::TYPE_LOG;
use crate::{props, Evaluator, ExecutionContext, HandlerError, LogLevel, TaskHandler, TaskNode};

/// Writes a templated message to the run log and returns the rendered text.
///
/// Properties:
/// - `logInfo` (required): message template, resolved against run data.
/// - `logLevel`: one of `debug`, `info`, `warn`, `error` (default `info`).
pub struct LogHandler {
    evaluator: Arc<dyn Evaluator>,
}

impl LogHandler {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl TaskHandler for LogHandler {
    fn node_type(&self) -> &str {
        TYPE_LOG
    }

    fn validate(&self, node: &TaskNode) -> Result<(), HandlerError> {
        if props::raw_str(node, "logInfo").is_none() {
            return Err(HandlerError::invalid("log node is missing logInfo"));
        }
        if let Some(level) = props::raw_str(node, "logLevel") {
            level.parse::<LogLevel>().map_err(HandlerError::InvalidConfig)?;
        }
        Ok(())
    }

    async fn handle(
        &self,
        _cancel: &CancellationToken,
        node: &TaskNode,
        ctx: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        let level = props::raw_str(node, "logLevel")
            .and_then(|l| l.parse().ok())
            .unwrap_or_default();
        let content = ctx.with_data(|data| {
            props::string(node, "logInfo", "", data, self.evaluator.as_ref())
        });

        ctx.log(level, format!("[{}] {}", node.label(), content));
        Ok(Value::String(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JexlEvaluator;
    use serde_json::{json, Map};

    fn handler() -> LogHandler {
        LogHandler::new(Arc::new(JexlEvaluator))
    }

    #[tokio::test]
    async fn returns_rendered_text() {
        let ctx = ExecutionContext::new("f", Map::new(), true);
        let node = TaskNode::new("A", "log").with_property("logInfo", "hello");
        let out = handler()
            .handle(&CancellationToken::new(), &node, &ctx)
            .await
            .expect("log succeeds");
        assert_eq!(out, json!("hello"));
        assert_eq!(ctx.trace().last().map(|e| e.message.clone()).as_deref(), Some("[A] hello"));
    }

    #[tokio::test]
    async fn level_is_applied() {
        let ctx = ExecutionContext::new("f", Map::new(), true);
        let node = TaskNode::new("A", "log")
            .with_property("logInfo", "disk low")
            .with_property("logLevel", "warn");
        handler()
            .handle(&CancellationToken::new(), &node, &ctx)
            .await
            .expect("log succeeds");
        assert_eq!(ctx.trace()[0].level, LogLevel::Warn);
    }

    #[test]
    fn validation() {
        let h = handler();
        assert!(h.validate(&TaskNode::new("A", "log")).is_err());
        assert!(h
            .validate(&TaskNode::new("A", "log").with_property("logInfo", "x"))
            .is_ok());
        assert!(h
            .validate(
                &TaskNode::new("A", "log")
                    .with_property("logInfo", "x")
                    .with_property("logLevel", "loud")
            )
            .is_err());
    }
}
