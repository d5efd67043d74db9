use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{TYPE_END, TYPE_START};
use crate::{props, ExecutionContext, HandlerError, TaskHandler, TaskNode};

/// Entry point of every flow. Does nothing.
#[derive(Debug, Default)]
pub struct StartHandler;

#[async_trait]
impl TaskHandler for StartHandler {
    fn node_type(&self) -> &str {
        TYPE_START
    }

    fn validate(&self, _node: &TaskNode) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn handle(
        &self,
        _cancel: &CancellationToken,
        _node: &TaskNode,
        _ctx: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        Ok(Value::Null)
    }
}

/// Exit point of every flow.
///
/// The engine completes the end node itself; this handler exists so the
/// node validates and so the run output can be computed from its
/// `returnResult` / `resultType` / `resultKeys` properties.
#[derive(Debug, Default)]
pub struct EndHandler;

/// Run output described by an end node, or `None` when the node does not
/// ask for one.
pub fn collect_result(
    node: &TaskNode,
    data: &Map<String, Value>,
) -> Result<Option<Value>, HandlerError> {
    if !props::flag(node, "returnResult") {
        return Ok(None);
    }
    match props::raw_str(node, "resultType") {
        Some("specified") => {
            let keys = props::string_list(node, "resultKeys")
                .ok_or_else(|| HandlerError::invalid("end node is missing resultKeys"))?;
            let picked: Map<String, Value> = keys
                .into_iter()
                .filter_map(|k| data.get(&k).cloned().map(|v| (k, v)))
                .collect();
            Ok(Some(Value::Object(picked)))
        }
        _ => Ok(Some(Value::Object(data.clone()))),
    }
}

#[async_trait]
impl TaskHandler for EndHandler {
    fn node_type(&self) -> &str {
        TYPE_END
    }

    fn validate(&self, node: &TaskNode) -> Result<(), HandlerError> {
        if !props::flag(node, "returnResult") {
            return Ok(());
        }
        match props::raw_str(node, "resultType") {
            None => Err(HandlerError::invalid("end node is missing resultType")),
            Some("specified") if props::string_list(node, "resultKeys").is_none() => {
                Err(HandlerError::invalid("end node is missing resultKeys"))
            }
            Some("all") | Some("specified") => Ok(()),
            Some(other) => Err(HandlerError::invalid(format!("unknown resultType '{other}'"))),
        }
    }

    async fn handle(
        &self,
        _cancel: &CancellationToken,
        node: &TaskNode,
        ctx: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        let data = ctx.data();
        Ok(collect_result(node, &data)?.unwrap_or(Value::Null))
    }
}
