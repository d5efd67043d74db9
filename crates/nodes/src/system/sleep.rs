use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::TYPE_SLEEP;
use crate::{props, ExecutionContext, HandlerError, TaskHandler, TaskNode};

/// Sleeps for a random duration in `[min, max]` milliseconds.
///
/// Stops early with [`HandlerError::Cancelled`] when the run is cancelled.
#[derive(Debug, Default)]
pub struct SleepHandler;

/// Parsed and checked `(min, max)` bounds.
fn bounds(node: &TaskNode) -> Result<(u64, u64), HandlerError> {
    let min = props::integer(node, "min")?.unwrap_or(0);
    let max = props::integer(node, "max")?
        .ok_or_else(|| HandlerError::invalid("sleep node is missing max"))?;

    if min < 0 {
        return Err(HandlerError::invalid("sleep min must not be negative"));
    }
    if max <= 0 {
        return Err(HandlerError::invalid("sleep max must be greater than 0"));
    }
    if max < min {
        return Err(HandlerError::invalid(format!(
            "sleep max ({max}) is less than min ({min})"
        )));
    }
    Ok((min as u64, max as u64))
}

#[async_trait]
impl TaskHandler for SleepHandler {
    fn node_type(&self) -> &str {
        TYPE_SLEEP
    }

    fn validate(&self, node: &TaskNode) -> Result<(), HandlerError> {
        bounds(node).map(|_| ())
    }

    async fn handle(
        &self,
        cancel: &CancellationToken,
        node: &TaskNode,
        ctx: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        let (min, max) = bounds(node)?;
        let millis = if min == max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };

        ctx.logger().info(format!("[{}] sleeping {millis}ms", node.label()));
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
            _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
        }

        Ok(json!({ "sleepTime": millis, "unit": "ms" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn node(min: Value, max: Value) -> TaskNode {
        TaskNode::new("z", "sleep")
            .with_property("min", min)
            .with_property("max", max)
    }

    #[test]
    fn validation_rules() {
        let h = SleepHandler;
        assert!(h.validate(&node(json!("0"), json!("10"))).is_ok());
        assert!(h.validate(&TaskNode::new("z", "sleep")).is_err());
        assert!(h.validate(&node(json!(-1), json!(10))).is_err());
        assert!(h.validate(&node(json!(0), json!(0))).is_err());
        assert!(h.validate(&node(json!(20), json!(10))).is_err());
        assert!(h.validate(&node(json!("x"), json!(10))).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_within_bounds() {
        let ctx = ExecutionContext::new("f", Map::new(), false);
        let out = SleepHandler
            .handle(&CancellationToken::new(), &node(json!(5), json!(15)), &ctx)
            .await
            .expect("sleep succeeds");
        let slept = out["sleepTime"].as_u64().expect("numeric");
        assert!((5..=15).contains(&slept));
        assert_eq!(out["unit"], "ms");
    }

    #[tokio::test]
    async fn cancellation_stops_the_sleep() {
        let ctx = ExecutionContext::new("f", Map::new(), false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = SleepHandler
            .handle(&cancel, &node(json!(60_000), json!(60_000)), &ctx)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, HandlerError::Cancelled));
    }
}
