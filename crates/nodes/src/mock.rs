//! `MockHandler`: a test double for `TaskHandler`.
//!
//! Useful in unit and integration tests where a real handler is either
//! unavailable or irrelevant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{ExecutionContext, HandlerError, TaskHandler, TaskNode};

/// Behaviour injected into `MockHandler` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Wait, then return the value. Honors cancellation.
    Delay(Duration, Value),
    /// Fail with the given message.
    Fail(String),
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub node_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A mock handler that records every call it receives and returns a
/// programmer-specified result.
pub struct MockHandler {
    node_type: String,
    behaviour: MockBehaviour,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockHandler {
    pub fn new(node_type: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            node_type: node_type.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mock that always succeeds with the given value.
    pub fn returning(node_type: impl Into<String>, value: Value) -> Self {
        Self::new(node_type, MockBehaviour::ReturnValue(value))
    }

    /// A mock that sleeps for `delay` before succeeding.
    pub fn delayed(node_type: impl Into<String>, delay: Duration, value: Value) -> Self {
        Self::new(node_type, MockBehaviour::Delay(delay, value))
    }

    /// A mock that always fails.
    pub fn failing(node_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(node_type, MockBehaviour::Fail(msg.into()))
    }

    /// Shared handle to the call log; stays valid after the mock is moved
    /// into a registry.
    pub fn calls(&self) -> Arc<Mutex<Vec<MockCall>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl TaskHandler for MockHandler {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn validate(&self, _node: &TaskNode) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn handle(
        &self,
        cancel: &CancellationToken,
        node: &TaskNode,
        _ctx: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        let started_at = Utc::now();
        let outcome = match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::Delay(delay, v) => {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => Ok(v.clone()),
                    _ = cancel.cancelled() => Err(HandlerError::Cancelled),
                }
            }
            MockBehaviour::Fail(msg) => Err(HandlerError::Failed(msg.clone())),
        };
        self.calls.lock().push(MockCall {
            node_id: node.id.clone(),
            started_at,
            finished_at: Utc::now(),
        });
        outcome
    }
}
