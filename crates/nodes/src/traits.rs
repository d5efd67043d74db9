//! The `TaskHandler` trait: the contract every node type must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{ExecutionContext, HandlerError, TaskNode};

/// Behaviour behind one node type.
///
/// Handlers are registered once at startup and shared by every run, so they
/// must not keep per-run state of their own; everything run-specific lives
/// in the [`ExecutionContext`].
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Discriminator matched against [`TaskNode::node_type`].
    fn node_type(&self) -> &str;

    /// Static, side-effect-free check of the node's properties.
    fn validate(&self, node: &TaskNode) -> Result<(), HandlerError>;

    /// Perform the node's work.
    ///
    /// The returned value is stored under the node's result key. Handlers
    /// that wait should also watch `cancel`; the engine never interrupts a
    /// handler on its own.
    async fn handle(
        &self,
        cancel: &CancellationToken,
        node: &TaskNode,
        ctx: &ExecutionContext,
    ) -> Result<Value, HandlerError>;
}
