//! Engine-level error types.

use std::sync::Arc;

use dagflow_nodes::{ExecutionContext, ExprError, HandlerError};
use thiserror::Error;

/// Errors produced by the flow engine (loading, validation and execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Flow construction errors ------

    /// No node of type `start` and no explicit start node.
    #[error("flow has no start node")]
    MissingStartNode,

    /// No node of type `end` and no explicit end node.
    #[error("flow has no end node")]
    MissingEndNode,

    #[error("flow has more than one start node: {0:?}")]
    MultipleStartNodes(Vec<String>),

    #[error("flow has more than one end node: {0:?}")]
    MultipleEndNodes(Vec<String>),

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// Two or more edges share the same ID.
    #[error("duplicate edge ID: '{0}'")]
    DuplicateEdgeId(String),

    /// Bad engine configuration file or value.
    #[error("invalid engine configuration: {0}")]
    Config(String),

    // ------ Execution errors ------

    /// Traversal reached a node id that is not part of the flow.
    #[error("node not found: '{0}'")]
    NodeNotFound(String),

    /// No handler is registered for the node's type.
    #[error("no handler registered for node '{node_id}' of type '{node_type}'")]
    HandlerNotFound { node_id: String, node_type: String },

    /// A handler failed on a node that does not tolerate failure.
    #[error("node '{node_id}' failed: {source}")]
    NodeFailed {
        node_id: String,
        #[source]
        source: HandlerError,
    },

    /// An edge guard could not be evaluated.
    #[error("guard on edge '{edge_id}' could not be evaluated: {source}")]
    Guard {
        edge_id: String,
        #[source]
        source: ExprError,
    },

    /// A parallel branch task panicked or was aborted.
    #[error("branch task failed: {0}")]
    Branch(String),

    /// The run was cancelled before the next node could start.
    #[error("run cancelled")]
    Cancelled,

    /// A run ended in failure. Carries the partially-filled context so the
    /// caller can inspect what happened.
    #[error("run {} aborted: {cause}", .context.execution_id())]
    Aborted {
        context: Arc<ExecutionContext>,
        #[source]
        cause: Box<EngineError>,
    },
}

impl EngineError {
    /// The run context attached to an aborted run.
    pub fn context(&self) -> Option<&Arc<ExecutionContext>> {
        match self {
            Self::Aborted { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The error that stopped the run, unwrapping [`EngineError::Aborted`].
    pub fn root_cause(&self) -> &EngineError {
        match self {
            Self::Aborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
