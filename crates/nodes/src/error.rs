//! Handler-level error types.

use std::time::Duration;

use thiserror::Error;

/// Failure to compile or evaluate an expression.
#[derive(Debug, Error, Clone)]
#[error("expression '{expression}' failed: {message}")]
pub struct ExprError {
    /// The expression text as written in the flow.
    pub expression: String,
    pub message: String,
}

impl ExprError {
    pub fn new(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by a handler's `handle` / `validate` methods, and by
/// registry lookups.
///
/// The engine records the message on the failing node; whether the run
/// continues depends on the node's exception-handle marker, never on the
/// variant.
#[derive(Debug, Error, Clone)]
pub enum HandlerError {
    /// No handler is registered for the node type.
    #[error("handler not found for node type '{0}'")]
    NotFound(String),

    /// The node's properties are missing or malformed.
    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),

    /// The handler ran and reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The handler's own time budget elapsed.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The run's cancellation signal fired while the handler was waiting.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Expression(#[from] ExprError),

    /// The script interpreter raised an error.
    #[error("script error: {0}")]
    Script(String),
}

impl HandlerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
