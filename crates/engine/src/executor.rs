//! Flow execution engine.
//!
//! [`Engine`] is the central orchestrator:
//! 1. Creates an [`ExecutionContext`] for the run.
//! 2. Executes the start node, then follows outgoing edges, evaluating each
//!    edge guard against the run data.
//! 3. Runs the ready successors of a node concurrently and waits for all of
//!    them before the node's own step returns (fan-out/join).
//! 4. Marks branches behind a false guard as skipped.
//! 5. Records per-node status, timing, results and errors on the context.
//!
//! A node reachable through several incoming edges runs at most once: the
//! first path to [`claim`](ExecutionContext::claim) it wins and every later
//! arrival is a no-op.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use dagflow_nodes::system::collect_result;
use dagflow_nodes::{
    builtin_registry, is_truthy, Claim, Evaluator, ExecutionContext, HandlerRegistry, JexlEvaluator,
    NodeStatus,
};

use crate::config::EngineConfig;
use crate::dag::{validate_flow, ValidationReport};
use crate::models::{Edge, Flow};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Stateless orchestrator; one instance can serve any number of concurrent
/// runs.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<HandlerRegistry>,
    evaluator: Arc<dyn Evaluator>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(registry: HandlerRegistry, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            registry: Arc::new(registry),
            evaluator,
        }
    }

    /// Engine with the built-in handlers and the JEXL evaluator.
    pub fn with_builtins(config: &EngineConfig) -> Self {
        let evaluator: Arc<dyn Evaluator> = Arc::new(JexlEvaluator);
        let registry = builtin_registry(config.script.clone(), Arc::clone(&evaluator));
        Self::new(registry, evaluator)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Registered handler type names, sorted.
    pub fn handler_types(&self) -> Vec<String> {
        self.registry.types()
    }

    pub fn validate_flow(&self, flow: &Flow) -> ValidationReport {
        validate_flow(flow, &self.registry)
    }

    /// Run `flow` from its start node.
    ///
    /// `initial_data` is recorded as the run parameters and seeds the run
    /// data. A disabled flow returns immediately with status `Skipped`.
    ///
    /// # Errors
    /// [`EngineError::Aborted`] wrapping the first fatal error; the attached
    /// context holds the state at the time of failure.
    #[instrument(skip_all, fields(flow_id = %flow.id))]
    pub async fn execute(
        &self,
        flow: &Flow,
        initial_data: Map<String, Value>,
        debug: bool,
        cancel: CancellationToken,
    ) -> Result<Arc<ExecutionContext>, EngineError> {
        let ctx = Arc::new(ExecutionContext::new(flow.id.clone(), initial_data, debug));
        self.run(flow, ctx, cancel).await
    }

    /// Run `flow` as a nested run of `parent`: the new context starts from a
    /// copy of the parent's data and links back to it.
    #[instrument(skip_all, fields(flow_id = %flow.id, parent = %parent.execution_id()))]
    pub async fn execute_sub_flow(
        &self,
        flow: &Flow,
        parent: &Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<Arc<ExecutionContext>, EngineError> {
        let ctx = Arc::new(parent.child_for(flow.id.clone()));
        self.run(flow, ctx, cancel).await
    }

    async fn run(
        &self,
        flow: &Flow,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<Arc<ExecutionContext>, EngineError> {
        if flow.disabled {
            info!(execution_id = %ctx.execution_id(), "flow '{}' is disabled, skipping", flow.name);
            ctx.finish(NodeStatus::Skipped);
            return Ok(ctx);
        }

        ctx.set_status(NodeStatus::Running);
        ctx.logger().info(format!("flow '{}' started", flow.name));

        let traversal = Traversal {
            flow: Arc::new(flow.clone()),
            registry: Arc::clone(&self.registry),
            evaluator: Arc::clone(&self.evaluator),
            ctx: Arc::clone(&ctx),
            cancel,
        };
        let outcome = traversal.execute_node(flow.start_node_id()).await;

        match outcome {
            Ok(()) => {
                record_output(flow, &ctx);
                ctx.finish(NodeStatus::Completed);
                ctx.logger().info(format!("flow '{}' completed", flow.name));
                if ctx.is_debug() {
                    log_summary(flow, &ctx);
                }
                Ok(ctx)
            }
            Err(cause) => {
                ctx.finish(NodeStatus::Failed);
                ctx.logger().error(format!("flow '{}' failed: {cause}", flow.name));
                if ctx.is_debug() {
                    log_summary(flow, &ctx);
                }
                Err(EngineError::Aborted {
                    context: ctx,
                    cause: Box::new(cause),
                })
            }
        }
    }
}

/// Compute the run output from the end node's properties, if it completed.
fn record_output(flow: &Flow, ctx: &ExecutionContext) {
    let end_id = flow.end_node_id();
    if ctx.node_status(end_id) != NodeStatus::Completed {
        return;
    }
    let Some(end) = flow.node(end_id) else {
        return;
    };
    match ctx.with_data(|data| collect_result(end, data)) {
        Ok(Some(output)) => ctx.set_output(output),
        Ok(None) => {}
        Err(e) => ctx.logger().warn(format!("run output not collected: {e}")),
    }
}

/// Per-node status, duration, result and error of a run.
fn log_summary(flow: &Flow, ctx: &ExecutionContext) {
    let statuses = ctx.node_statuses();
    info!(
        execution_id = %ctx.execution_id(),
        status = %ctx.status(),
        nodes = statuses.len(),
        "run summary for flow '{}'",
        flow.name
    );
    for (node_id, status) in statuses {
        let label = flow
            .node(&node_id)
            .map(|n| n.label().to_owned())
            .unwrap_or_else(|| node_id.clone());
        let duration_ms = ctx
            .node_started_at(&node_id)
            .zip(ctx.node_finished_at(&node_id))
            .map(|(start, end)| (end - start).num_milliseconds());
        let result = ctx.node_result(&node_id).map(|v| v.to_string());
        info!(
            execution_id = %ctx.execution_id(),
            node_id = %node_id,
            status = %status,
            duration_ms = ?duration_ms,
            result = ?result,
            error = ?ctx.node_error(&node_id),
            "  node '{label}'"
        );
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Everything one run needs, cheap to clone into parallel branch tasks.
#[derive(Clone)]
pub(crate) struct Traversal {
    pub(crate) flow: Arc<Flow>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) evaluator: Arc<dyn Evaluator>,
    pub(crate) ctx: Arc<ExecutionContext>,
    pub(crate) cancel: CancellationToken,
}

impl Traversal {
    /// Execute one node, then everything reachable from it.
    ///
    /// Returns once the node and all of its downstream work have finished.
    pub(crate) fn execute_node<'a>(
        &'a self,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            let ctx = &self.ctx;
            let status = ctx.node_status(node_id);
            if status != NodeStatus::Pending {
                debug!(node_id, %status, "node already handled, ignoring");
                return Ok(());
            }

            let node = self
                .flow
                .node(node_id)
                .ok_or_else(|| EngineError::NodeNotFound(node_id.to_owned()))?;

            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let target = if node.disabled {
                NodeStatus::Skipped
            } else {
                NodeStatus::Running
            };
            if let Claim::Taken(status) = ctx.claim(node_id, target) {
                debug!(node_id, %status, "node claimed by another path, ignoring");
                return Ok(());
            }

            if node.disabled {
                ctx.logger().info(format!("[{}] node disabled, skipping", node.label()));
                return self.execute_next_nodes(node_id).await;
            }

            ctx.logger().info(format!("[{}] node started", node.label()));

            if node_id == self.flow.end_node_id() {
                ctx.finish_node(node_id);
                ctx.logger().info(format!("[{}] end node reached", node.label()));
                return Ok(());
            }

            let handler = match self.registry.get(&node.node_type) {
                Ok(handler) => handler,
                Err(e) => {
                    ctx.fail_node(node_id, e.to_string());
                    return Err(EngineError::HandlerNotFound {
                        node_id: node_id.to_owned(),
                        node_type: node.node_type.clone(),
                    });
                }
            };

            match handler.handle(&self.cancel, node, ctx).await {
                Ok(result) => {
                    debug!(node_id, result = %result, "node result");
                    ctx.complete_node(node_id, node.result_key(), result);
                    ctx.logger().info(format!("[{}] node completed", node.label()));
                }
                Err(err) => {
                    ctx.fail_node(node_id, err.to_string());
                    ctx.logger().error(format!("[{}] node failed: {err}", node.label()));
                    if !node.tolerates_failure() {
                        return Err(EngineError::NodeFailed {
                            node_id: node_id.to_owned(),
                            source: err,
                        });
                    }
                    warn!(node_id, "failure tolerated, continuing");
                }
            }

            self.execute_next_nodes(node_id).await
        }
        .boxed()
    }

    /// Follow the outgoing edges of a finished (or skipped) node.
    fn execute_next_nodes<'a>(
        &'a self,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            if node_id == self.flow.end_node_id() {
                return Ok(());
            }

            let mut ready: Vec<&Edge> = Vec::new();
            for edge in self.flow.outgoing(node_id) {
                if edge.is_conditional() {
                    let value = self
                        .ctx
                        .with_data(|data| self.evaluator.evaluate(&edge.expression, data))
                        .map_err(|source| EngineError::Guard {
                            edge_id: edge.id.clone(),
                            source,
                        })?;
                    if !is_truthy(&value) {
                        debug!(
                            edge = edge.label(),
                            expression = %edge.expression,
                            "guard is false"
                        );
                        self.skip_target(&edge.target);
                        continue;
                    }
                }
                ready.push(edge);
            }

            match ready.as_slice() {
                [] => {
                    if self.flow.outgoing(node_id).next().is_none() {
                        warn!(node_id, "node has no outgoing edges");
                    }
                    Ok(())
                }
                [edge] => self.execute_node(&edge.target).await,
                _ => self.fan_out(&ready).await,
            }
        }
        .boxed()
    }

    /// Run every ready successor concurrently and wait for all of them.
    ///
    /// The first branch error is returned after every branch has settled;
    /// later errors are only logged.
    async fn fan_out(&self, edges: &[&Edge]) -> Result<(), EngineError> {
        let mut branches = JoinSet::new();
        for edge in edges {
            let branch = self.clone();
            let target = edge.target.clone();
            branches.spawn(async move { branch.execute_node(&target).await });
        }

        let mut first_error = None;
        while let Some(joined) = branches.join_next().await {
            let outcome = joined
                .map_err(|e| EngineError::Branch(e.to_string()))
                .and_then(|result| result);
            if let Err(e) = outcome {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    debug!(error = %e, "additional branch error discarded");
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Mark the target of a false guard as skipped.
    ///
    /// Nodes with several incoming edges are left for their other edges to
    /// decide; only a single-entry target drags its exclusive descendants
    /// down with it.
    fn skip_target(&self, target: &str) {
        if self.flow.node(target).is_none() {
            return;
        }
        if self.ctx.claim(target, NodeStatus::Skipped) != Claim::Acquired {
            return;
        }
        self.ctx.logger().info(format!("[{target}] node skipped"));
        if self.flow.incoming_count(target) == 1 {
            self.mark_skipped_branch(target);
        }
    }

    fn mark_skipped_branch(&self, from: &str) {
        for edge in self.flow.outgoing(from) {
            let next = edge.target.as_str();
            if self.flow.node(next).is_none() || self.flow.incoming_count(next) != 1 {
                continue;
            }
            if self.ctx.claim(next, NodeStatus::Skipped) == Claim::Acquired {
                self.ctx.logger().info(format!("[{next}] node skipped"));
                self.mark_skipped_branch(next);
            }
        }
    }
}
