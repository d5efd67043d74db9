//! Per-run mutable state shared by the engine and every handler.
//!
//! One [`ExecutionContext`] exists per run (and per nested sub-run). Parallel
//! branches hold it behind an `Arc`, so every map is guarded:
//!
//! - run data (`Data`) sits behind an `RwLock`, since guards and handlers
//!   read it far more often than results are written;
//! - per-node bookkeeping (status, timing, results, errors) sits behind a
//!   single `Mutex` so that "check status, then mark" is one atomic step.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NodeStatus
// ---------------------------------------------------------------------------

/// Execution status of a node, and of the run as a whole.
///
/// `Pending → Running → {Completed, Failed, Skipped}`; a disabled node or a
/// node behind a false guard goes straight from `Pending` to `Skipped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for NodeStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "skipped"   => Ok(Self::Skipped),
            other       => Err(format!("unknown node status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info"  => Ok(Self::Info),
            "warn"  => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other   => Err(format!("unknown log level: {other}")),
        }
    }
}

/// One captured log line (debug runs only).
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Cloneable logging sink bound to one run.
///
/// Every message is emitted as a `tracing` event tagged with the execution
/// id. In debug runs messages are also kept so callers can inspect them next
/// to the per-node audit trail.
#[derive(Debug, Clone)]
pub struct RunLogger {
    execution_id: Arc<str>,
    trace: Option<Arc<Mutex<Vec<LogEntry>>>>,
}

impl RunLogger {
    pub fn new(execution_id: &str, capture: bool) -> Self {
        Self {
            execution_id: Arc::from(execution_id),
            trace: capture.then(|| Arc::new(Mutex::new(Vec::new()))),
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let execution_id = &*self.execution_id;
        match level {
            LogLevel::Debug => tracing::debug!(execution_id, "{message}"),
            LogLevel::Info => tracing::info!(execution_id, "{message}"),
            LogLevel::Warn => tracing::warn!(execution_id, "{message}"),
            LogLevel::Error => tracing::error!(execution_id, "{message}"),
        }
        if let Some(trace) = &self.trace {
            trace.lock().push(LogEntry {
                timestamp: Utc::now(),
                level,
                message,
            });
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    fn entries(&self) -> Vec<LogEntry> {
        self.trace
            .as_ref()
            .map(|t| t.lock().clone())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Result of [`ExecutionContext::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The node moved from `Pending` to the requested status.
    Acquired,
    /// Another path already owns the node; carries its current status.
    Taken(NodeStatus),
}

#[derive(Debug, Default)]
struct NodeLedger {
    status: HashMap<String, NodeStatus>,
    started: HashMap<String, DateTime<Utc>>,
    finished: HashMap<String, DateTime<Utc>>,
    results: HashMap<String, Value>,
    errors: HashMap<String, String>,
}

#[derive(Debug)]
struct RunState {
    status: NodeStatus,
    end_time: Option<DateTime<Utc>>,
    output: Option<Value>,
}

/// Mutable state of one flow run.
#[derive(Debug)]
pub struct ExecutionContext {
    flow_id: String,
    execution_id: String,
    start_time: DateTime<Utc>,
    params: Map<String, Value>,
    debug: bool,
    parent: Option<Arc<ExecutionContext>>,
    data: RwLock<Map<String, Value>>,
    nodes: Mutex<NodeLedger>,
    run: Mutex<RunState>,
    logger: RunLogger,
}

impl ExecutionContext {
    /// Create a fresh context. `params` are recorded as the initiating
    /// parameters and also seed the run data.
    pub fn new(flow_id: impl Into<String>, params: Map<String, Value>, debug: bool) -> Self {
        let execution_id = Uuid::new_v4().to_string();
        let logger = RunLogger::new(&execution_id, debug);
        Self {
            flow_id: flow_id.into(),
            execution_id,
            start_time: Utc::now(),
            data: RwLock::new(params.clone()),
            params,
            debug,
            parent: None,
            nodes: Mutex::new(NodeLedger::default()),
            run: Mutex::new(RunState {
                status: NodeStatus::Pending,
                end_time: None,
                output: None,
            }),
            logger,
        }
    }

    /// Fresh context for a nested run of the same flow: copies the current
    /// data, starts with empty per-node state and links back to `self`.
    pub fn child(self: &Arc<Self>) -> Self {
        self.child_for(self.flow_id.clone())
    }

    /// Like [`child`](Self::child), for a nested run of another flow.
    pub fn child_for(self: &Arc<Self>, flow_id: impl Into<String>) -> Self {
        let mut child = Self::new(flow_id, self.data(), self.debug);
        child.parent = Some(Arc::clone(self));
        child
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn parent(&self) -> Option<&Arc<ExecutionContext>> {
        self.parent.as_ref()
    }

    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.logger.log(level, message);
    }

    // ---- run data --------------------------------------------------------

    /// Copy of the whole data map.
    pub fn data(&self) -> Map<String, Value> {
        self.data.read().clone()
    }

    /// Run `f` against the data map without copying it.
    pub fn with_data<R>(&self, f: impl FnOnce(&Map<String, Value>) -> R) -> R {
        f(&self.data.read())
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.data.write().insert(key.into(), value);
    }

    // ---- per-node state --------------------------------------------------

    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.nodes
            .lock()
            .status
            .get(node_id)
            .copied()
            .unwrap_or_default()
    }

    /// Atomically move a `Pending` node to `to` (`Running` or `Skipped`).
    ///
    /// A node that is already running or terminal is left untouched, which
    /// is what makes re-entry through several incoming edges a no-op.
    pub fn claim(&self, node_id: &str, to: NodeStatus) -> Claim {
        let mut ledger = self.nodes.lock();
        match ledger.status.get(node_id).copied().unwrap_or_default() {
            NodeStatus::Pending => {
                ledger.status.insert(node_id.to_owned(), to);
                if to == NodeStatus::Running {
                    ledger.started.insert(node_id.to_owned(), Utc::now());
                }
                Claim::Acquired
            }
            other => Claim::Taken(other),
        }
    }

    /// Store a successful result under `result_key` in the data and under
    /// the node id in the result map, and mark the node `Completed`.
    pub fn complete_node(&self, node_id: &str, result_key: &str, result: Value) {
        self.set_data(result_key, result.clone());
        let mut ledger = self.nodes.lock();
        ledger.results.insert(node_id.to_owned(), result);
        ledger.status.insert(node_id.to_owned(), NodeStatus::Completed);
        ledger.finished.insert(node_id.to_owned(), Utc::now());
    }

    /// Mark a node `Completed` without storing any result.
    pub fn finish_node(&self, node_id: &str) {
        let mut ledger = self.nodes.lock();
        ledger.status.insert(node_id.to_owned(), NodeStatus::Completed);
        ledger.finished.insert(node_id.to_owned(), Utc::now());
    }

    pub fn fail_node(&self, node_id: &str, message: impl Into<String>) {
        let mut ledger = self.nodes.lock();
        ledger.errors.insert(node_id.to_owned(), message.into());
        ledger.status.insert(node_id.to_owned(), NodeStatus::Failed);
        ledger.finished.insert(node_id.to_owned(), Utc::now());
    }

    pub fn node_result(&self, node_id: &str) -> Option<Value> {
        self.nodes.lock().results.get(node_id).cloned()
    }

    pub fn node_error(&self, node_id: &str) -> Option<String> {
        self.nodes.lock().errors.get(node_id).cloned()
    }

    pub fn node_started_at(&self, node_id: &str) -> Option<DateTime<Utc>> {
        self.nodes.lock().started.get(node_id).copied()
    }

    pub fn node_finished_at(&self, node_id: &str) -> Option<DateTime<Utc>> {
        self.nodes.lock().finished.get(node_id).copied()
    }

    pub fn node_statuses(&self) -> BTreeMap<String, NodeStatus> {
        self.nodes
            .lock()
            .status
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    // ---- run state -------------------------------------------------------

    pub fn status(&self) -> NodeStatus {
        self.run.lock().status
    }

    pub fn set_status(&self, status: NodeStatus) {
        self.run.lock().status = status;
    }

    /// Record the final run status and the end time.
    pub fn finish(&self, status: NodeStatus) {
        let mut run = self.run.lock();
        run.status = status;
        run.end_time = Some(Utc::now());
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.run.lock().end_time
    }

    pub fn output(&self) -> Option<Value> {
        self.run.lock().output.clone()
    }

    pub fn set_output(&self, output: Value) {
        self.run.lock().output = Some(output);
    }

    pub fn trace(&self) -> Vec<LogEntry> {
        self.logger.entries()
    }

    /// Serializable point-in-time copy of the whole context.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        let (status, end_time, output) = {
            let run = self.run.lock();
            (run.status, run.end_time, run.output.clone())
        };
        let ledger = self.nodes.lock();
        ExecutionSnapshot {
            flow_id: self.flow_id.clone(),
            execution_id: self.execution_id.clone(),
            parent_execution_id: self.parent.as_ref().map(|p| p.execution_id.clone()),
            start_time: self.start_time,
            end_time,
            status,
            params: self.params.clone(),
            data: self.data(),
            node_status: sorted(&ledger.status),
            node_start_times: sorted(&ledger.started),
            node_end_times: sorted(&ledger.finished),
            node_results: sorted(&ledger.results),
            node_errors: sorted(&ledger.errors),
            debug: self.debug,
            output,
            trace: self.trace(),
        }
    }
}

fn sorted<V: Clone>(map: &HashMap<String, V>) -> BTreeMap<String, V> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Wire shape of an [`ExecutionContext`], as returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub flow_id: String,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: NodeStatus,
    pub params: Map<String, Value>,
    pub data: Map<String, Value>,
    pub node_status: BTreeMap<String, NodeStatus>,
    pub node_start_times: BTreeMap<String, DateTime<Utc>>,
    pub node_end_times: BTreeMap<String, DateTime<Utc>>,
    pub node_results: BTreeMap<String, Value>,
    pub node_errors: BTreeMap<String, String>,
    pub debug: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<LogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn new_context_is_pending_and_seeded_with_params() {
        let ctx = ExecutionContext::new("flow-1", params(json!({ "x": 1 })), false);
        assert_eq!(ctx.status(), NodeStatus::Pending);
        assert_eq!(ctx.get_data("x"), Some(json!(1)));
        assert_eq!(ctx.params()["x"], json!(1));
        assert!(ctx.node_statuses().is_empty());
        assert!(ctx.end_time().is_none());
    }

    #[test]
    fn claim_only_succeeds_from_pending() {
        let ctx = ExecutionContext::new("f", Map::new(), false);
        assert_eq!(ctx.claim("a", NodeStatus::Running), Claim::Acquired);
        assert_eq!(ctx.claim("a", NodeStatus::Running), Claim::Taken(NodeStatus::Running));
        assert!(ctx.node_started_at("a").is_some());

        ctx.complete_node("a", "a", json!("done"));
        assert_eq!(ctx.claim("a", NodeStatus::Skipped), Claim::Taken(NodeStatus::Completed));
        assert_eq!(ctx.node_status("a"), NodeStatus::Completed);

        assert_eq!(ctx.claim("b", NodeStatus::Skipped), Claim::Acquired);
        assert_eq!(ctx.claim("b", NodeStatus::Running), Claim::Taken(NodeStatus::Skipped));
    }

    #[test]
    fn complete_writes_data_and_results() {
        let ctx = ExecutionContext::new("f", Map::new(), false);
        ctx.claim("n", NodeStatus::Running);
        ctx.complete_node("n", "greeting", json!("hi"));
        assert_eq!(ctx.get_data("greeting"), Some(json!("hi")));
        assert_eq!(ctx.node_result("n"), Some(json!("hi")));
        assert!(ctx.node_finished_at("n").is_some());
    }

    #[test]
    fn fail_records_message() {
        let ctx = ExecutionContext::new("f", Map::new(), false);
        ctx.claim("n", NodeStatus::Running);
        ctx.fail_node("n", "boom");
        assert_eq!(ctx.node_status("n"), NodeStatus::Failed);
        assert_eq!(ctx.node_error("n").as_deref(), Some("boom"));
    }

    #[test]
    fn child_copies_data_and_links_parent() {
        let parent = Arc::new(ExecutionContext::new("f", Map::new(), true));
        parent.set_data("k", json!("v"));
        parent.claim("n", NodeStatus::Running);

        let child = parent.child();
        assert_eq!(child.get_data("k"), Some(json!("v")));
        assert!(child.node_statuses().is_empty());
        assert!(child.is_debug());
        assert_ne!(child.execution_id(), parent.execution_id());
        assert_eq!(
            child.parent().map(|p| p.execution_id().to_owned()),
            Some(parent.execution_id().to_owned())
        );

        child.set_data("k", json!("changed"));
        assert_eq!(parent.get_data("k"), Some(json!("v")));
    }

    #[test]
    fn debug_runs_capture_the_trace() {
        let ctx = ExecutionContext::new("f", Map::new(), true);
        ctx.log(LogLevel::Warn, "careful");
        let trace = ctx.trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].level, LogLevel::Warn);

        let quiet = ExecutionContext::new("f", Map::new(), false);
        quiet.log(LogLevel::Info, "dropped");
        assert!(quiet.trace().is_empty());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let ctx = ExecutionContext::new("f", Map::new(), false);
        ctx.claim("n", NodeStatus::Running);
        ctx.complete_node("n", "n", json!(3));
        ctx.finish(NodeStatus::Completed);

        let json = serde_json::to_value(ctx.snapshot()).expect("serializable");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["nodeStatus"]["n"], "completed");
        assert_eq!(json["nodeResults"]["n"], 3);
        assert!(json.get("trace").is_none());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in ["pending", "running", "completed", "failed", "skipped"] {
            let parsed: NodeStatus = s.parse().expect("known status");
            assert_eq!(parsed.to_string(), s);
        }
        assert!("done".parse::<NodeStatus>().is_err());
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
    }
}
