//! Sandboxed Lua script handler.
//!
//! Every invocation gets its own interpreter with only the `table`,
//! `string`, `math` and `utf8` libraries loaded. The script sees:
//!
//! - `ctx`: a copy of the run data,
//! - one global per `scriptVars` entry (values resolved against run data),
//! - `log(level, message)` / `log(message)`: writes to the run log.
//!
//! The script runs on the blocking pool while the handler races it against
//! the node's timeout and the run's cancellation. When either fires, an
//! instruction hook raises an error inside the interpreter, so the worker
//! thread unwinds instead of spinning on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mlua::{HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, VmState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    props, Evaluator, ExecutionContext, HandlerError, LogLevel, RunLogger, TaskHandler, TaskNode,
};

pub const TYPE_SCRIPT: &str = "script";

/// Tuning knobs for the script handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Timeout used when a node does not set its own `timeout` (ms).
    pub timeout_ms: u64,
    /// Number of VM instructions between interruption checks.
    pub hook_interval: u32,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            hook_interval: 1_000,
        }
    }
}

impl ScriptConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub struct ScriptHandler {
    config: ScriptConfig,
    evaluator: Arc<dyn Evaluator>,
}

impl ScriptHandler {
    pub fn new(config: ScriptConfig, evaluator: Arc<dyn Evaluator>) -> Self {
        Self { config, evaluator }
    }

    fn timeout_for(&self, node: &TaskNode) -> Result<Duration, HandlerError> {
        Ok(props::integer(node, "timeout")?
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or_else(|| self.config.timeout()))
    }
}

fn script_err(e: mlua::Error) -> HandlerError {
    HandlerError::Script(e.to_string())
}

fn sandbox() -> Result<Lua, HandlerError> {
    Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
        LuaOptions::default(),
    )
    .map_err(script_err)
}

/// Replaces `pcall`/`xpcall` with versions that re-raise once the run has
/// been interrupted. Receives the interrupt check as its chunk argument.
const PROTECTED_CALLS: &str = r#"
local raw_pcall, raw_xpcall, interrupted = pcall, xpcall, ...
local function settle(ok, ...)
  if not ok and interrupted() then
    error("script interrupted", 0)
  end
  return ok, ...
end
pcall = function(f, ...) return settle(raw_pcall(f, ...)) end
xpcall = function(f, handler, ...) return settle(raw_xpcall(f, handler, ...)) end
"#;

/// Everything a script run needs, moved onto the worker thread.
struct ScriptJob {
    source: String,
    chunk_name: String,
    data: Map<String, Value>,
    vars: Map<String, Value>,
    logger: RunLogger,
    interrupt: Arc<AtomicBool>,
    hook_interval: u32,
}

impl ScriptJob {
    fn run(self) -> Result<Value, HandlerError> {
        let lua = sandbox()?;

        // Scripts must not be able to swallow the interrupt with `pcall`.
        let flag = Arc::clone(&self.interrupt);
        let interrupted = lua
            .create_function(move |_, ()| Ok(flag.load(Ordering::Relaxed)))
            .map_err(script_err)?;
        lua.load(PROTECTED_CALLS)
            .set_name("=protected_calls")
            .call::<()>(interrupted)
            .map_err(script_err)?;

        let interrupt = Arc::clone(&self.interrupt);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(self.hook_interval.max(1)),
            move |_lua, _debug| {
                if interrupt.load(Ordering::Relaxed) {
                    Err(mlua::Error::runtime("script interrupted"))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );

        let globals = lua.globals();
        globals
            .set("ctx", lua.to_value(&self.data).map_err(script_err)?)
            .map_err(script_err)?;
        for (name, value) in &self.vars {
            globals
                .set(name.as_str(), lua.to_value(value).map_err(script_err)?)
                .map_err(script_err)?;
        }

        let logger = self.logger;
        let prefix = self.chunk_name.clone();
        let log = lua
            .create_function(move |_, (first, second): (String, Option<String>)| {
                let (level, message) = match second {
                    Some(message) => (first.parse().unwrap_or(LogLevel::Info), message),
                    None => (LogLevel::Info, first),
                };
                logger.log(level, format!("[{prefix}] {message}"));
                Ok(())
            })
            .map_err(script_err)?;
        globals.set("log", log).map_err(script_err)?;

        let result: mlua::Value = lua
            .load(self.source.as_str())
            .set_name(self.chunk_name)
            .eval()
            .map_err(script_err)?;
        lua.from_value(result).map_err(script_err)
    }
}

#[async_trait]
impl TaskHandler for ScriptHandler {
    fn node_type(&self) -> &str {
        TYPE_SCRIPT
    }

    fn validate(&self, node: &TaskNode) -> Result<(), HandlerError> {
        let source = props::raw_str(node, "scriptText")
            .ok_or_else(|| HandlerError::invalid("script node is missing scriptText"))?;
        self.timeout_for(node)?;

        if props::flag(node, "compilable") {
            let lua = sandbox()?;
            lua.load(source)
                .into_function()
                .map_err(|e| HandlerError::invalid(format!("script does not compile: {e}")))?;
        }
        Ok(())
    }

    async fn handle(
        &self,
        cancel: &CancellationToken,
        node: &TaskNode,
        ctx: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        let source = props::raw_str(node, "scriptText")
            .ok_or_else(|| HandlerError::invalid("script node is missing scriptText"))?
            .to_owned();
        let timeout = self.timeout_for(node)?;
        let data = ctx.data();
        let vars = props::key_values(node, "scriptVars", &data, self.evaluator.as_ref())?;

        let interrupt = Arc::new(AtomicBool::new(false));
        let job = ScriptJob {
            source,
            chunk_name: node.label().to_owned(),
            data,
            vars,
            logger: ctx.logger().clone(),
            interrupt: Arc::clone(&interrupt),
            hook_interval: self.config.hook_interval,
        };
        let mut worker = tokio::task::spawn_blocking(move || job.run());

        tokio::select! {
            joined = &mut worker => joined
                .map_err(|e| HandlerError::Script(format!("script worker failed: {e}")))?,
            _ = tokio::time::sleep(timeout) => {
                interrupt.store(true, Ordering::Relaxed);
                ctx.logger().warn(format!(
                    "[{}] script timed out after {}ms",
                    node.label(),
                    timeout.as_millis()
                ));
                Err(HandlerError::Timeout(timeout))
            }
            _ = cancel.cancelled() => {
                interrupt.store(true, Ordering::Relaxed);
                Err(HandlerError::Cancelled)
            }
        }
    }
}
