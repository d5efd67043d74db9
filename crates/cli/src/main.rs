//! `dagflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`     : execute a flow JSON file and print the run snapshot.
//! - `validate`: validate a flow JSON file against the built-in handlers.
//! - `handlers`: list the registered handler types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dagflow_engine::{Engine, EngineConfig, Flow};

#[derive(Parser)]
#[command(name = "dagflow", about = "DAG workflow execution engine", version)]
struct Cli {
    /// Engine configuration file (TOML).
    #[arg(long, global = true, env = "DAGFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a flow and print the resulting execution snapshot.
    Run {
        /// Path to the flow JSON file.
        path: PathBuf,
        /// Initial run data as a JSON object.
        #[arg(long, conflicts_with = "data_file")]
        data: Option<String>,
        /// File holding the initial run data as a JSON object.
        #[arg(long)]
        data_file: Option<PathBuf>,
        /// Capture the run log and print a per-node summary.
        #[arg(long)]
        debug: bool,
    },
    /// Validate a flow definition JSON file.
    Validate {
        /// Path to the flow JSON file.
        path: PathBuf,
    },
    /// List registered handler types.
    Handlers,
}

fn load_flow(path: &Path) -> Result<Flow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid flow definition in {}", path.display()))
}

fn parse_data(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(text).context("initial data is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("initial data must be a JSON object, got {other}"),
    }
}

/// How long blocking script workers get to unwind once the command is done.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("dagflow=info,dagflow_engine=info,dagflow_nodes=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start the async runtime")?;
    let outcome = runtime.block_on(dispatch(cli));
    // Dropping the runtime would wait on every blocking task; bound the wait.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    outcome
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let engine = Engine::with_builtins(&config);

    match cli.command {
        Command::Run {
            path,
            data,
            data_file,
            debug,
        } => {
            let flow = load_flow(&path)?;
            let initial = match (data, data_file) {
                (Some(text), _) => parse_data(&text)?,
                (None, Some(file)) => parse_data(
                    &std::fs::read_to_string(&file)
                        .with_context(|| format!("cannot read file {}", file.display()))?,
                )?,
                (None, None) => Map::new(),
            };

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling run");
                    on_signal.cancel();
                }
            });

            info!("running flow '{}' from {}", flow.name, path.display());
            match engine.execute(&flow, initial, debug, cancel).await {
                Ok(ctx) => {
                    println!("{}", serde_json::to_string_pretty(&ctx.snapshot())?);
                }
                Err(err) => {
                    if let Some(ctx) = err.context() {
                        println!("{}", serde_json::to_string_pretty(&ctx.snapshot())?);
                    }
                    return Err(err.into());
                }
            }
        }
        Command::Validate { path } => {
            let flow = load_flow(&path)?;
            let report = engine.validate_flow(&flow);
            if report.valid {
                println!("✅ Flow '{}' is valid.", flow.name);
            } else {
                eprintln!("❌ Validation failed:");
                for error in &report.errors {
                    eprintln!("  - {error}");
                }
                bail!("flow '{}' has {} validation error(s)", flow.name, report.errors.len());
            }
        }
        Command::Handlers => {
            for node_type in engine.handler_types() {
                println!("{node_type}");
            }
        }
    }

    Ok(())
}
