//! `mop` command-line runner.
//!
//! Loads a procedure document, runs it against local devices through a
//! shell transport and reports the outcome.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use mop_engine::procedure::load_procedure;
use mop_engine::{
    EngineConfig, EngineError, Execution, ExecutionStatus, Interpreter, TracingRecorder, ValueMap,
};
use mop_tools::{
    create_default_registry, HandlerRegistry, LocalShellTransport, SandboxConfig, TracingRelay,
};

#[derive(Parser)]
#[command(name = "mop")]
#[command(version, about = "Method of Procedure runner", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a procedure document
    Run {
        /// Path to a YAML or JSON procedure
        file: PathBuf,

        /// Override a procedure variable (value parsed as JSON, else string)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
        output: OutputFormat,
    },

    /// Validate a procedure document without running it
    Validate {
        /// Path to a YAML or JSON procedure
        file: PathBuf,
    },

    /// List the available step types and their parameters
    Handlers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Summary,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Run { file, vars, output } => run(&file, &vars, output).await,
        Commands::Validate { file } => validate(&file),
        Commands::Handlers => {
            let registry = default_registry()?;
            println!("{}", serde_json::to_string_pretty(&registry.describe())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,mop_engine=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so `--output json` stays parseable.
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn default_registry() -> Result<HandlerRegistry> {
    create_default_registry(
        Arc::new(LocalShellTransport::new()),
        Arc::new(TracingRelay),
        SandboxConfig::default(),
    )
    .context("Failed to build handler registry")
}

async fn run(file: &Path, vars: &[String], output: OutputFormat) -> Result<ExitCode> {
    let graph = load_procedure(file)
        .with_context(|| format!("Failed to load procedure {}", file.display()))?;
    let overrides = parse_vars(vars)?;

    let config = EngineConfig::from_env().context("Failed to load engine configuration")?;
    tracing::debug!(
        max_step_visits = config.max_step_visits,
        step_timeout_secs = config.step_timeout_secs,
        max_parallel_devices = config.max_parallel_devices,
        "Engine configuration loaded"
    );

    let registry = default_registry()?;
    graph
        .check_handlers(&registry)
        .with_context(|| format!("Procedure {} cannot run", file.display()))?;

    let interpreter = Interpreter::new(Arc::new(registry))
        .with_config(config)
        .with_recorder(Arc::new(TracingRecorder));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping at the next step boundary");
                cancel.cancel();
            }
        })
    };

    let execution = interpreter
        .execute(Uuid::new_v4(), &graph, overrides, cancel)
        .await;
    interrupt.abort();

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&execution)?),
        OutputFormat::Summary => print!("{}", summary(&execution)),
    }

    Ok(exit_code(execution.status))
}

fn validate(file: &Path) -> Result<ExitCode> {
    let graph = match load_procedure(file) {
        Ok(graph) => graph,
        Err(EngineError::Validation(err)) => {
            print_violations(file, &err.violations);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load procedure {}", file.display()))
        }
    };

    let registry = default_registry()?;
    if let Err(err) = graph.check_handlers(&registry) {
        print_violations(file, &err.violations);
        return Ok(ExitCode::FAILURE);
    }

    println!(
        "{}: procedure '{}' is valid ({} steps)",
        file.display(),
        graph.name(),
        graph.step_ids().len()
    );
    Ok(ExitCode::SUCCESS)
}

fn print_violations(file: &Path, violations: &[mop_engine::Violation]) {
    eprintln!("{}: {} problem(s) found", file.display(), violations.len());
    for violation in violations {
        eprintln!("  - {}", violation);
    }
}

/// Parse `KEY=VALUE` overrides. Values that are valid JSON keep their type.
fn parse_vars(vars: &[String]) -> Result<ValueMap> {
    let mut overrides = ValueMap::new();
    for var in vars {
        let Some((key, raw)) = var.split_once('=') else {
            bail!("Invalid variable '{}', expected KEY=VALUE", var);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid variable '{}', key is empty", var);
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}

fn summary(execution: &Execution) -> String {
    let mut out = format!(
        "Procedure: {}\nExecution: {}\n",
        execution.procedure, execution.execution_id
    );
    for record in &execution.log {
        out.push_str(&format!(
            "  {:<24} {:<16} {:<8} {}\n",
            record.step_id,
            record.device.as_deref().unwrap_or("-"),
            record.result.status,
            record.result.message
        ));
    }
    if let Some(error) = &execution.error {
        out.push_str(&format!("Error: {}\n", error));
    }
    out.push_str(&format!("Status: {}", execution.status));
    if let Some(ms) = execution.duration_ms() {
        out.push_str(&format!(" ({} ms)", ms));
    }
    out.push('\n');
    out
}

fn exit_code(status: ExecutionStatus) -> ExitCode {
    if status == ExecutionStatus::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
