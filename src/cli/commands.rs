//! CLI command definitions for bashloop.
//!
//! `run` drives one agent run against a container (or the host) and prints
//! how it ended; `config` prints the default configuration as YAML so it can
//! be saved and edited.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::environment::StreamingEnvironment;
use crate::llm::OpenAiModel;
use crate::scaffold::{SubmitPolicy, ToolCallingAgent};
use crate::trajectory::Trajectory;

/// Tool-calling agent that solves tasks with shell commands.
#[derive(Parser)]
#[command(name = "bashloop")]
#[command(about = "Run a tool-calling LLM agent against a shell environment")]
#[command(version)]
#[command(
    long_about = "bashloop lets a language model solve a task by calling a bash tool inside a running container.\n\nCommand output is streamed to the terminal as it is produced.\n\nExample usage:\n  bashloop run \"Fix the failing test\" --container sandbox --cwd /testbed --output run.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the agent on a task.
    Run(RunArgs),

    /// Print the default configuration as YAML.
    Config(ConfigArgs),
}

/// Arguments for `bashloop run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task text. Use --task-file to read it from a file instead.
    #[arg(conflicts_with = "task_file")]
    pub task: Option<String>,

    /// File containing the task text.
    #[arg(short = 'f', long)]
    pub task_file: Option<PathBuf>,

    /// YAML configuration file (agent, environment and model sections).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Model name, overriding the configuration file.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub base_url: Option<String>,

    /// API key (can also be set via OPENAI_API_KEY env var).
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Id or name of the running container. Commands run on the host when unset.
    #[arg(long)]
    pub container: Option<String>,

    /// Working directory for commands.
    #[arg(long)]
    pub cwd: Option<String>,

    /// Per-command timeout in seconds.
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Maximum number of model calls (0 for unlimited).
    #[arg(long)]
    pub step_limit: Option<i64>,

    /// Maximum cost in dollars (0 for unlimited).
    #[arg(long)]
    pub cost_limit: Option<f64>,

    /// Report the output of this command as the final answer (e.g. "git diff").
    #[arg(long)]
    pub submit_command: Option<String>,

    /// Write the trajectory as JSON to this path.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the run summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `bashloop config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Start from this file instead of the defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the YAML to this path instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Summary printed at the end of a run.
#[derive(Debug, Clone, Serialize)]
struct RunSummary {
    status: String,
    detail: String,
    n_calls: u64,
    cost: f64,
    trajectory: Option<String>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_run_command(args).await,
        Commands::Config(args) => run_config_command(args).await,
    }
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    let task = read_task(&args).await?;
    let config = build_run_config(&args)?;

    if config.model.api_key.is_none() {
        warn!("No API key configured; requests will be sent without authorization");
    }

    info!(
        model = %config.model.model_name,
        container = ?config.environment.container_id,
        step_limit = config.agent.step_limit,
        cost_limit = config.agent.cost_limit,
        "Starting run"
    );

    let model = OpenAiModel::new(config.model.clone()).context("failed to create model client")?;
    let env = StreamingEnvironment::new(config.environment.clone());
    let mut agent = ToolCallingAgent::new(Box::new(model), Arc::new(env), config.agent.clone());

    let outcome = agent.run(&task).await;

    let trajectory_path = match &args.output {
        Some(path) => {
            Trajectory::from_run(&agent, &outcome)
                .save(path)
                .await
                .with_context(|| format!("failed to write trajectory to {}", path.display()))?;
            Some(path.display().to_string())
        }
        None => None,
    };

    let summary = RunSummary {
        status: outcome.kind().to_string(),
        detail: outcome.detail().to_string(),
        n_calls: agent.n_calls(),
        cost: agent.cost(),
        trajectory: trajectory_path,
    };
    print_summary(&summary, args.json)?;

    Ok(())
}

async fn run_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => RunConfig::from_yaml_file(path)?,
        None => RunConfig::default(),
    };
    let yaml = config.to_yaml()?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, yaml)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote configuration");
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

async fn read_task(args: &RunArgs) -> anyhow::Result<String> {
    let task = match (&args.task, &args.task_file) {
        (Some(task), _) => task.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read task file {}", path.display()))?,
        (None, None) => anyhow::bail!("a task is required: pass it as an argument or with --task-file"),
    };

    if task.trim().is_empty() {
        anyhow::bail!("the task is empty");
    }
    Ok(task)
}

/// Load the configuration file (or defaults) and apply CLI overrides.
fn build_run_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_yaml_file(path)?,
        None => RunConfig::default(),
    };

    if let Some(model) = &args.model {
        config.model.model_name = model.clone();
    }
    if let Some(base_url) = &args.base_url {
        config.model.base_url = Some(base_url.clone());
    }
    if let Some(api_key) = &args.api_key {
        config.model.api_key = Some(api_key.clone());
    }
    config.model = config.model.with_env_fallbacks();

    if let Some(container) = &args.container {
        config.environment.container_id = Some(container.clone());
    }
    if let Some(cwd) = &args.cwd {
        config.environment.cwd = cwd.clone();
    }
    if let Some(timeout) = args.timeout {
        config.environment.timeout = timeout;
    }

    if let Some(step_limit) = args.step_limit {
        config.agent.step_limit = step_limit;
    }
    if let Some(cost_limit) = args.cost_limit {
        config.agent.cost_limit = cost_limit;
    }
    if let Some(command) = &args.submit_command {
        config.agent.submit = SubmitPolicy::Command {
            command: command.clone(),
        };
    }

    config.validate()?;
    Ok(config)
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!();
    println!("Status:  {}", summary.status);
    println!("Calls:   {}", summary.n_calls);
    println!("Cost:    ${:.4}", summary.cost);
    if let Some(path) = &summary.trajectory {
        println!("Saved:   {}", path);
    }
    println!();
    println!("{}", summary.detail);
    Ok(())
}
