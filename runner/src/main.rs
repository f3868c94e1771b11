//! Robot task execution runner.
//!
//! Loads `robot-runner.toml` and a robot definition (`robot.toml`), runs one
//! execution through the phase pipeline, and records it under the state dir.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use robot_runner::context::RunContext;
use robot_runner::core::types::{ExecStatus, Message, TriggerInput, TriggerKind};
use robot_runner::exit_codes;
use robot_runner::io::assistant::{CommandAssistant, CommandAssistantConfig};
use robot_runner::io::config::{CONFIG_FILE, RunnerConfig, load_config, write_config};
use robot_runner::io::delivery::DeliveryCenter;
use robot_runner::io::execution_log::write_execution;
use robot_runner::io::robot_store::{ROBOT_FILE, load_robot, sample_robot, write_robot};
use robot_runner::io::tools::{
    CommandProcessRunner, CommandToolCaller, ToolCaller, UnconfiguredToolCaller,
};
use robot_runner::logging;
use robot_runner::pipeline::Pipeline;
use robot_runner::robot::QuotaExceededError;
use robot_runner::task_runner::Backends;
use serde_json::Value;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "robot-runner",
    version,
    about = "Run robot agents through the phase pipeline"
)]
struct Cli {
    /// Runner config file.
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,
    /// Robot definition file.
    #[arg(long, global = true, default_value = ROBOT_FILE)]
    robot: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config and a sample robot if missing.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Load and validate the config and the robot.
    Check,
    /// Run one execution and print it as JSON.
    Run {
        #[arg(long, value_enum)]
        trigger: TriggerArg,
        /// Request text for human triggers.
        #[arg(long)]
        message: Option<String>,
        /// Event type for event triggers.
        #[arg(long)]
        event_type: Option<String>,
        /// Event payload (JSON) for event triggers.
        #[arg(long)]
        data: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TriggerArg {
    Clock,
    Human,
    Event,
}

impl From<TriggerArg> for TriggerKind {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Clock => TriggerKind::Clock,
            TriggerArg::Human => TriggerKind::Human,
            TriggerArg::Event => TriggerKind::Event,
        }
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            if err.downcast_ref::<QuotaExceededError>().is_some() {
                exit_codes::QUOTA_EXCEEDED
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, &cli.robot, force),
        Command::Check => cmd_check(&cli.config, &cli.robot),
        Command::Run {
            trigger,
            message,
            event_type,
            data,
        } => {
            let trigger = TriggerKind::from(trigger);
            let input = trigger_input(trigger, message, event_type, data.as_deref())?;
            cmd_run(&cli.config, &cli.robot, trigger, input)
        }
    }
}

fn cmd_init(config_path: &Path, robot_path: &Path, force: bool) -> Result<i32> {
    if force || !config_path.exists() {
        write_config(config_path, &RunnerConfig::default())?;
    }
    if force || !robot_path.exists() {
        write_robot(robot_path, &sample_robot())?;
    }
    Ok(exit_codes::OK)
}

fn cmd_check(config_path: &Path, robot_path: &Path) -> Result<i32> {
    load_config(config_path)?;
    load_robot(robot_path)?;
    Ok(exit_codes::OK)
}

fn cmd_run(
    config_path: &Path,
    robot_path: &Path,
    trigger: TriggerKind,
    input: Option<TriggerInput>,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let robot = load_robot(robot_path)?;

    let pipeline = Pipeline::new(
        backends(&config),
        DeliveryCenter::with_default_channels(
            config.process.limits().timeout,
            config.process.output_limit_bytes,
        ),
        config.run.clone(),
    );
    let exec = pipeline.execute(&RunContext::new(), Some(&robot), trigger, input)?;

    let paths = write_execution(&config.state_dir, &exec, robot_path)?;
    info!(path = %paths.execution_path.display(), "execution recorded");
    println!(
        "{}",
        serde_json::to_string_pretty(&exec).context("serialize execution")?
    );
    Ok(match exec.status {
        ExecStatus::Completed => exit_codes::OK,
        _ => exit_codes::FAILED,
    })
}

fn backends(config: &RunnerConfig) -> Backends {
    let tools: Arc<dyn ToolCaller> = if config.tools.command.is_empty() {
        Arc::new(UnconfiguredToolCaller)
    } else {
        Arc::new(CommandToolCaller::new(
            config.tools.command.clone(),
            config.tools.limits(),
        ))
    };
    Backends {
        assistant: Arc::new(CommandAssistant::new(CommandAssistantConfig {
            command: config.assistant.command.clone(),
            timeout: config.assistant.timeout(),
            output_limit_bytes: config.assistant.output_limit_bytes,
        })),
        tools,
        processes: Arc::new(CommandProcessRunner::new(config.process.limits())),
    }
}

/// Trigger input from CLI flags; clock runs carry none.
fn trigger_input(
    trigger: TriggerKind,
    message: Option<String>,
    event_type: Option<String>,
    data: Option<&str>,
) -> Result<Option<TriggerInput>> {
    let data = data
        .map(|raw| serde_json::from_str::<Value>(raw).context("parse --data as JSON"))
        .transpose()?;
    Ok(match trigger {
        TriggerKind::Clock => None,
        TriggerKind::Human => Some(TriggerInput {
            action: Some("task.add".to_string()),
            messages: message.into_iter().map(Message::user).collect(),
            source: Some("cli".to_string()),
            data,
            ..TriggerInput::default()
        }),
        TriggerKind::Event => Some(TriggerInput {
            source: Some("cli".to_string()),
            event_type,
            data,
            ..TriggerInput::default()
        }),
    })
}
