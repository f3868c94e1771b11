//! External tool and named-subprocess executors.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use crate::context::RunContext;
use crate::io::process::{command_from_argv, run_command};

/// Calls a tool exposed by an external tool server.
pub trait ToolCaller: Send + Sync {
    fn call_tool(
        &self,
        ctx: &RunContext,
        client: &str,
        tool: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value>;
}

/// Runs a named subprocess with positional arguments.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, ctx: &RunContext, name: &str, args: &[Value]) -> Result<Value>;
}

/// Settings shared by the command-backed executors.
#[derive(Debug, Clone)]
pub struct CommandLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Tool backend that forwards `{client, tool, arguments}` to a bridge command.
pub struct CommandToolCaller {
    command: Vec<String>,
    limits: CommandLimits,
}

impl CommandToolCaller {
    pub fn new(command: Vec<String>, limits: CommandLimits) -> Self {
        Self { command, limits }
    }
}

impl ToolCaller for CommandToolCaller {
    #[instrument(skip_all, fields(client = %client, tool = %tool))]
    fn call_tool(
        &self,
        ctx: &RunContext,
        client: &str,
        tool: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        let cmd = command_from_argv(&self.command).context("tools.command")?;
        let payload = serde_json::to_vec(&json!({
            "client": client,
            "tool": tool,
            "arguments": arguments,
        }))
        .context("serialize tool request")?;
        info!("calling tool bridge");
        let output = run_command(
            ctx,
            cmd,
            Some(&payload),
            self.limits.timeout,
            self.limits.output_limit_bytes,
        )
        .with_context(|| format!("call tool {client}.{tool}"))?
        .ensure_success(&format!("tool {client}.{tool}"))?;
        Ok(parse_stdout(&output.stdout_text()))
    }
}

/// Tool backend used when no bridge command is configured.
pub struct UnconfiguredToolCaller;

impl ToolCaller for UnconfiguredToolCaller {
    fn call_tool(
        &self,
        _ctx: &RunContext,
        client: &str,
        tool: &str,
        _arguments: &Map<String, Value>,
    ) -> Result<Value> {
        Err(anyhow!(
            "no tool backend configured for {client}.{tool} (set tools.command)"
        ))
    }
}

/// Runs the executor id as a program; args are stringified.
pub struct CommandProcessRunner {
    limits: CommandLimits,
}

impl CommandProcessRunner {
    pub fn new(limits: CommandLimits) -> Self {
        Self { limits }
    }
}

impl ProcessRunner for CommandProcessRunner {
    #[instrument(skip_all, fields(name = %name, args = args.len()))]
    fn run(&self, ctx: &RunContext, name: &str, args: &[Value]) -> Result<Value> {
        let mut argv = vec![name.to_string()];
        argv.extend(args.iter().map(arg_text));
        let cmd = command_from_argv(&argv)?;
        let output = run_command(
            ctx,
            cmd,
            None,
            self.limits.timeout,
            self.limits.output_limit_bytes,
        )
        .with_context(|| format!("run process {name}"))?
        .ensure_success(&format!("process {name}"))?;
        Ok(parse_stdout(&output.stdout_text()))
    }
}

fn arg_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Stdout as JSON when it parses, otherwise the trimmed text.
fn parse_stdout(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
