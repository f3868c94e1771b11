//! Delivery fan-out to the robot's configured targets.
//!
//! Every enabled target is attempted even if an earlier one fails. The
//! center reports one [`ChannelResult`] per target plus the first failure.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::context::RunContext;
use crate::core::types::{ChannelResult, DeliveryContent, TriggerKind};
use crate::io::process::run_command;
use crate::robot::DeliveryTarget;

/// Execution metadata sent alongside the content.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryContext {
    pub execution_id: String,
    pub member_id: String,
    pub team_id: String,
    pub trigger: TriggerKind,
}

/// A sender for one target kind.
pub trait DeliveryChannel: Send + Sync {
    /// Target kind this channel handles, such as `file`.
    fn kind(&self) -> &str;

    /// Send content to `target`, returning optional details on success.
    fn send(
        &self,
        ctx: &RunContext,
        content: &DeliveryContent,
        delivery: &DeliveryContext,
        target: &str,
    ) -> Result<Option<Value>>;
}

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct FanOut {
    pub results: Vec<ChannelResult>,
    /// First failure, formatted as `<kind> delivery failed: <error>`.
    pub first_error: Option<String>,
}

impl FanOut {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|result| result.success)
    }
}

/// Routes delivery content to channels by target kind.
pub struct DeliveryCenter {
    channels: Vec<Box<dyn DeliveryChannel>>,
}

impl DeliveryCenter {
    pub fn new(channels: Vec<Box<dyn DeliveryChannel>>) -> Self {
        Self { channels }
    }

    /// File and process channels with the given subprocess limits.
    pub fn with_default_channels(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self::new(vec![
            Box::new(FileChannel),
            Box::new(ProcessChannel {
                timeout,
                output_limit_bytes,
            }),
        ])
    }

    #[instrument(skip_all, fields(execution_id = %delivery.execution_id, targets = targets.len()))]
    pub fn deliver(
        &self,
        ctx: &RunContext,
        content: &DeliveryContent,
        delivery: &DeliveryContext,
        targets: &[DeliveryTarget],
    ) -> FanOut {
        let mut fan_out = FanOut::default();
        for target in targets.iter().filter(|target| target.enabled) {
            let outcome = match self.channels.iter().find(|c| c.kind() == target.kind) {
                Some(channel) => channel.send(ctx, content, delivery, &target.target),
                None => Err(anyhow!("unsupported delivery kind '{}'", target.kind)),
            };
            let result = match outcome {
                Ok(details) => ChannelResult {
                    kind: target.kind.clone(),
                    target: target.target.clone(),
                    success: true,
                    details,
                    error: None,
                },
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(kind = %target.kind, target = %target.target, err = %message, "delivery failed");
                    if fan_out.first_error.is_none() {
                        fan_out.first_error = Some(format!("{} delivery failed: {message}", target.kind));
                    }
                    ChannelResult {
                        kind: target.kind.clone(),
                        target: target.target.clone(),
                        success: false,
                        details: None,
                        error: Some(message),
                    }
                }
            };
            fan_out.results.push(result);
        }
        info!(
            sent = fan_out.results.iter().filter(|r| r.success).count(),
            total = fan_out.results.len(),
            "delivery fan-out finished"
        );
        fan_out
    }
}

fn payload(content: &DeliveryContent, delivery: &DeliveryContext) -> Value {
    json!({
        "content": content,
        "context": delivery,
        "sent_at": Utc::now().to_rfc3339(),
    })
}

/// Appends one JSON line per delivery to the target path.
pub struct FileChannel;

impl DeliveryChannel for FileChannel {
    fn kind(&self) -> &str {
        "file"
    }

    fn send(
        &self,
        ctx: &RunContext,
        content: &DeliveryContent,
        delivery: &DeliveryContext,
        target: &str,
    ) -> Result<Option<Value>> {
        ctx.check()?;
        let path = Path::new(target);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create delivery dir {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(&payload(content, delivery))
            .context("serialize delivery payload")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open delivery file {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("write delivery file {}", path.display()))?;
        Ok(Some(json!({"bytes": line.len()})))
    }
}

/// Pipes the JSON payload to a command line split on whitespace.
pub struct ProcessChannel {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl DeliveryChannel for ProcessChannel {
    fn kind(&self) -> &str {
        "process"
    }

    fn send(
        &self,
        ctx: &RunContext,
        content: &DeliveryContent,
        delivery: &DeliveryContext,
        target: &str,
    ) -> Result<Option<Value>> {
        let argv: Vec<String> = target.split_whitespace().map(str::to_string).collect();
        let cmd = crate::io::process::command_from_argv(&argv)
            .with_context(|| format!("invalid process target '{target}'"))?;
        let body = serde_json::to_vec(&payload(content, delivery))
            .context("serialize delivery payload")?;
        let output = run_command(ctx, cmd, Some(&body), self.timeout, self.output_limit_bytes)?
            .ensure_success(&format!("delivery process {target}"))?;
        let stdout = output.stdout_text();
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())),
        ))
    }
}
