//! Child process execution bound to a [`RunContext`].
//!
//! Every external command (assistant backend, tool backend, named subprocess
//! tasks, process delivery channels) goes through [`run_command`], so a
//! cancelled context or an expired deadline kills the child promptly.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::context::{CancelledError, RunContext};

/// Interval between cancellation checks while a child runs.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Turn timeouts, cancellation and non-zero exits into errors.
    ///
    /// `label` names the command in the error message.
    pub fn ensure_success(self, label: &str) -> Result<Self> {
        if self.cancelled {
            return Err(CancelledError {
                reason: format!("{label} interrupted"),
            }
            .into());
        }
        if self.timed_out {
            bail!("{label} timed out");
        }
        if !self.status.success() {
            bail!(
                "{label} exited with status {:?}: {}",
                self.status.code(),
                String::from_utf8_lossy(&self.stderr).trim()
            );
        }
        if self.stdout_truncated > 0 {
            warn!(label, truncated = self.stdout_truncated, "stdout truncated");
        }
        Ok(self)
    }
}

/// Run a command, feeding `stdin` and capturing bounded stdout/stderr.
///
/// The timeout is clipped to the context deadline. Output is drained on
/// reader threads while the child runs so a chatty child cannot deadlock on a
/// full pipe; bytes beyond `output_limit_bytes` are counted and discarded.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command(
    ctx: &RunContext,
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let timeout = ctx.call_timeout(timeout)?;
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn command");
            return Err(err).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin closes the pipe early.
        if let Err(err) = child_stdin.write_all(input) {
            debug!(err = %err, "child closed stdin early");
        }
    }

    let started = Instant::now();
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        if let Some(status) = child.wait_timeout(POLL_INTERVAL).context("wait for command")? {
            break status;
        }
        if ctx.is_cancelled() {
            cancelled = true;
        } else if started.elapsed() >= timeout {
            timed_out = true;
        } else {
            continue;
        }
        warn!(timed_out, cancelled, "stopping child process");
        child.kill().context("kill command")?;
        break child.wait().context("wait command after kill")?;
    };

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, _) = join_reader(stderr_handle).context("join stderr")?;

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        timed_out,
        cancelled,
    })
}

/// Build a [`Command`] from an argv list.
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }
    Ok((buf, truncated))
}
