//! Inspiration: turn the current time into a situational report.
//!
//! Only clock-triggered executions start here.

use anyhow::{Result, bail};
use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::info;

use crate::core::types::{ClockContext, Execution, InspirationReport, Phase};
use crate::io::prompt::render_inspiration;
use crate::phases::PhaseEnv;

/// Clock context for `now`.
pub fn clock_context(now: DateTime<Utc>) -> ClockContext {
    ClockContext {
        now: now.to_rfc3339(),
        date: now.format("%Y-%m-%d").to_string(),
        time: now.format("%H:%M:%S").to_string(),
        weekday: now.weekday().to_string(),
        hour: now.hour(),
    }
}

pub fn run(env: &PhaseEnv<'_>, exec: &mut Execution) -> Result<()> {
    let clock = clock_context(Utc::now());
    let prompt = render_inspiration(&clock, env.robot)?;
    let (agent_id, reply) = env.ask_phase_agent(Phase::Inspiration, &prompt)?;

    let content = reply.text();
    if content.trim().is_empty() {
        bail!("inspiration agent ({agent_id}) returned empty response");
    }
    info!(chars = content.len(), "inspiration report ready");
    exec.inspiration = Some(InspirationReport {
        clock: Some(clock),
        content,
    });
    Ok(())
}
