//! Phase handlers.
//!
//! Each handler reads what earlier phases left on the [`Execution`], asks its
//! phase assistant (or the task runner) for work, and writes its own result
//! slot. A handler error fails the execution; later phases never run.

pub mod delivery;
pub mod goals;
pub mod inspiration;
pub mod learning;
pub mod run;
pub mod tasks;

use anyhow::{Context, Result};
use tracing::instrument;

use crate::context::RunContext;
use crate::core::types::{Execution, Phase};
use crate::io::assistant::{CallResult, call_with_system_and_user};
use crate::io::config::RunConfig;
use crate::io::delivery::DeliveryCenter;
use crate::robot::Robot;
use crate::task_runner::Backends;

/// Everything a phase handler may use besides the execution itself.
pub struct PhaseEnv<'a> {
    pub ctx: &'a RunContext,
    pub robot: &'a Robot,
    pub backends: &'a Backends,
    pub config: &'a RunConfig,
    pub delivery: &'a DeliveryCenter,
}

impl PhaseEnv<'_> {
    /// One-shot call to the robot's assistant for `phase`.
    fn ask_phase_agent(&self, phase: Phase, prompt: &str) -> Result<(String, CallResult)> {
        let agent_id = self.robot.agent_for(phase);
        let reply = call_with_system_and_user(
            self.backends.assistant.as_ref(),
            self.ctx,
            &agent_id,
            Some(&self.robot.system_prompt),
            prompt,
        )
        .with_context(|| format!("{phase} agent ({agent_id}) call failed"))?;
        Ok((agent_id, reply))
    }
}

/// Dispatch to the handler for `phase`.
#[instrument(skip_all, fields(execution_id = %exec.id, phase = %phase))]
pub fn run_phase(env: &PhaseEnv<'_>, exec: &mut Execution, phase: Phase) -> Result<()> {
    match phase {
        Phase::Inspiration => inspiration::run(env, exec),
        Phase::Goals => goals::run(env, exec),
        Phase::Tasks => tasks::run(env, exec),
        Phase::Run => run::run(env, exec),
        Phase::Delivery => delivery::run(env, exec),
        Phase::Learning => learning::run(env, exec),
    }
}
