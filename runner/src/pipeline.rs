//! Phase pipeline: drives one execution through its phases.
//!
//! `pending → running → {completed | failed | cancelled}`. Phases run in
//! their fixed order starting at the trigger's first phase; the first phase
//! error ends the execution and no later phase runs.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{error, info, instrument, warn};

use crate::context::{RunContext, is_cancellation};
use crate::core::types::{ExecStatus, Execution, Phase, TriggerInput, TriggerKind};
use crate::io::config::RunConfig;
use crate::io::delivery::DeliveryCenter;
use crate::phases::{PhaseEnv, run_phase};
use crate::robot::{QuotaExceededError, Robot};
use crate::task_runner::Backends;

type PhaseStartHook = Box<dyn Fn(Phase) + Send + Sync>;
type PhaseEndHook = Box<dyn Fn(Phase, Option<&str>) + Send + Sync>;

/// Runs executions for any robot with shared backends and settings.
pub struct Pipeline {
    backends: Backends,
    delivery: DeliveryCenter,
    config: RunConfig,
    on_phase_start: Option<PhaseStartHook>,
    on_phase_end: Option<PhaseEndHook>,
    started: AtomicU64,
    running: AtomicUsize,
}

impl Pipeline {
    pub fn new(backends: Backends, delivery: DeliveryCenter, config: RunConfig) -> Self {
        Self {
            backends,
            delivery,
            config,
            on_phase_start: None,
            on_phase_end: None,
            started: AtomicU64::new(0),
            running: AtomicUsize::new(0),
        }
    }

    /// Called before each phase handler runs.
    pub fn on_phase_start(mut self, hook: impl Fn(Phase) + Send + Sync + 'static) -> Self {
        self.on_phase_start = Some(Box::new(hook));
        self
    }

    /// Called after each phase handler with its error text, if any.
    pub fn on_phase_end(
        mut self,
        hook: impl Fn(Phase, Option<&str>) + Send + Sync + 'static,
    ) -> Self {
        self.on_phase_end = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Executions started since creation or the last reset.
    pub fn exec_count(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Executions running right now.
    pub fn current_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.started.store(0, Ordering::SeqCst);
        self.running.store(0, Ordering::SeqCst);
    }

    /// Run one execution for `robot`.
    ///
    /// Setup problems (no robot, invalid config, full quota) return `Err`.
    /// Once the execution exists, phase errors are recorded on it and the
    /// execution is returned with a terminal status.
    #[instrument(skip_all, fields(member_id = tracing::field::Empty, trigger = trigger.as_str()))]
    pub fn execute(
        &self,
        ctx: &RunContext,
        robot: Option<&Robot>,
        trigger: TriggerKind,
        input: Option<TriggerInput>,
    ) -> Result<Execution> {
        let robot = robot.ok_or_else(|| anyhow!("robot cannot be nil"))?;
        tracing::Span::current().record("member_id", robot.member_id.as_str());
        self.config.validate().context("invalid run config")?;

        let _slot = robot.try_acquire_slot().ok_or_else(|| QuotaExceededError {
            member_id: robot.member_id.clone(),
            max: robot.quota.max,
        })?;
        self.started.fetch_add(1, Ordering::SeqCst);
        let _running = RunningGuard::enter(&self.running);

        let mut exec = new_execution(robot, trigger, input);
        exec.status = ExecStatus::Running;
        info!(execution_id = %exec.id, "execution started");

        let env = PhaseEnv {
            ctx,
            robot,
            backends: &self.backends,
            config: &self.config,
            delivery: &self.delivery,
        };
        let outcome = self.run_phases(&env, &mut exec);

        exec.end_time = Some(Utc::now().to_rfc3339());
        match outcome {
            Ok(()) => {
                exec.status = ExecStatus::Completed;
                info!(execution_id = %exec.id, "execution completed");
            }
            Err(err) => {
                let message = format!("{err:#}");
                exec.status = if is_cancellation(&err) {
                    ExecStatus::Cancelled
                } else {
                    ExecStatus::Failed
                };
                error!(execution_id = %exec.id, phase = %exec.phase, err = %message, "execution ended early");
                exec.error = Some(message);
            }
        }
        Ok(exec)
    }

    fn run_phases(&self, env: &PhaseEnv<'_>, exec: &mut Execution) -> Result<()> {
        let start = exec.trigger.start_phase().index();
        for phase in Phase::ALL.into_iter().skip(start) {
            env.ctx.check()?;
            exec.phase = phase;
            self.notify_start(phase);
            let outcome = run_phase(env, exec, phase);
            let message = outcome.as_ref().err().map(|err| format!("{err:#}"));
            self.notify_end(phase, message.as_deref());
            outcome?;
        }
        Ok(())
    }

    fn notify_start(&self, phase: Phase) {
        if let Some(hook) = &self.on_phase_start
            && catch_unwind(AssertUnwindSafe(|| hook(phase))).is_err()
        {
            warn!(phase = %phase, "phase start hook panicked");
        }
    }

    fn notify_end(&self, phase: Phase, error: Option<&str>) {
        if let Some(hook) = &self.on_phase_end
            && catch_unwind(AssertUnwindSafe(|| hook(phase, error))).is_err()
        {
            warn!(phase = %phase, "phase end hook panicked");
        }
    }
}

/// Decrements the running counter when the execution returns.
struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn new_execution(robot: &Robot, trigger: TriggerKind, input: Option<TriggerInput>) -> Execution {
    Execution {
        id: execution_id(),
        member_id: robot.member_id.clone(),
        team_id: robot.team_id.clone(),
        trigger,
        start_time: Utc::now().to_rfc3339(),
        end_time: None,
        status: ExecStatus::Pending,
        phase: trigger.start_phase(),
        error: None,
        input,
        inspiration: None,
        goals: None,
        tasks: Vec::new(),
        current: None,
        results: Vec::new(),
        delivery: None,
        learning: Vec::new(),
    }
}

/// `exec_<UTC timestamp>_<6 lowercase alphanumerics>`.
pub fn execution_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("exec_{timestamp}_{suffix}")
}
