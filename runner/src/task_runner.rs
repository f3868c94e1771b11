//! Task execution: executor dispatch and the multi-turn assistant loop.
//!
//! Tool and subprocess tasks get a single call and a structural check.
//! Assistant tasks run a bounded conversation: each turn is validated, and the
//! validator's reply becomes the next input until the output is complete, the
//! validator gives up, or the turn budget runs out. Call failures end the task
//! at once; only validation failures earn another turn.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::context::{RunContext, is_cancellation};
use crate::core::feedback::default_next_input;
use crate::core::types::{Execution, ExecutorKind, Goals, Task, TaskResult, ValidationResult};
use crate::io::assistant::{Assistant, Conversation};
use crate::io::config::RunConfig;
use crate::io::prompt::render_previous_results;
use crate::io::tools::{ProcessRunner, ToolCaller};
use crate::robot::Robot;
use crate::validator::Validator;

/// Executor backends shared by every phase of an execution.
#[derive(Clone)]
pub struct Backends {
    pub assistant: Arc<dyn Assistant>,
    pub tools: Arc<dyn ToolCaller>,
    pub processes: Arc<dyn ProcessRunner>,
}

/// Per-task inputs derived from the execution.
#[derive(Debug, Clone)]
pub struct TaskContext<'a> {
    /// Conversation session key, unique per robot and task.
    pub chat_id: String,
    /// Results of the tasks before this one, in order.
    pub previous_results: &'a [TaskResult],
    pub goals: Option<&'a Goals>,
    pub system_prompt: &'a str,
}

pub struct TaskRunner<'a> {
    backends: &'a Backends,
    robot: &'a Robot,
    config: &'a RunConfig,
    validator: Validator<'a>,
}

/// How a single executor call ended.
enum CallFailure {
    Cancelled(anyhow::Error),
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for CallFailure {
    fn from(err: anyhow::Error) -> Self {
        if is_cancellation(&err) {
            CallFailure::Cancelled(err)
        } else {
            CallFailure::Failed(err)
        }
    }
}

impl<'a> TaskRunner<'a> {
    pub fn new(backends: &'a Backends, robot: &'a Robot, config: &'a RunConfig) -> Self {
        Self {
            backends,
            robot,
            config,
            validator: Validator::new(backends.assistant.as_ref(), robot, config),
        }
    }

    /// Context for the task at `task_index`: only earlier results are visible.
    pub fn build_task_context<'e>(&self, exec: &'e Execution, task_index: usize) -> TaskContext<'e>
    where
        'a: 'e,
    {
        let task_id = exec
            .tasks
            .get(task_index)
            .map(|task| task.id.as_str())
            .unwrap_or_default();
        let visible = task_index.min(exec.results.len());
        TaskContext {
            chat_id: format!("robot-{}-task-{}", self.robot.member_id, task_id),
            previous_results: &exec.results[..visible],
            goals: exec.goals.as_ref(),
            system_prompt: &self.robot.system_prompt,
        }
    }

    /// Run one task to a result.
    ///
    /// Failures are reported in the returned [`TaskResult`]; only cancellation
    /// is returned as an error.
    #[instrument(skip_all, fields(task_id = %task.id, executor = task.executor_type.as_str()))]
    pub fn execute_with_retry(
        &self,
        ctx: &RunContext,
        task: &Task,
        task_ctx: &TaskContext<'_>,
    ) -> Result<TaskResult> {
        let started = Instant::now();
        let mut result = match task.executor_type {
            ExecutorKind::Assistant => self.run_assistant(ctx, task, task_ctx)?,
            ExecutorKind::Mcp | ExecutorKind::Process => self.run_single_call(ctx, task)?,
        };
        result.duration_ms = elapsed_ms(started);
        info!(
            success = result.success,
            duration_ms = result.duration_ms,
            "task finished"
        );
        Ok(result)
    }

    fn run_single_call(&self, ctx: &RunContext, task: &Task) -> Result<TaskResult> {
        let output = match self.dispatch_once(ctx, task) {
            Ok(output) => output,
            Err(CallFailure::Cancelled(err)) => return Err(err),
            Err(CallFailure::Failed(err)) => {
                return Ok(failed(task, format!("execution failed on attempt 1: {err:#}"), None));
            }
        };
        let validation = self.validator.validate_structure(Some(&output));
        let mut result = TaskResult {
            task_id: task.id.clone(),
            success: validation.passed,
            output: Some(output),
            error: None,
            duration_ms: 0,
            validated: true,
            validation: None,
        };
        if !validation.passed {
            result.error = Some(validation.issues.join("; "));
        }
        result.validation = Some(validation);
        Ok(result)
    }

    fn dispatch_once(&self, ctx: &RunContext, task: &Task) -> Result<Value, CallFailure> {
        match task.executor_type {
            ExecutorKind::Mcp => {
                let (client, tool) = task.executor_id.split_once('.').ok_or_else(|| {
                    anyhow!(
                        "invalid MCP executor ID: {} (expected format: clientID.toolName)",
                        task.executor_id
                    )
                })?;
                let arguments = tool_arguments(&task.args);
                Ok(self.backends.tools.call_tool(ctx, client, tool, &arguments)?)
            }
            ExecutorKind::Process => Ok(self
                .backends
                .processes
                .run(ctx, &task.executor_id, &task.args)?),
            ExecutorKind::Assistant => Err(CallFailure::Failed(anyhow!(
                "assistant tasks run as conversations"
            ))),
        }
    }

    fn run_assistant(
        &self,
        ctx: &RunContext,
        task: &Task,
        task_ctx: &TaskContext<'_>,
    ) -> Result<TaskResult> {
        let max_turns = self.config.effective_turns();
        let mut conversation = Conversation::new(
            self.backends.assistant.as_ref(),
            task.executor_id.as_str(),
            task_ctx.chat_id.as_str(),
            max_turns,
        )
        .with_system_prompt(task_ctx.system_prompt);

        let mut input = first_turn_input(task, task_ctx)?;
        let mut last: Option<(Value, ValidationResult)> = None;

        for attempt in 1..=max_turns {
            let turn = match conversation.turn(ctx, &input) {
                Ok(turn) => turn,
                Err(err) if is_cancellation(&err) => return Err(err),
                Err(err) => {
                    warn!(attempt, err = %format!("{err:#}"), "assistant call failed");
                    let (output, validation) = last.unzip();
                    let mut result = failed(
                        task,
                        format!("execution failed on attempt {attempt}: {err:#}"),
                        validation,
                    );
                    result.output = output;
                    return Ok(result);
                }
            };

            let output = turn.result.output();
            let validation = self.validator.validate_with_context(
                ctx,
                task,
                Some(&output),
                Some(&turn.result),
            )?;
            debug!(
                turn = attempt,
                passed = validation.passed,
                complete = validation.complete,
                score = validation.score,
                "turn validated"
            );

            if validation.complete && validation.passed {
                return Ok(succeeded(task, output, validation));
            }
            if !validation.need_reply {
                if validation.passed {
                    return Ok(succeeded(task, output, validation));
                }
                let message = failure_message(&validation);
                let mut result = failed(task, message, Some(validation));
                result.output = Some(output);
                return Ok(result);
            }

            input = validation
                .reply_content
                .clone()
                .filter(|reply| !reply.trim().is_empty())
                .unwrap_or_else(|| default_next_input(&validation, task.expected_output_text()));
            last = Some((output, validation));
        }

        let (output, validation) = last.unzip();
        let mut validation = validation.unwrap_or_default();
        validation
            .issues
            .push(format!("max turns ({max_turns}) exceeded without completing the task"));
        warn!(max_turns, "turn budget exhausted");
        let mut result = failed(task, failure_message(&validation), Some(validation));
        result.output = output;
        Ok(result)
    }
}

/// First-turn prompt: earlier results (if any) followed by the task messages.
fn first_turn_input(task: &Task, task_ctx: &TaskContext<'_>) -> Result<String> {
    let mut parts = Vec::with_capacity(task.messages.len() + 1);
    if let Some(previous) = render_previous_results(task_ctx.previous_results)? {
        parts.push(previous);
    }
    parts.extend(
        task.messages
            .iter()
            .map(|message| message.text())
            .filter(|text| !text.is_empty()),
    );
    Ok(parts.join("\n\n"))
}

/// Tool arguments from positional args: an object is used as-is, any other
/// value is wrapped as `input`.
fn tool_arguments(args: &[Value]) -> Map<String, Value> {
    match args.first() {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => Map::from_iter([("input".to_string(), other.clone())]),
        None => Map::new(),
    }
}

fn failure_message(validation: &ValidationResult) -> String {
    if validation.issues.is_empty() {
        "validation failed".to_string()
    } else {
        format!("validation failed: {}", validation.issues.join("; "))
    }
}

fn succeeded(task: &Task, output: Value, validation: ValidationResult) -> TaskResult {
    TaskResult {
        task_id: task.id.clone(),
        success: true,
        output: Some(output),
        error: None,
        duration_ms: 0,
        validated: true,
        validation: Some(validation),
    }
}

fn failed(task: &Task, error: String, validation: Option<ValidationResult>) -> TaskResult {
    TaskResult {
        task_id: task.id.clone(),
        success: false,
        output: None,
        error: Some(error),
        duration_ms: 0,
        validated: validation.is_some(),
        validation,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedAssistant, ScriptedProcesses, ScriptedTools, backends, execution, robot, task,
    };
    use serde_json::json;

    struct Harness {
        assistant: Arc<ScriptedAssistant>,
        tools: Arc<ScriptedTools>,
        processes: Arc<ScriptedProcesses>,
        backends: Backends,
        robot: Robot,
        config: RunConfig,
    }

    fn harness() -> Harness {
        let (backends, assistant, tools, processes) = backends();
        Harness {
            assistant,
            tools,
            processes,
            backends,
            robot: robot("r1"),
            config: RunConfig::default(),
        }
    }

    fn run(h: &Harness, task: &Task) -> TaskResult {
        let runner = TaskRunner::new(&h.backends, &h.robot, &h.config);
        let mut exec = execution("exec_1");
        exec.tasks = vec![task.clone()];
        exec.results.clear();
        let task_ctx = runner.build_task_context(&exec, 0);
        runner
            .execute_with_retry(&RunContext::new(), task, &task_ctx)
            .expect("run")
    }

    #[test]
    fn single_turn_json_output_completes() {
        let h = harness();
        h.assistant.push_text("analyst", "{\"total\": 100}");
        let mut task = task("t1", ExecutorKind::Assistant, "analyst");
        task.validation_rules = vec![r#"{"type":"type","value":"object"}"#.to_string()];

        let result = run(&h, &task);
        assert!(result.success);
        assert_eq!(result.output, Some(json!({"total": 100})));
        assert_eq!(h.assistant.calls().len(), 1);
    }

    /// A rejected turn feeds the validator's reply back as the next input.
    #[test]
    fn validation_feedback_drives_second_turn() {
        let h = harness();
        h.assistant.push_text("analyst", "not json");
        h.assistant.push_text("analyst", "{\"total\": 100}");
        let mut task = task("t1", ExecutorKind::Assistant, "analyst");
        task.validation_rules = vec!["must be valid JSON".to_string()];

        let result = run(&h, &task);
        assert!(result.success);
        let calls = h.assistant.calls();
        assert_eq!(calls.len(), 2);
        let second_input = calls[1].messages.last().expect("input").text();
        assert!(second_input.contains("did not pass validation"));
        assert_eq!(calls[1].chat_id.as_deref(), Some("robot-r1-task-t1"));
        // history: user, assistant, user
        assert_eq!(calls[1].messages.len(), 3);
    }

    #[test]
    fn turn_budget_is_respected() {
        let mut h = harness();
        h.config.max_turns_per_task = 3;
        h.config.max_retries = 10;
        for _ in 0..5 {
            h.assistant.push_text("analyst", "still not json");
        }
        let mut task = task("t1", ExecutorKind::Assistant, "analyst");
        task.validation_rules = vec![r#"{"type":"type","value":"object"}"#.to_string()];

        let result = run(&h, &task);
        assert!(!result.success);
        assert_eq!(h.assistant.calls().len(), 3);
        let validation = result.validation.expect("validation");
        assert!(
            validation
                .issues
                .last()
                .expect("issue")
                .contains("max turns (3) exceeded")
        );
    }

    #[test]
    fn disabled_retries_allow_one_turn() {
        let mut h = harness();
        h.config.retry_on_validation_failure = false;
        h.assistant.push_text("analyst", "nope");
        h.assistant.push_text("analyst", "{\"ok\": true}");
        let mut task = task("t1", ExecutorKind::Assistant, "analyst");
        task.validation_rules = vec![r#"{"type":"type","value":"object"}"#.to_string()];

        assert!(!run(&h, &task).success);
        assert_eq!(h.assistant.calls().len(), 1);
    }

    /// Call failures are never retried.
    #[test]
    fn call_error_aborts_without_retry() {
        let h = harness();
        h.assistant.push_error("analyst", "connection reset");
        h.assistant.push_text("analyst", "unused");
        let task = task("t1", ExecutorKind::Assistant, "analyst");

        let result = run(&h, &task);
        assert!(!result.success);
        let error = result.error.expect("error");
        assert!(error.starts_with("execution failed on attempt 1:"));
        assert!(error.contains("connection reset"));
        assert_eq!(h.assistant.calls().len(), 1);
    }

    #[test]
    fn failing_rules_without_actionable_reply_fail_immediately() {
        let h = harness();
        h.assistant.push_text("analyst", "text");
        h.assistant
            .push_json("__yao.validation", json!({"passed": false, "score": 0.1, "issues": ["off topic"]}));
        let mut task = task("t1", ExecutorKind::Assistant, "analyst");
        task.expected_output = Some("a report".to_string());

        let result = run(&h, &task);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("validation failed: off topic"));
        assert_eq!(h.assistant.calls_for("analyst").len(), 1);
    }

    #[test]
    fn mcp_task_uses_first_arg_object() {
        let h = harness();
        h.tools.push_ok("fs", "read", json!({"text": "hello"}));
        let mut task = task("t1", ExecutorKind::Mcp, "fs.read");
        task.args = vec![json!({"path": "/tmp/a"})];

        let result = run(&h, &task);
        assert!(result.success);
        let calls = h.tools.calls();
        assert_eq!(calls[0].arguments, json!({"path": "/tmp/a"}));
    }

    #[test]
    fn invalid_mcp_id_fails_without_calling() {
        let h = harness();
        let task = task("t1", ExecutorKind::Mcp, "no-dot");
        let result = run(&h, &task);
        assert!(result.error.expect("error").contains("invalid MCP executor ID: no-dot"));
        assert!(h.tools.calls().is_empty());
    }

    #[test]
    fn process_task_with_empty_output_fails_structural_check() {
        let h = harness();
        h.processes.push_ok("report.build", json!(""));
        let mut task = task("t1", ExecutorKind::Process, "report.build");
        task.validation_rules = vec!["irrelevant semantic rule".to_string()];

        let result = run(&h, &task);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("executor returned empty output"));
        assert!(h.assistant.calls().is_empty());
    }

    #[test]
    fn tool_arguments_wrap_scalars() {
        assert_eq!(Value::Object(tool_arguments(&[json!("q")])), json!({"input": "q"}));
        assert!(tool_arguments(&[]).is_empty());
    }

    #[test]
    fn task_context_sees_only_earlier_results() {
        let h = harness();
        let runner = TaskRunner::new(&h.backends, &h.robot, &h.config);
        let mut exec = execution("exec_1");
        exec.tasks = vec![
            task("a", ExecutorKind::Assistant, "x"),
            task("b", ExecutorKind::Assistant, "x"),
        ];
        exec.results = vec![failed(&exec.tasks[0], "boom".to_string(), None)];

        assert!(runner.build_task_context(&exec, 0).previous_results.is_empty());
        let ctx = runner.build_task_context(&exec, 1);
        assert_eq!(ctx.previous_results.len(), 1);
        assert_eq!(ctx.chat_id, "robot-r1-task-b");
        assert_eq!(runner.build_task_context(&exec, 5).previous_results.len(), 1);
    }

    #[test]
    fn first_turn_input_prepends_previous_results() {
        let h = harness();
        let runner = TaskRunner::new(&h.backends, &h.robot, &h.config);
        let mut exec = execution("exec_1");
        exec.tasks = vec![
            task("a", ExecutorKind::Assistant, "x"),
            task("b", ExecutorKind::Assistant, "x"),
        ];
        exec.results = vec![succeeded(
            &exec.tasks[0],
            json!({"rows": 3}),
            ValidationResult::default(),
        )];
        let ctx = runner.build_task_context(&exec, 1);
        let input = first_turn_input(&exec.tasks[1], &ctx).expect("input");
        assert!(input.starts_with("## Previous Task Results"));
        assert!(input.ends_with("Do task b"));
    }
}
