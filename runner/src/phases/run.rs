//! Run: execute the planned tasks one after another.
//!
//! Task `k` sees the results of tasks `0..k`. With `continue_on_failure`
//! off, the first failed task skips the rest and fails the phase.

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::core::types::{CurrentState, Execution, TaskStatus};
use crate::phases::PhaseEnv;
use crate::task_runner::TaskRunner;

pub fn run(env: &PhaseEnv<'_>, exec: &mut Execution) -> Result<()> {
    let runner = TaskRunner::new(env.backends, env.robot, env.config);
    let total = exec.tasks.len();

    for index in 0..total {
        env.ctx.check()?;
        let task_id = exec.tasks[index].id.clone();
        exec.tasks[index].status = TaskStatus::Running;
        exec.tasks[index].start_time = Some(Utc::now().to_rfc3339());
        exec.current = Some(CurrentState {
            task_index: index,
            task_id: task_id.clone(),
            progress: format!("{}/{}", index + 1, total),
        });

        let outcome = {
            let task_ctx = runner.build_task_context(exec, index);
            runner.execute_with_retry(env.ctx, &exec.tasks[index], &task_ctx)
        };
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                exec.tasks[index].status = TaskStatus::Failed;
                exec.tasks[index].end_time = Some(Utc::now().to_rfc3339());
                return Err(err);
            }
        };

        exec.tasks[index].status = if result.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        exec.tasks[index].end_time = Some(Utc::now().to_rfc3339());
        let failure = (!result.success).then(|| result.error.clone().unwrap_or_default());
        exec.results.push(result);

        if let Some(error) = failure {
            if env.config.continue_on_failure {
                warn!(task_id = %task_id, err = %error, "task failed, continuing");
                continue;
            }
            for task in &mut exec.tasks[index + 1..] {
                task.status = TaskStatus::Skipped;
            }
            bail!("task {task_id} failed: {error}");
        }
    }

    exec.current = None;
    let (succeeded, failed) = exec.result_counts();
    info!(succeeded, failed, "all tasks finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecutorKind;
    use crate::phases::testing::EnvParts;
    use crate::test_support::{backends, execution, robot, task};

    fn planned(ids: &[&str]) -> Execution {
        let mut exec = execution("exec_1");
        exec.results.clear();
        exec.tasks = ids
            .iter()
            .map(|id| task(id, ExecutorKind::Assistant, "analyst"))
            .collect();
        exec
    }

    #[test]
    fn tasks_run_in_order_with_earlier_results_as_context() {
        let (backends, assistant, _, _) = backends();
        assistant.push_text("analyst", "first done");
        assistant.push_text("analyst", "second done");
        let parts = EnvParts::new(robot("r1"), backends);
        let mut exec = planned(&["a", "b"]);

        run(&parts.env(), &mut exec).expect("run");
        assert_eq!(exec.results.len(), 2);
        assert!(exec.tasks.iter().all(|task| task.status == TaskStatus::Completed));
        assert!(exec.tasks.iter().all(|task| task.end_time.is_some()));
        assert!(exec.current.is_none());

        let calls = assistant.calls();
        assert_eq!(calls[0].chat_id.as_deref(), Some("robot-r1-task-a"));
        let first = calls[0].messages.last().expect("input").text();
        assert!(!first.contains("Previous Task Results"));
        let second = calls[1].messages.last().expect("input").text();
        assert!(second.contains("### Task: a"));
        assert!(second.contains("first done"));
    }

    #[test]
    fn failure_skips_remaining_tasks() {
        let (backends, assistant, _, _) = backends();
        assistant.push_error("analyst", "boom");
        let parts = EnvParts::new(robot("r1"), backends);
        let mut exec = planned(&["a", "b", "c"]);

        let err = run(&parts.env(), &mut exec).unwrap_err();
        assert!(err.to_string().starts_with("task a failed: execution failed on attempt 1"));
        assert_eq!(exec.results.len(), 1);
        assert_eq!(exec.tasks[0].status, TaskStatus::Failed);
        assert_eq!(exec.tasks[1].status, TaskStatus::Skipped);
        assert_eq!(exec.tasks[2].status, TaskStatus::Skipped);
        assert_eq!(exec.current.as_ref().expect("current").progress, "1/3");
    }

    #[test]
    fn continue_on_failure_keeps_every_result() {
        let (backends, assistant, _, _) = backends();
        assistant.push_error("analyst", "boom");
        assistant.push_text("analyst", "fine");
        let mut parts = EnvParts::new(robot("r1"), backends);
        parts.config.continue_on_failure = true;
        let mut exec = planned(&["a", "b"]);

        run(&parts.env(), &mut exec).expect("run");
        assert_eq!(exec.result_counts(), (1, 1));
        assert_eq!(exec.tasks[1].status, TaskStatus::Completed);
    }
}
