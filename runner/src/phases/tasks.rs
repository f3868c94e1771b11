//! Tasks: break the goals into an ordered, executable plan.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{info, warn};

use crate::core::plan::{parse_tasks, validate_plan_shape, validate_tasks_with_resources};
use crate::core::types::{Execution, Phase};
use crate::io::prompt::render_tasks;
use crate::phases::PhaseEnv;

pub fn run(env: &PhaseEnv<'_>, exec: &mut Execution) -> Result<()> {
    let goals = exec
        .goals
        .as_ref()
        .filter(|goals| !goals.content.trim().is_empty())
        .ok_or_else(|| anyhow!("goals not available for task planning"))?;

    let prompt = render_tasks(goals, env.robot)?;
    let (agent_id, reply) = env.ask_phase_agent(Phase::Tasks, &prompt)?;

    let plan = reply
        .json()
        .map(Value::Object)
        .ok_or_else(|| anyhow!("tasks agent ({agent_id}) returned invalid JSON"))?;
    let items = match plan.get("tasks").and_then(Value::as_array) {
        Some(items) if !items.is_empty() => items,
        _ => bail!("tasks agent ({agent_id}) returned no tasks"),
    };
    exec.tasks = validate_plan_shape(&plan)
        .and_then(|()| parse_tasks(items))
        .with_context(|| format!("tasks agent ({agent_id}) returned invalid task structure"))?;

    let warnings = validate_tasks_with_resources(&exec.tasks, |task| {
        env.robot.executor_exists(task)
    })
    .context("tasks validation failed")?;
    for warning in &warnings {
        warn!("{warning}");
    }
    info!(tasks = exec.tasks.len(), warnings = warnings.len(), "plan ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExecutorKind, Goals};
    use crate::phases::testing::EnvParts;
    use crate::test_support::{backends, execution, robot};
    use serde_json::json;

    fn planning_exec() -> Execution {
        let mut exec = execution("exec_1");
        exec.tasks.clear();
        exec.goals = Some(Goals {
            content: "1. Analyze Q4 data".to_string(),
            delivery: None,
        });
        exec
    }

    #[test]
    fn plan_is_parsed_and_sorted() {
        let (backends, assistant, _, _) = backends();
        assistant.push_json(
            "__yao.tasks",
            json!({"tasks": [
                {"id": "t2", "executor_type": "agent", "executor_id": "analyst", "description": "second", "order": 2},
                {"id": "t0", "executor_type": "mcp", "executor_id": "fs.read", "description": "first", "order": 0},
                {"id": "t1", "executor_type": "process", "executor_id": "report", "description": "middle", "order": 1}
            ]}),
        );
        let parts = EnvParts::new(robot("r1"), backends);
        let mut exec = planning_exec();

        run(&parts.env(), &mut exec).expect("run");
        let ids: Vec<&str> = exec.tasks.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, ["t0", "t1", "t2"]);
        assert_eq!(exec.tasks[0].executor_type, ExecutorKind::Mcp);
        let prompt = assistant.calls()[0].messages.last().expect("prompt").text();
        assert!(prompt.contains("1. Analyze Q4 data"));
    }

    #[test]
    fn missing_goals_fail_before_calling() {
        let (backends, assistant, _, _) = backends();
        let parts = EnvParts::new(robot("r1"), backends);
        let mut exec = planning_exec();
        exec.goals = None;
        let err = run(&parts.env(), &mut exec).unwrap_err();
        assert_eq!(err.to_string(), "goals not available for task planning");
        assert!(assistant.calls().is_empty());
    }

    #[test]
    fn reply_errors_are_specific() {
        let cases = [
            (json!(null), "returned invalid JSON"),
            (json!({"tasks": []}), "returned no tasks"),
            (json!({"tasks": [{"id": "a", "executor_type": "agent"}]}), "returned invalid task structure"),
            (json!({"tasks": [
                {"id": "a", "executor_type": "agent", "executor_id": "x", "description": "one"},
                {"id": "a", "executor_type": "agent", "executor_id": "x", "description": "two"}
            ]}), "tasks validation failed"),
        ];
        for (reply, expected) in cases {
            let (backends, assistant, _, _) = backends();
            if reply.is_null() {
                assistant.push_text("__yao.tasks", "I could not plan this");
            } else {
                assistant.push_json("__yao.tasks", reply);
            }
            let parts = EnvParts::new(robot("r1"), backends);
            let mut exec = planning_exec();
            let err = run(&parts.env(), &mut exec).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{expected}: got {err:#}"
            );
        }
    }
}
