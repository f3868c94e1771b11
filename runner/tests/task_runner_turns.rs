//! Multi-turn conversations driven by validator replies.

use robot_runner::context::RunContext;
use robot_runner::core::types::{ExecutorKind, Role, Task, TaskResult};
use robot_runner::io::config::RunConfig;
use robot_runner::task_runner::TaskRunner;
use robot_runner::test_support::{ScriptedAssistant, backends, execution, robot, task};
use serde_json::json;
use std::sync::Arc;

fn run_task(assistant_setup: impl FnOnce(&ScriptedAssistant), task: &Task) -> (TaskResult, Arc<ScriptedAssistant>) {
    let (backends, assistant, _, _) = backends();
    assistant_setup(&assistant);
    let robot = robot("r1");
    let config = RunConfig::default();
    let runner = TaskRunner::new(&backends, &robot, &config);
    let mut exec = execution("exec_1");
    exec.tasks = vec![task.clone()];
    exec.results.clear();
    let task_ctx = runner.build_task_context(&exec, 0);
    let result = runner
        .execute_with_retry(&RunContext::new(), task, &task_ctx)
        .expect("execute");
    (result, assistant)
}

/// Rule rejection, then a low semantic score, then a passing answer.
#[test]
fn rule_then_refinement_then_success() {
    let mut task = task("report", ExecutorKind::Assistant, "analyst");
    task.expected_output = Some("a summary naming the quarter".to_string());
    task.validation_rules = vec!["must contain 'Q4'".to_string()];

    let (result, assistant) = run_task(
        |assistant| {
            assistant.push_text("analyst", "Sales went up.");
            assistant.push_text("analyst", "Q4 sales went up.");
            assistant.push_json("__yao.validation", json!({"passed": true, "score": 0.1}));
            assistant.push_text("analyst", "Q4 sales went up 12% to 1.2M.");
            assistant.push_json("__yao.validation", json!({"passed": true, "score": 0.9}));
        },
        &task,
    );

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, Some(json!("Q4 sales went up 12% to 1.2M.")));
    let validation = result.validation.expect("validation");
    assert!(validation.complete);

    let turns = assistant.calls_for("analyst");
    assert_eq!(turns.len(), 3);
    let second = turns[1].messages.last().expect("input").text();
    assert!(second.contains("Your response did not pass validation"));
    assert!(second.contains("Expected output: a summary naming the quarter"));
    let third = turns[2].messages.last().expect("input").text();
    assert!(third.contains("score: 0.55"));
    assert_eq!(turns[2].messages.len(), 5);
    assert!(
        turns
            .iter()
            .all(|call| call.chat_id.as_deref() == Some("robot-r1-task-report"))
    );
}

/// Two questions in a reply make the runner answer with a proceed prompt.
#[test]
fn clarifying_questions_get_proceed_reply() {
    let mut task = task("plan", ExecutorKind::Assistant, "analyst");
    task.expected_output = Some("a plan".to_string());

    let (result, assistant) = run_task(
        |assistant| {
            assistant.push_text("analyst", "Which region? Which quarter?");
            assistant.push_json(
                "__yao.validation",
                json!({"passed": false, "score": 0.2, "issues": ["no plan given"]}),
            );
            assistant.push_text("analyst", "Plan: review all regions for Q4.");
            assistant.push_json("__yao.validation", json!({"passed": true, "score": 0.8}));
        },
        &task,
    );

    assert!(result.success, "{:?}", result.error);
    let turns = assistant.calls_for("analyst");
    let second = turns[1].messages.last().expect("input").text();
    assert!(second.starts_with("Please proceed with the task based on the available information."));
    assert!(second.contains("**Expected Output**: a plan"));
}

/// A failed verdict without suggestions gives the runner nothing to send back.
#[test]
fn failed_verdict_without_suggestions_ends_task() {
    let mut task = task("plan", ExecutorKind::Assistant, "analyst");
    task.expected_output = Some("a plan".to_string());

    let (result, assistant) = run_task(
        |assistant| {
            assistant.push_text("analyst", "Here is something unrelated.");
            assistant.push_json(
                "__yao.validation",
                json!({"passed": false, "score": 0.2, "issues": ["off topic"]}),
            );
        },
        &task,
    );

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("validation failed: off topic"));
    assert_eq!(assistant.calls_for("analyst").len(), 1);
}

/// A rejected structured reply is part of the history the next turn sees.
#[test]
fn rejected_structured_reply_is_visible_on_next_turn() {
    let mut task = task("count", ExecutorKind::Assistant, "analyst");
    task.validation_rules = vec![r#"{"type":"contains","value":"X"}"#.to_string()];

    let (result, assistant) = run_task(
        |assistant| {
            assistant.push_json("analyst", json!({"total": 1}));
            assistant.push_json("analyst", json!({"total": 1, "label": "X"}));
        },
        &task,
    );

    assert!(result.success, "{:?}", result.error);
    let turns = assistant.calls_for("analyst");
    assert_eq!(turns.len(), 2);
    let history = &turns[1].messages;
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::User]);
    assert_eq!(history[1].text(), r#"{"total":1}"#);
    assert!(history[2].text().contains("did not pass validation"));
}
