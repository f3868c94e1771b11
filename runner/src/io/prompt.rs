//! Phase prompt rendering.
//!
//! Templates live next to this module and are compiled into the binary. Each
//! `render_*` function builds a serializable view of the inputs and renders
//! one template; JSON payloads are pretty-printed before they reach the
//! template so the engine never needs JSON filters.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;

use crate::core::json::truncate_chars;
use crate::core::types::{
    ClockContext, Execution, Goals, InspirationReport, Task, TaskResult, TriggerInput,
};
use crate::robot::Robot;

const TEMPLATES: [(&str, &str); 9] = [
    ("identity", include_str!("prompts/identity.md")),
    ("resources", include_str!("prompts/resources.md")),
    ("inspiration", include_str!("prompts/inspiration.md")),
    ("goals", include_str!("prompts/goals.md")),
    ("tasks", include_str!("prompts/tasks.md")),
    ("delivery", include_str!("prompts/delivery.md")),
    ("learning", include_str!("prompts/learning.md")),
    ("semantic_validation", include_str!("prompts/semantic_validation.md")),
    ("previous_results", include_str!("prompts/previous_results.md")),
];

static ENGINE: LazyLock<Result<Environment<'static>, String>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        env.add_template(name, source)
            .map_err(|err| format!("template {name}: {err}"))?;
    }
    Ok(env)
});

fn render(name: &str, ctx: minijinja::Value) -> Result<String> {
    let env = ENGINE
        .as_ref()
        .map_err(|err| anyhow!("load prompt templates: {err}"))?;
    let rendered = env.get_template(name)?.render(ctx)?;
    Ok(tidy(&rendered))
}

/// Collapse runs of blank lines left behind by skipped sections.
fn tidy(rendered: &str) -> String {
    let mut out = String::with_capacity(rendered.len());
    let mut blank_run = 0;
    for line in rendered.trim().lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Robot fields shared by the identity and resources partials.
fn robot_context(robot: &Robot) -> minijinja::Value {
    context! {
        identity => robot.identity.as_ref(),
        display_name => robot.display_name.as_str(),
        system_prompt => robot.system_prompt.trim(),
        agents => &robot.resources.agents,
        mcp => &robot.resources.mcp,
    }
}

pub fn render_inspiration(clock: &ClockContext, robot: &Robot) -> Result<String> {
    render(
        "inspiration",
        context! { clock => clock, ..robot_context(robot) },
    )
}

/// Goals input: the inspiration report for clock runs, the trigger input for
/// human and event runs, and the bare clock as a last resort.
pub fn render_goals(
    inspiration: Option<&InspirationReport>,
    trigger: Option<&TriggerInput>,
    clock: Option<&ClockContext>,
    robot: &Robot,
) -> Result<String> {
    let trigger_text = trigger.map(|input| {
        input
            .messages
            .iter()
            .map(|message| message.text())
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    });
    let trigger_data = trigger.and_then(|input| input.data.as_ref()).map(pretty);
    render(
        "goals",
        context! {
            inspiration => inspiration,
            trigger => trigger,
            trigger_text => trigger_text.filter(|text| !text.is_empty()),
            trigger_data => trigger_data,
            clock => clock,
            ..robot_context(robot)
        },
    )
}

pub fn render_tasks(goals: &Goals, robot: &Robot) -> Result<String> {
    render("tasks", context! { goals => goals, ..robot_context(robot) })
}

#[derive(Serialize)]
struct TaskLine<'a> {
    id: &'a str,
    summary: String,
    executor_id: &'a str,
    executor_type: &'a str,
    status: String,
    expected: Option<&'a str>,
}

impl<'a> TaskLine<'a> {
    fn from_task(task: &'a Task) -> Self {
        let summary = task
            .messages
            .iter()
            .map(|message| message.text())
            .find(|text| !text.is_empty())
            .map(|text| truncate_chars(&text, 100))
            .or_else(|| task.goal_ref.clone())
            .unwrap_or_else(|| format!("Task {}", task.id));
        Self {
            id: &task.id,
            summary,
            executor_id: &task.executor_id,
            executor_type: task.executor_type.as_str(),
            status: enum_label(&task.status),
            expected: task.expected_output_text(),
        }
    }
}

#[derive(Serialize)]
struct ResultLine<'a> {
    task_id: &'a str,
    success: bool,
    duration_ms: u64,
    validation: Option<String>,
    output: Option<String>,
    error: Option<&'a str>,
}

impl<'a> ResultLine<'a> {
    fn from_result(result: &'a TaskResult) -> Self {
        let validation = result.validation.as_ref().map(|validation| {
            if validation.passed {
                format!("✓ Passed (score: {:.2})", validation.score)
            } else if validation.issues.is_empty() {
                "✗ Failed".to_string()
            } else {
                format!("✗ Failed ({})", validation.issues.join("; "))
            }
        });
        Self {
            task_id: &result.task_id,
            success: result.success,
            duration_ms: result.duration_ms,
            validation,
            output: result.output.as_ref().map(pretty),
            error: result.error.as_deref(),
        }
    }
}

fn enum_label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(label)) => label,
        _ => String::new(),
    }
}

pub fn render_delivery(exec: &Execution, robot: &Robot) -> Result<String> {
    let (succeeded, failed) = exec.result_counts();
    render(
        "delivery",
        context! {
            trigger => exec.trigger.as_str(),
            status => enum_label(&exec.status),
            start_time => exec.start_time.as_str(),
            inspiration => exec.inspiration.as_ref().map(|report| report.content.as_str()),
            goals => exec.goals.as_ref().map(|goals| goals.content.as_str()),
            tasks => exec.tasks.iter().map(TaskLine::from_task).collect::<Vec<_>>(),
            results => exec.results.iter().map(ResultLine::from_result).collect::<Vec<_>>(),
            succeeded => succeeded,
            failed => failed,
            ..robot_context(robot)
        },
    )
}

pub fn render_learning(exec: &Execution) -> Result<String> {
    let delivery = exec.delivery.as_ref().map(|delivery| {
        context! {
            summary => delivery.content.summary.as_str(),
            success => delivery.success,
            error => delivery.error.as_deref().unwrap_or_default(),
            channels => delivery.results.len(),
        }
    });
    render(
        "learning",
        context! {
            id => exec.id.as_str(),
            trigger => exec.trigger.as_str(),
            status => enum_label(&exec.status),
            start_time => exec.start_time.as_str(),
            error => exec.error.as_deref(),
            inspiration => exec.inspiration.as_ref().map(|report| report.content.as_str()),
            goals => exec.goals.as_ref().map(|goals| goals.content.as_str()),
            tasks => exec.tasks.iter().map(TaskLine::from_task).collect::<Vec<_>>(),
            results => exec.results.iter().map(ResultLine::from_result).collect::<Vec<_>>(),
            delivery => delivery,
        },
    )
}

/// Prompt for the validation assistant: `Task`, `Result` and
/// `Success Criteria` sections.
pub fn render_semantic_validation(
    task: &Task,
    output: Option<&Value>,
    semantic_rules: &[String],
) -> Result<String> {
    let instructions: Vec<String> = task
        .messages
        .iter()
        .filter_map(|message| message.content.as_str())
        .map(str::to_string)
        .collect();
    render(
        "semantic_validation",
        context! {
            task_id => task.id.as_str(),
            executor_id => task.executor_id.as_str(),
            executor_type => task.executor_type.as_str(),
            instructions => instructions,
            expected_output => task.expected_output_text(),
            rules => semantic_rules,
            output => output.filter(|value| !value.is_null()).map(pretty),
        },
    )
}

/// Context block listing earlier task results, or `None` when there are none.
pub fn render_previous_results(results: &[TaskResult]) -> Result<Option<String>> {
    if results.is_empty() {
        return Ok(None);
    }
    let lines: Vec<ResultLine<'_>> = results.iter().map(ResultLine::from_result).collect();
    render("previous_results", context! { results => lines }).map(Some)
}
