//! Task plan parsing and validation.
//!
//! The planning assistant returns `{"tasks": [...]}`. Parsing is lenient about
//! optional fields and strict about the executor, so that a plan either yields
//! runnable tasks or a precise error.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{Draft, Validator};
use serde_json::{Map, Value};

use crate::core::types::{ExecutorKind, Message, Role, Task, TaskSource, TaskStatus};

const TASK_PLAN_SCHEMA: &str = include_str!("../../schemas/task_plan.schema.json");

static PLAN_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(TASK_PLAN_SCHEMA).map_err(|err| err.to_string())?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| err.to_string())
});

/// Check a plan document against the task plan schema.
pub fn validate_plan_shape(plan: &Value) -> Result<()> {
    let validator = PLAN_VALIDATOR
        .as_ref()
        .map_err(|err| anyhow!("compile task plan schema: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(plan)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// Parse a list of raw task objects and sort them by `order`.
pub fn parse_tasks(items: &[Value]) -> Result<Vec<Task>> {
    let mut tasks = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let map = item
            .as_object()
            .ok_or_else(|| anyhow!("task {index} is not a valid object"))?;
        let task = parse_task(map, index).with_context(|| format!("task {index}"))?;
        tasks.push(task);
    }
    sort_tasks_by_order(&mut tasks);
    Ok(tasks)
}

/// Parse one raw task object. `index` supplies the default id and order.
pub fn parse_task(data: &Map<String, Value>, index: usize) -> Result<Task> {
    let str_field = |key: &str| data.get(key).and_then(Value::as_str);

    let id = str_field("id")
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("task-{:03}", index + 1));
    let executor_type = str_field("executor_type")
        .map(ExecutorKind::from_label)
        .ok_or_else(|| anyhow!("missing executor_type"))?;
    let executor_id = str_field("executor_id")
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing executor_id"))?;

    let mut messages = data
        .get("messages")
        .and_then(Value::as_array)
        .map(|items| parse_messages(items))
        .unwrap_or_default();
    if messages.is_empty()
        && let Some(description) = str_field("description").filter(|d| !d.is_empty())
    {
        messages.push(Message::user(description));
    }

    let order = data
        .get("order")
        .and_then(Value::as_f64)
        .map(|order| order as i64)
        .unwrap_or(index as i64);

    Ok(Task {
        id,
        messages,
        goal_ref: str_field("goal_ref").map(str::to_string),
        source: str_field("source")
            .map(TaskSource::from_label)
            .unwrap_or_default(),
        executor_type,
        executor_id,
        args: data
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        expected_output: str_field("expected_output").map(str::to_string),
        validation_rules: data
            .get("validation_rules")
            .and_then(Value::as_array)
            .map(|rules| {
                rules
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        status: TaskStatus::Pending,
        order,
        start_time: None,
        end_time: None,
    })
}

/// Parse `{role, content}` objects, skipping entries without content.
pub fn parse_messages(items: &[Value]) -> Vec<Message> {
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|map| {
            let content = map.get("content").filter(|c| !c.is_null())?.clone();
            let role = match map.get("role").and_then(Value::as_str) {
                Some("system") => Role::System,
                Some("assistant") => Role::Assistant,
                _ => Role::User,
            };
            Some(Message { role, content })
        })
        .collect()
}

/// Stable ascending sort by `order`.
pub fn sort_tasks_by_order(tasks: &mut [Task]) {
    tasks.sort_by_key(|task| task.order);
}

/// Structural checks every plan must pass before execution.
pub fn validate_tasks(tasks: &[Task]) -> Result<()> {
    if tasks.is_empty() {
        bail!("no tasks generated");
    }
    let mut seen = HashSet::new();
    for (index, task) in tasks.iter().enumerate() {
        if !seen.insert(task.id.as_str()) {
            bail!("task {index}: duplicate task ID '{}'", task.id);
        }
        if task.executor_id.is_empty() {
            bail!("task {index} ({}): missing executor_id", task.id);
        }
        if task.messages.is_empty() {
            bail!("task {index} ({}): missing messages or description", task.id);
        }
    }
    Ok(())
}

/// Validate tasks, then report executors the robot does not declare.
///
/// Unknown executors are warnings only; they fail at run time if they truly
/// do not exist.
pub fn validate_tasks_with_resources<F>(tasks: &[Task], executor_exists: F) -> Result<Vec<String>>
where
    F: Fn(&Task) -> bool,
{
    validate_tasks(tasks)?;
    Ok(tasks
        .iter()
        .filter(|task| !executor_exists(task))
        .map(|task| {
            format!(
                "task {}: executor '{}' ({}) not found in available resources",
                task.id,
                task.executor_id,
                task.executor_type.as_str()
            )
        })
        .collect())
}
