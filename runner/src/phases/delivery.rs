//! Delivery: summarize the execution and send it to the robot's targets.

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::info;

use crate::core::types::{DeliveryContent, DeliveryResult, Execution, Phase};
use crate::io::delivery::DeliveryContext;
use crate::io::prompt::render_delivery;
use crate::phases::PhaseEnv;

const SUMMARY_CHARS: usize = 200;

pub fn run(env: &PhaseEnv<'_>, exec: &mut Execution) -> Result<()> {
    let prompt = render_delivery(exec, env.robot)?;
    let (agent_id, reply) = env.ask_phase_agent(Phase::Delivery, &prompt)?;

    let content = match reply.json() {
        Some(data) => parse_delivery_content(&data)
            .ok_or_else(|| anyhow!("delivery agent ({agent_id}) returned invalid content"))?,
        None => {
            let text = reply.text();
            if text.trim().is_empty() {
                bail!("delivery agent ({agent_id}) returned empty response");
            }
            DeliveryContent {
                summary: truncate_summary(&text, SUMMARY_CHARS),
                body: text,
                attachments: Vec::new(),
            }
        }
    };

    let context = DeliveryContext {
        execution_id: exec.id.clone(),
        member_id: exec.member_id.clone(),
        team_id: exec.team_id.clone(),
        trigger: exec.trigger,
    };
    let fan_out = env
        .delivery
        .deliver(env.ctx, &content, &context, &env.robot.delivery.targets);
    let success = fan_out.first_error.is_none() && fan_out.all_succeeded();
    info!(channels = fan_out.results.len(), success, "delivery finished");

    let first_error = fan_out.first_error.clone();
    exec.delivery = Some(DeliveryResult {
        request_id: request_id(&exec.id),
        content,
        results: fan_out.results,
        success,
        error: fan_out.first_error,
    });
    match first_error {
        Some(error) => Err(anyhow!(error)),
        None => Ok(()),
    }
}

/// Content from `{"content": {...}}` or from the object itself.
///
/// Needs a summary or a body; attachments need a title and a file.
fn parse_delivery_content(data: &Map<String, Value>) -> Option<DeliveryContent> {
    let fields = data
        .get("content")
        .and_then(Value::as_object)
        .unwrap_or(data);
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let content = DeliveryContent {
        summary: text("summary"),
        body: text("body"),
        attachments: fields
            .get("attachments")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter(|item| is_attachment(item)).cloned().collect())
            .unwrap_or_default(),
    };
    (!content.summary.is_empty() || !content.body.is_empty()).then_some(content)
}

fn is_attachment(item: &Value) -> bool {
    let non_empty = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .is_some_and(|value| !value.is_empty())
    };
    non_empty("title") && non_empty("file")
}

/// Cut `text` to `max_chars`, preferring a word boundary in the second half.
fn truncate_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    match truncated.rfind(' ') {
        Some(idx) if idx > truncated.len() / 2 => format!("{}...", &truncated[..idx]),
        _ => format!("{truncated}..."),
    }
}

fn request_id(execution_id: &str) -> String {
    let nanos = Utc::now().timestamp_subsec_nanos() % 1_000_000;
    format!("dlv-{execution_id}-{nanos}")
}
