//! Goals: decide what this execution should achieve.
//!
//! Clock runs plan from the inspiration report (or the bare clock when there
//! is none). Human and event runs plan from the trigger input. A robot with an
//! identity can still plan without any input.

use anyhow::{Result, bail};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::core::types::{Execution, GoalDelivery, Goals, Phase, TriggerKind};
use crate::io::prompt::render_goals;
use crate::phases::PhaseEnv;
use crate::phases::inspiration::clock_context;

const DELIVERY_TYPES: [&str; 4] = ["email", "webhook", "file", "notify"];

pub fn is_valid_delivery_type(kind: &str) -> bool {
    DELIVERY_TYPES.contains(&kind)
}

pub fn run(env: &PhaseEnv<'_>, exec: &mut Execution) -> Result<()> {
    let prompt = match exec.trigger {
        TriggerKind::Clock => {
            let clock = exec
                .inspiration
                .is_none()
                .then(|| clock_context(Utc::now()));
            render_goals(exec.inspiration.as_ref(), None, clock.as_ref(), env.robot)?
        }
        TriggerKind::Human | TriggerKind::Event => {
            let input = exec.input.as_ref().filter(|input| !input.is_empty());
            if input.is_none() && env.robot.identity.is_none() {
                bail!("no input available for goals generation");
            }
            render_goals(None, input, None, env.robot)?
        }
    };

    let (agent_id, reply) = env.ask_phase_agent(Phase::Goals, &prompt)?;
    let goals = match reply.json() {
        Some(data) => parse_goals(&data),
        None => None,
    }
    .unwrap_or_else(|| Goals {
        content: reply.text(),
        delivery: None,
    });
    if goals.content.trim().is_empty() {
        bail!("goals agent ({agent_id}) returned empty response");
    }
    if let Some(delivery) = &goals.delivery
        && !is_valid_delivery_type(&delivery.kind)
    {
        warn!(kind = %delivery.kind, "goals requested an unknown delivery type");
    }
    info!(
        chars = goals.content.len(),
        delivery = goals.delivery.is_some(),
        "goals ready"
    );
    exec.goals = Some(goals);
    Ok(())
}

/// Goals from a structured reply: `content` plus an optional `delivery`.
fn parse_goals(data: &Map<String, Value>) -> Option<Goals> {
    let content = data.get("content").and_then(Value::as_str)?;
    let delivery = data
        .get("delivery")
        .and_then(Value::as_object)
        .and_then(parse_delivery);
    Some(Goals {
        content: content.to_string(),
        delivery,
    })
}

fn parse_delivery(data: &Map<String, Value>) -> Option<GoalDelivery> {
    let kind = data.get("type").and_then(Value::as_str)?;
    let recipients = data
        .get("recipients")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(GoalDelivery {
        kind: kind.to_string(),
        recipients,
    })
}
