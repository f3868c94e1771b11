//! Learning: extract what this execution taught the robot.

use anyhow::Result;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::types::{Execution, LearningEntry, LearningKind, Phase};
use crate::io::prompt::render_learning;
use crate::phases::PhaseEnv;

pub fn run(env: &PhaseEnv<'_>, exec: &mut Execution) -> Result<()> {
    let prompt = render_learning(exec)?;
    let (agent_id, reply) = env.ask_phase_agent(Phase::Learning, &prompt)?;

    let mut entries: Vec<LearningEntry> = reply
        .json_array()
        .map(|items| items.iter().filter_map(parse_entry).collect())
        .unwrap_or_default();
    if entries.is_empty() {
        let text = reply.text();
        if text.trim().is_empty() {
            warn!(agent_id = %agent_id, "learning agent returned nothing");
        } else {
            entries.push(LearningEntry {
                kind: LearningKind::Execution,
                content: text,
                tags: Vec::new(),
            });
        }
    }
    info!(entries = entries.len(), "learning recorded");
    exec.learning = entries;
    Ok(())
}

fn parse_entry(item: &Value) -> Option<LearningEntry> {
    let content = item
        .get("content")
        .and_then(Value::as_str)
        .filter(|content| !content.trim().is_empty())?;
    let kind = item
        .get("type")
        .cloned()
        .and_then(|kind| serde_json::from_value(kind).ok())
        .unwrap_or(LearningKind::Execution);
    let tags = item
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(LearningEntry {
        kind,
        content: content.to_string(),
        tags,
    })
}
