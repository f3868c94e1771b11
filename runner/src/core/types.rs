//! Shared deterministic types for the execution engine.
//!
//! These types define the contracts between the pipeline, the task runner and
//! the validator. They carry no behaviour beyond small derived helpers and
//! serialize to the JSON shape written into execution records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the six fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Inspiration,
    Goals,
    Tasks,
    Run,
    Delivery,
    Learning,
}

impl Phase {
    /// Every phase in pipeline order.
    pub const ALL: [Phase; 6] = [
        Phase::Inspiration,
        Phase::Goals,
        Phase::Tasks,
        Phase::Run,
        Phase::Delivery,
        Phase::Learning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Inspiration => "inspiration",
            Phase::Goals => "goals",
            Phase::Tasks => "tasks",
            Phase::Run => "run",
            Phase::Delivery => "delivery",
            Phase::Learning => "learning",
        }
    }

    /// Position of the phase within [`Phase::ALL`].
    pub fn index(self) -> usize {
        Phase::ALL
            .iter()
            .position(|phase| *phase == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused an execution to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Scheduled (time-based) trigger.
    Clock,
    /// A person asked the robot to do something.
    Human,
    /// An external event arrived (webhook, database change).
    Event,
}

impl TriggerKind {
    /// First phase to run for this trigger.
    ///
    /// Inspiration only makes sense for time-based runs, so human and event
    /// triggers start directly at goals.
    pub fn start_phase(self) -> Phase {
        match self {
            TriggerKind::Clock => Phase::Inspiration,
            TriggerKind::Human | TriggerKind::Event => Phase::Goals,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Clock => "clock",
            TriggerKind::Human => "human",
            TriggerKind::Event => "event",
        }
    }
}

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecStatus::Completed | ExecStatus::Failed | ExecStatus::Cancelled
        )
    }
}

/// Lifecycle status of a planned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Which backend executes a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Multi-turn assistant conversation.
    #[default]
    Assistant,
    /// External tool addressed as `client.tool`.
    Mcp,
    /// Named subprocess with positional arguments.
    Process,
}

impl ExecutorKind {
    /// Map a planner-supplied executor label onto a kind.
    ///
    /// Unrecognized labels fall back to the assistant kind.
    pub fn from_label(label: &str) -> Self {
        match label {
            "agent" | "assistant" => ExecutorKind::Assistant,
            "mcp" => ExecutorKind::Mcp,
            "process" => ExecutorKind::Process,
            _ => ExecutorKind::Assistant,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::Assistant => "assistant",
            ExecutorKind::Mcp => "mcp",
            ExecutorKind::Process => "process",
        }
    }
}

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    #[default]
    Auto,
    Human,
    Event,
}

impl TaskSource {
    pub fn from_label(label: &str) -> Self {
        match label {
            "human" => TaskSource::Human,
            "event" => TaskSource::Event,
            _ => TaskSource::Auto,
        }
    }
}

/// Conversation role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message. `content` is either a plain string or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Value,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Value::String(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Text view of the content.
    ///
    /// Strings are returned as-is, multipart content yields its `text` parts
    /// joined by newlines, and anything else is rendered as JSON.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Array(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
                if texts.is_empty() {
                    self.content.to_string()
                } else {
                    texts.join("\n")
                }
            }
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// A unit of work produced by the planning phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_ref: Option<String>,
    #[serde(default)]
    pub source: TaskSource,
    pub executor_type: ExecutorKind,
    pub executor_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_rules: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl Task {
    /// Expected output text, if present and non-blank.
    pub fn expected_output_text(&self) -> Option<&str> {
        self.expected_output
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// Verdict produced by the validator for one turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Rule and semantic checks succeeded.
    pub passed: bool,
    /// Confidence in the range `0.0..=1.0`.
    pub score: f64,
    /// The expected result was actually obtained.
    pub complete: bool,
    /// The conversation should continue with `reply_content`.
    pub need_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Outcome of running one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub validated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

/// Wall-clock context handed to time-triggered phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockContext {
    /// RFC 3339 timestamp (UTC).
    pub now: String,
    pub date: String,
    pub time: String,
    pub weekday: String,
    pub hour: u32,
}

/// Inspiration phase output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspirationReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<ClockContext>,
    pub content: String,
}

/// Delivery preference attached to goals by the goals agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDelivery {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
}

/// Goals phase output (markdown).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goals {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<GoalDelivery>,
}

/// Content produced for delivery channels.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeliveryContent {
    pub summary: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Value>,
}

/// Result of sending to one delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub kind: String,
    pub target: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Delivery phase output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub request_id: String,
    pub content: DeliveryContent,
    pub results: Vec<ChannelResult>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningKind {
    Execution,
    Feedback,
    Insight,
}

/// Knowledge extracted by the learning phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    #[serde(rename = "type")]
    pub kind: LearningKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Input captured from the trigger, stored for traceability.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TriggerInput {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.data.is_none() && self.event_type.is_none()
    }
}

/// Currently executing task within the run phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    pub task_index: usize,
    pub task_id: String,
    /// Human-readable progress such as `2/5`.
    pub progress: String,
}

/// One run of a robot through the pipeline.
///
/// `phase` always reflects the last phase attempted. `status` becomes terminal
/// exactly once, after which no further phase runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub member_id: String,
    pub team_id: String,
    pub trigger: TriggerKind,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub status: ExecStatus,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<TriggerInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspiration: Option<InspirationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goals: Option<Goals>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub learning: Vec<LearningEntry>,
}

impl Execution {
    /// Number of succeeded and failed task results.
    pub fn result_counts(&self) -> (usize, usize) {
        let succeeded = self.results.iter().filter(|r| r.success).count();
        (succeeded, self.results.len() - succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_trigger_starts_at_inspiration() {
        assert_eq!(TriggerKind::Clock.start_phase(), Phase::Inspiration);
        assert_eq!(TriggerKind::Human.start_phase(), Phase::Goals);
        assert_eq!(TriggerKind::Event.start_phase(), Phase::Goals);
    }

    #[test]
    fn phase_index_follows_pipeline_order() {
        let indices: Vec<usize> = Phase::ALL.iter().map(|phase| phase.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(Phase::Run.to_string(), "run");
    }

    /// Executor labels are case-sensitive; unknown labels fall back to assistant.
    #[test]
    fn executor_labels_map_to_kinds() {
        assert_eq!(ExecutorKind::from_label("agent"), ExecutorKind::Assistant);
        assert_eq!(ExecutorKind::from_label("mcp"), ExecutorKind::Mcp);
        assert_eq!(ExecutorKind::from_label("process"), ExecutorKind::Process);
        assert_eq!(ExecutorKind::from_label("MCP"), ExecutorKind::Assistant);
    }

    #[test]
    fn multipart_message_text_joins_text_parts() {
        let message = Message {
            role: Role::User,
            content: serde_json::json!([
                {"type": "text", "text": "first"},
                {"type": "image_url", "image_url": {"url": "x"}},
                {"type": "text", "text": "second"}
            ]),
        };
        assert_eq!(message.text(), "first\nsecond");
    }

    #[test]
    fn learning_entry_serializes_kind_as_type() {
        let entry = LearningEntry {
            kind: LearningKind::Insight,
            content: "c".to_string(),
            tags: Vec::new(),
        };
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["type"], "insight");
    }
}
