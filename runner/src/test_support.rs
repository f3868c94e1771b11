//! Test-only doubles and builders.
//!
//! Scripted backends replay queued replies per executor id and record every
//! call, so tests can assert on prompts and chat ids without spawning
//! processes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use serde_json::{Map, Value, json};

use crate::context::RunContext;
use crate::core::types::{
    DeliveryContent, ExecStatus, Execution, ExecutorKind, Goals, Message, Phase, Task,
    TaskResult, TaskSource, TaskStatus, TriggerInput, TriggerKind, ValidationResult,
};
use crate::io::assistant::{Assistant, AssistantRequest, CallResult};
use crate::io::delivery::{DeliveryChannel, DeliveryContext};
use crate::io::tools::{ProcessRunner, ToolCaller};
use crate::robot::Robot;
use crate::task_runner::Backends;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-key FIFO of scripted outcomes.
struct Script<T> {
    queues: Mutex<HashMap<String, VecDeque<Result<T, String>>>>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> Script<T> {
    fn push(&self, key: &str, outcome: Result<T, String>) {
        lock(&self.queues)
            .entry(key.to_string())
            .or_default()
            .push_back(outcome);
    }

    fn next(&self, key: &str) -> Result<T> {
        lock(&self.queues)
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted reply for {key}"))?
            .map_err(|message| anyhow!(message))
    }
}

/// A call observed by [`ScriptedAssistant`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub assistant_id: String,
    pub chat_id: Option<String>,
    pub messages: Vec<Message>,
}

/// Assistant that replays queued replies per assistant id.
#[derive(Default)]
pub struct ScriptedAssistant {
    script: Script<CallResult>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, assistant_id: &str, text: &str) {
        self.script.push(assistant_id, Ok(CallResult::text_only(text)));
    }

    /// Queue a structured reply carried in `next`.
    pub fn push_json(&self, assistant_id: &str, value: Value) {
        self.script.push(
            assistant_id,
            Ok(CallResult {
                content: String::new(),
                next: Some(value),
            }),
        );
    }

    pub fn push_error(&self, assistant_id: &str, message: &str) {
        self.script.push(assistant_id, Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, assistant_id: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.assistant_id == assistant_id)
            .collect()
    }
}

impl Assistant for ScriptedAssistant {
    fn call(&self, ctx: &RunContext, request: &AssistantRequest<'_>) -> Result<CallResult> {
        ctx.check()?;
        lock(&self.calls).push(RecordedCall {
            assistant_id: request.assistant_id.to_string(),
            chat_id: request.chat_id.map(str::to_string),
            messages: request.messages.to_vec(),
        });
        self.script.next(request.assistant_id)
    }
}

/// A call observed by [`ScriptedTools`].
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub client: String,
    pub tool: String,
    pub arguments: Value,
}

/// Tool caller keyed by `client.tool`.
#[derive(Default)]
pub struct ScriptedTools {
    script: Script<Value>,
    calls: Mutex<Vec<ToolCall>>,
}

impl ScriptedTools {
    pub fn push_ok(&self, client: &str, tool: &str, output: Value) {
        self.script.push(&format!("{client}.{tool}"), Ok(output));
    }

    pub fn push_error(&self, client: &str, tool: &str, message: &str) {
        self.script
            .push(&format!("{client}.{tool}"), Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        lock(&self.calls).clone()
    }
}

impl ToolCaller for ScriptedTools {
    fn call_tool(
        &self,
        ctx: &RunContext,
        client: &str,
        tool: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        ctx.check()?;
        lock(&self.calls).push(ToolCall {
            client: client.to_string(),
            tool: tool.to_string(),
            arguments: Value::Object(arguments.clone()),
        });
        self.script.next(&format!("{client}.{tool}"))
    }
}

/// Process runner keyed by process name.
#[derive(Default)]
pub struct ScriptedProcesses {
    script: Script<Value>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedProcesses {
    pub fn push_ok(&self, name: &str, output: Value) {
        self.script.push(name, Ok(output));
    }

    pub fn push_error(&self, name: &str, message: &str) {
        self.script.push(name, Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        lock(&self.calls).clone()
    }
}

impl ProcessRunner for ScriptedProcesses {
    fn run(&self, ctx: &RunContext, name: &str, args: &[Value]) -> Result<Value> {
        ctx.check()?;
        lock(&self.calls).push((name.to_string(), args.to_vec()));
        self.script.next(name)
    }
}

/// Backends wired to fresh scripted doubles, returned alongside for scripting.
pub fn backends() -> (
    Backends,
    Arc<ScriptedAssistant>,
    Arc<ScriptedTools>,
    Arc<ScriptedProcesses>,
) {
    let assistant = Arc::new(ScriptedAssistant::new());
    let tools = Arc::new(ScriptedTools::default());
    let processes = Arc::new(ScriptedProcesses::default());
    let backends = Backends {
        assistant: assistant.clone(),
        tools: tools.clone(),
        processes: processes.clone(),
    };
    (backends, assistant, tools, processes)
}

/// Something a [`RecordingChannel`] sent.
#[derive(Debug, Clone)]
pub struct SentDelivery {
    pub content: DeliveryContent,
    pub execution_id: String,
    pub target: String,
}

/// Delivery channel that records sends, or always fails.
pub struct RecordingChannel {
    kind: String,
    failure: Option<String>,
    sent: Arc<Mutex<Vec<SentDelivery>>>,
}

impl RecordingChannel {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            failure: None,
            sent: Arc::default(),
        }
    }

    pub fn failing(kind: &str, message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(kind)
        }
    }

    /// Shared handle to the sent log; stays valid after the channel is boxed.
    pub fn sent(&self) -> Arc<Mutex<Vec<SentDelivery>>> {
        Arc::clone(&self.sent)
    }
}

impl DeliveryChannel for RecordingChannel {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn send(
        &self,
        _ctx: &RunContext,
        content: &DeliveryContent,
        delivery: &DeliveryContext,
        target: &str,
    ) -> Result<Option<Value>> {
        if let Some(message) = &self.failure {
            return Err(anyhow!(message.clone()));
        }
        lock(&self.sent).push(SentDelivery {
            content: content.clone(),
            execution_id: delivery.execution_id.clone(),
            target: target.to_string(),
        });
        Ok(Some(json!({"target": target})))
    }
}

/// Robot with one delegate assistant (`analyst`) and default phase agents.
pub fn robot(member_id: &str) -> Robot {
    let mut robot = Robot::new(member_id, "team-1");
    robot.display_name = format!("{member_id} bot");
    robot.resources.agents = vec!["analyst".to_string()];
    robot
}

/// Pending task whose only message is `Do task <id>`.
pub fn task(id: &str, kind: ExecutorKind, executor_id: &str) -> Task {
    Task {
        id: id.to_string(),
        messages: vec![Message::user(format!("Do task {id}"))],
        goal_ref: None,
        source: TaskSource::Auto,
        executor_type: kind,
        executor_id: executor_id.to_string(),
        args: Vec::new(),
        expected_output: None,
        validation_rules: Vec::new(),
        status: TaskStatus::Pending,
        order: 0,
        start_time: None,
        end_time: None,
    }
}

/// Completed human-triggered execution with one task and its result.
pub fn execution(id: &str) -> Execution {
    let task = task("t1", ExecutorKind::Assistant, "analyst");
    Execution {
        id: id.to_string(),
        member_id: "r1".to_string(),
        team_id: "team-1".to_string(),
        trigger: TriggerKind::Human,
        start_time: "2026-01-05T09:00:00+00:00".to_string(),
        end_time: Some("2026-01-05T09:01:00+00:00".to_string()),
        status: ExecStatus::Completed,
        phase: Phase::Learning,
        error: None,
        input: Some(TriggerInput {
            messages: vec![Message::user("Summarize Q4")],
            ..TriggerInput::default()
        }),
        inspiration: None,
        goals: Some(Goals {
            content: "1. Summarize Q4 sales".to_string(),
            delivery: None,
        }),
        tasks: vec![Task {
            status: TaskStatus::Completed,
            ..task
        }],
        current: None,
        results: vec![TaskResult {
            task_id: "t1".to_string(),
            success: true,
            output: Some(json!({"total": 100})),
            error: None,
            duration_ms: 12,
            validated: true,
            validation: Some(ValidationResult {
                passed: true,
                score: 1.0,
                complete: true,
                ..ValidationResult::default()
            }),
        }],
        delivery: None,
        learning: Vec::new(),
    }
}
