//! Assistant abstraction for language-model calls.
//!
//! The [`Assistant`] trait decouples the engine from the actual model backend.
//! [`CommandAssistant`] bridges to any program that reads a JSON request on
//! stdin and prints a reply; tests use scripted assistants that return
//! predetermined replies without spawning processes.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::context::RunContext;
use crate::core::json::extract_json;
use crate::core::types::Message;
use crate::io::process::{command_from_argv, run_command};

/// One call to an assistant.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantRequest<'a> {
    pub assistant_id: &'a str,
    /// Session key for multi-turn state; `None` for one-shot calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<&'a str>,
    pub messages: &'a [Message],
}

/// Abstraction over assistant backends.
pub trait Assistant: Send + Sync {
    /// Send `request.messages` to the assistant and return its reply.
    fn call(&self, ctx: &RunContext, request: &AssistantRequest<'_>) -> Result<CallResult>;
}

/// Reply from an assistant: raw text plus optional structured data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallResult {
    pub content: String,
    /// Structured data returned alongside the text, if any.
    pub next: Option<Value>,
}

impl CallResult {
    pub fn text_only(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            next: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.next.is_none()
    }

    /// Text view, preferring `content` and falling back to `next`.
    pub fn text(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        match &self.next {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Object(map)) => map
                .get("content")
                .and_then(Value::as_str)
                .or_else(|| {
                    map.get("data")
                        .and_then(|data| data.get("content"))
                        .and_then(Value::as_str)
                })
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }

    /// Text recorded in conversation history.
    ///
    /// Falls back to the serialized `next` when the reply has no text, so a
    /// structured-only reply stays visible to later turns.
    pub fn history_text(&self) -> String {
        let text = self.text();
        if !text.is_empty() {
            return text;
        }
        self.next
            .as_ref()
            .and_then(|next| serde_json::to_string(next).ok())
            .unwrap_or_default()
    }

    /// Structured view as a JSON object.
    ///
    /// Prefers `next` (unwrapping a `data` object), then JSON extracted from
    /// the text content.
    pub fn json(&self) -> Option<Map<String, Value>> {
        if let Some(Value::Object(map)) = &self.next {
            if let Some(Value::Object(data)) = map.get("data") {
                return Some(data.clone());
            }
            return Some(map.clone());
        }
        match extract_json(&self.content) {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    /// Structured view as a JSON array.
    pub fn json_array(&self) -> Option<Vec<Value>> {
        match &self.next {
            Some(Value::Array(items)) => return Some(items.clone()),
            Some(Value::Object(map)) => {
                if let Some(Value::Array(items)) = map.get("data") {
                    return Some(items.clone());
                }
            }
            _ => {}
        }
        match extract_json(&self.content) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        }
    }

    /// Task output: structured JSON when present, otherwise the text.
    pub fn output(&self) -> Value {
        if let Some(map) = self.json() {
            return Value::Object(map);
        }
        if let Some(items) = self.json_array() {
            return Value::Array(items);
        }
        Value::String(self.text())
    }
}

/// One-shot call with an optional system prompt and a single user message.
pub fn call_with_system_and_user(
    assistant: &dyn Assistant,
    ctx: &RunContext,
    assistant_id: &str,
    system: Option<&str>,
    user: &str,
) -> Result<CallResult> {
    ctx.check()?;
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(user));
    assistant.call(
        ctx,
        &AssistantRequest {
            assistant_id,
            chat_id: None,
            messages: &messages,
        },
    )
}

/// A task-scoped multi-turn session with one assistant.
///
/// History is extended only after a successful call, so a failed turn can be
/// retried without duplicating the user message.
pub struct Conversation<'a> {
    assistant: &'a dyn Assistant,
    assistant_id: String,
    chat_id: String,
    max_turns: usize,
    messages: Vec<Message>,
}

/// Output of a single conversation turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    /// 1-indexed turn number.
    pub turn: usize,
    pub result: CallResult,
}

impl<'a> Conversation<'a> {
    /// `max_turns == 0` means unlimited.
    pub fn new(
        assistant: &'a dyn Assistant,
        assistant_id: impl Into<String>,
        chat_id: impl Into<String>,
        max_turns: usize,
    ) -> Self {
        Self {
            assistant,
            assistant_id: assistant_id.into(),
            chat_id: chat_id.into(),
            max_turns,
            messages: Vec::new(),
        }
    }

    /// Prepend a system prompt. Blank prompts are ignored.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        if !prompt.trim().is_empty() {
            self.messages.insert(0, Message::system(prompt));
        }
        self
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Number of user turns so far.
    pub fn turn_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == crate::core::types::Role::User)
            .count()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[instrument(skip_all, fields(chat_id = %self.chat_id, turn = self.turn_count() + 1))]
    pub fn turn(&mut self, ctx: &RunContext, input: &str) -> Result<TurnResult> {
        let turn = self.turn_count() + 1;
        if self.max_turns > 0 && turn > self.max_turns {
            bail!("max turns ({}) exceeded", self.max_turns);
        }
        ctx.check()?;

        let user = Message::user(input);
        let mut outgoing = self.messages.clone();
        outgoing.push(user.clone());

        let result = self
            .assistant
            .call(
                ctx,
                &AssistantRequest {
                    assistant_id: &self.assistant_id,
                    chat_id: Some(&self.chat_id),
                    messages: &outgoing,
                },
            )
            .with_context(|| format!("turn {turn} failed"))?;

        self.messages.push(user);
        let reply = result.history_text();
        if !reply.is_empty() {
            self.messages.push(Message::assistant(reply));
        }
        debug!(turn, empty = result.is_empty(), "turn completed");
        Ok(TurnResult { turn, result })
    }
}

/// Settings for [`CommandAssistant`].
#[derive(Debug, Clone)]
pub struct CommandAssistantConfig {
    /// Program and arguments; the request JSON is written to stdin.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Assistant backend that spawns a command per call.
///
/// Stdout is read as a JSON object `{"content": ..., "next": ...}` when it
/// parses as one; otherwise the whole stdout is the text content.
pub struct CommandAssistant {
    config: CommandAssistantConfig,
}

impl CommandAssistant {
    pub fn new(config: CommandAssistantConfig) -> Self {
        Self { config }
    }
}

impl Assistant for CommandAssistant {
    #[instrument(skip_all, fields(assistant_id = request.assistant_id, messages = request.messages.len()))]
    fn call(&self, ctx: &RunContext, request: &AssistantRequest<'_>) -> Result<CallResult> {
        let cmd = command_from_argv(&self.config.command).context("assistant.command")?;
        info!("calling assistant command");

        let payload = serde_json::to_vec(request).context("serialize assistant request")?;
        let output = run_command(
            ctx,
            cmd,
            Some(&payload),
            self.config.timeout,
            self.config.output_limit_bytes,
        )
        .context("run assistant command")?
        .ensure_success("assistant command")?;

        Ok(parse_command_reply(&output.stdout_text()))
    }
}

fn parse_command_reply(stdout: &str) -> CallResult {
    let trimmed = stdout.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed)
        && (map.contains_key("content") || map.contains_key("next"))
    {
        return CallResult {
            content: map
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            next: map.get("next").filter(|next| !next.is_null()).cloned(),
        };
    }
    CallResult::text_only(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::test_support::ScriptedAssistant;
    use serde_json::json;

    #[test]
    fn text_prefers_content_then_next_fields() {
        assert_eq!(CallResult::text_only("hi").text(), "hi");
        let nested = CallResult {
            content: String::new(),
            next: Some(json!({"data": {"content": "deep"}})),
        };
        assert_eq!(nested.text(), "deep");
        let direct = CallResult {
            content: String::new(),
            next: Some(json!("plain")),
        };
        assert_eq!(direct.text(), "plain");
    }

    #[test]
    fn json_unwraps_data_and_extracts_from_markdown() {
        let wrapped = CallResult {
            content: String::new(),
            next: Some(json!({"data": {"tasks": []}})),
        };
        assert!(wrapped.json().expect("json").contains_key("tasks"));

        let fenced = CallResult::text_only("```json\n{\"passed\": true}\n```");
        assert_eq!(fenced.json().expect("json")["passed"], json!(true));
        assert!(CallResult::text_only("no json here").json().is_none());
    }

    #[test]
    fn output_falls_back_to_text() {
        assert_eq!(CallResult::text_only("not json").output(), json!("not json"));
        assert_eq!(
            CallResult::text_only("{\"total\": 100}").output(),
            json!({"total": 100})
        );
        assert_eq!(CallResult::text_only("[1, 2]").output(), json!([1, 2]));
    }

    /// History grows only after successful turns and the turn limit is enforced.
    #[test]
    fn conversation_tracks_history_and_limits_turns() {
        let assistant = ScriptedAssistant::new();
        assistant.push_text("a1", "first reply");
        assistant.push_error("a1", "backend down");
        assistant.push_text("a1", "second reply");
        let ctx = RunContext::new();

        let mut conv = Conversation::new(&assistant, "a1", "chat-1", 2).with_system_prompt("be brief");
        conv.turn(&ctx, "hello").expect("turn 1");
        assert_eq!(conv.turn_count(), 1);

        let err = conv.turn(&ctx, "again").unwrap_err();
        assert!(format!("{err:#}").contains("turn 2 failed"));
        assert_eq!(conv.turn_count(), 1);
        assert_eq!(conv.messages().len(), 3);

        let turn = conv.turn(&ctx, "again").expect("turn 2");
        assert_eq!(turn.turn, 2);
        let err = conv.turn(&ctx, "third").unwrap_err();
        assert_eq!(err.to_string(), "max turns (2) exceeded");

        let calls = assistant.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].chat_id.as_deref(), Some("chat-1"));
        assert_eq!(calls[2].messages[0].text(), "be brief");
    }

    /// A reply carried only in `next` is kept in history for the next turn.
    #[test]
    fn structured_only_reply_enters_history() {
        let assistant = ScriptedAssistant::new();
        assistant.push_json("a1", json!({"total": 1}));
        assistant.push_text("a1", "done");
        let ctx = RunContext::new();

        let mut conv = Conversation::new(&assistant, "a1", "chat-1", 0);
        conv.turn(&ctx, "count").expect("turn 1");
        conv.turn(&ctx, "now add X").expect("turn 2");

        let second = &assistant.calls()[1].messages;
        let roles: Vec<Role> = second.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::User]);
        assert_eq!(second[1].text(), r#"{"total":1}"#);
        assert_eq!(CallResult::default().history_text(), "");
    }

    #[test]
    fn command_reply_parses_structured_stdout() {
        let reply = parse_command_reply("{\"content\": \"hi\", \"next\": {\"a\": 1}}\n");
        assert_eq!(reply.content, "hi");
        assert_eq!(reply.next, Some(json!({"a": 1})));
        let raw = parse_command_reply("{\"total\": 1}");
        assert_eq!(raw.content, "{\"total\": 1}");
    }

    #[cfg(unix)]
    #[test]
    fn command_assistant_round_trips_through_subprocess() {
        let assistant = CommandAssistant::new(CommandAssistantConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat > /dev/null; printf '{\"content\":\"ok\"}'".to_string(),
            ],
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        });
        let messages = vec![Message::user("hi")];
        let reply = assistant
            .call(
                &RunContext::new(),
                &AssistantRequest {
                    assistant_id: "a",
                    chat_id: None,
                    messages: &messages,
                },
            )
            .expect("call");
        assert_eq!(reply.content, "ok");
    }
}
