//! Two-layer task validation.
//!
//! The rule layer evaluates deterministic assertions parsed from the task's
//! validation rules. The semantic layer asks the robot's validation assistant
//! to judge the output against the expected-output description and any rules
//! the rule layer could not translate. The merged verdict decides whether the
//! task is complete and, if not, what to say on the next turn.

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::context::{RunContext, is_cancellation};
use crate::core::assertion::evaluate_all;
use crate::core::feedback::{
    CONTINUE_REPLY, clarification_reply, feedback_reply, refinement_reply, rule_failure_reply,
};
use crate::core::heuristics::{detect_need_more_info, has_valid_output};
use crate::core::rules::{ParsedRules, parse_rules};
use crate::core::types::{Task, ValidationResult};
use crate::core::verdict::{merge_verdicts, parse_verdict};
use crate::io::assistant::{Assistant, CallResult, call_with_system_and_user};
use crate::io::config::RunConfig;
use crate::io::prompt::render_semantic_validation;
use crate::robot::Robot;

pub struct Validator<'a> {
    assistant: &'a dyn Assistant,
    robot: &'a Robot,
    config: &'a RunConfig,
}

impl<'a> Validator<'a> {
    pub fn new(assistant: &'a dyn Assistant, robot: &'a Robot, config: &'a RunConfig) -> Self {
        Self {
            assistant,
            robot,
            config,
        }
    }

    /// Validate without a last call to inspect.
    pub fn validate(
        &self,
        ctx: &RunContext,
        task: &Task,
        output: Option<&Value>,
    ) -> Result<ValidationResult> {
        self.validate_with_context(ctx, task, output, None)
    }

    /// Validate one turn's output and decide whether the conversation goes on.
    ///
    /// Only cancellation is returned as an error; a failing validation
    /// assistant becomes a failed verdict with an issue.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn validate_with_context(
        &self,
        ctx: &RunContext,
        task: &Task,
        output: Option<&Value>,
        last_call: Option<&CallResult>,
    ) -> Result<ValidationResult> {
        let expected = task.expected_output_text();
        if expected.is_none() && task.validation_rules.is_empty() {
            return Ok(ValidationResult {
                passed: true,
                score: 1.0,
                complete: has_valid_output(output),
                ..ValidationResult::default()
            });
        }

        let rules = parse_rules(&task.validation_rules);
        let rule_result = validate_rules(&rules, output);
        if !rule_result.passed {
            debug!(issues = rule_result.issues.len(), "rule layer rejected output");
            return Ok(self.on_rule_failure(task, rule_result));
        }

        let mut result = rule_result;
        if expected.is_some() || rules.has_agent_rules {
            let semantic = self.validate_semantic(ctx, task, output, &rules.semantic)?;
            result = merge_verdicts(&result, &semantic);
        }

        result.complete = self.is_complete(output, &result);
        if let Some(reply) = self.need_reply(task, output, last_call, &result) {
            result.need_reply = true;
            result.reply_content = Some(reply);
        }
        debug!(
            passed = result.passed,
            complete = result.complete,
            score = result.score,
            need_reply = result.need_reply,
            "validation finished"
        );
        Ok(result)
    }

    /// Structural check for tool and subprocess outputs.
    pub fn validate_structure(&self, output: Option<&Value>) -> ValidationResult {
        if has_valid_output(output) {
            ValidationResult {
                passed: true,
                score: 1.0,
                complete: true,
                ..ValidationResult::default()
            }
        } else {
            ValidationResult {
                issues: vec!["executor returned empty output".to_string()],
                ..ValidationResult::default()
            }
        }
    }

    fn on_rule_failure(&self, task: &Task, mut result: ValidationResult) -> ValidationResult {
        result.complete = false;
        let reply = if !result.suggestions.is_empty() {
            Some(feedback_reply(&result))
        } else if !result.issues.is_empty() {
            let expected = task.expected_output.as_deref().unwrap_or_default();
            Some(rule_failure_reply(&result.issues, expected))
        } else {
            None
        };
        result.need_reply = reply.is_some();
        result.reply_content = reply;
        result
    }

    fn validate_semantic(
        &self,
        ctx: &RunContext,
        task: &Task,
        output: Option<&Value>,
        semantic_rules: &[String],
    ) -> Result<ValidationResult> {
        let agent_id = self.robot.validation_agent();
        let verdict = render_semantic_validation(task, output, semantic_rules).and_then(|prompt| {
            call_with_system_and_user(self.assistant, ctx, &agent_id, None, &prompt)
        });
        match verdict {
            Ok(reply) => {
                let structured = reply.json().map(Value::Object);
                Ok(parse_verdict(structured.as_ref(), &reply.text()))
            }
            Err(err) if is_cancellation(&err) => Err(err),
            Err(err) => {
                warn!(agent_id = %agent_id, err = %format!("{err:#}"), "validation agent failed");
                Ok(ValidationResult {
                    issues: vec![format!("Validation agent error: {err:#}")],
                    ..ValidationResult::default()
                })
            }
        }
    }

    fn is_complete(&self, output: Option<&Value>, result: &ValidationResult) -> bool {
        result.passed
            && has_valid_output(output)
            && result.score >= self.config.validation_threshold
    }

    /// Reply for the next turn, in priority order, when the result is not complete.
    fn need_reply(
        &self,
        task: &Task,
        output: Option<&Value>,
        last_call: Option<&CallResult>,
        result: &ValidationResult,
    ) -> Option<String> {
        if result.complete {
            return None;
        }
        if last_call.is_some_and(|call| detect_need_more_info(&call.text())) {
            return Some(clarification_reply(task.expected_output_text()));
        }
        if result.passed && !has_valid_output(output) {
            return Some(CONTINUE_REPLY.to_string());
        }
        if !result.passed && !result.suggestions.is_empty() {
            return Some(feedback_reply(result));
        }
        if result.passed && result.score < self.config.validation_threshold {
            let expected = task.expected_output.as_deref().unwrap_or_default();
            return Some(refinement_reply(result.score, expected));
        }
        None
    }
}

fn validate_rules(rules: &ParsedRules, output: Option<&Value>) -> ValidationResult {
    let null = Value::Null;
    match evaluate_all(&rules.assertions, output.unwrap_or(&null)) {
        Ok(()) => ValidationResult {
            passed: true,
            score: 1.0,
            ..ValidationResult::default()
        },
        Err(issues) => ValidationResult {
            passed: false,
            score: 0.0,
            issues,
            ..ValidationResult::default()
        },
    }
}
