//! Continuation replies sent to the assistant on the next turn.

use std::fmt::Write as _;

use crate::core::types::ValidationResult;

/// Reply when validation passed but the output is empty.
pub const CONTINUE_REPLY: &str =
    "Please continue and provide the complete result as specified in the task.";

/// Structured feedback block listing issues and suggestions.
pub fn feedback_reply(result: &ValidationResult) -> String {
    let mut out = String::from("## Validation Feedback\n\n");
    out.push_str("Your previous response needs improvement. Please address the following:\n\n");
    push_list(&mut out, "### Issues", &result.issues);
    push_list(&mut out, "### Suggestions", &result.suggestions);
    out.push_str("Please provide an improved response that addresses these points.");
    out
}

/// Reply after the rule layer rejected the output.
pub fn rule_failure_reply(issues: &[String], expected_output: &str) -> String {
    let mut out =
        String::from("Your response did not pass validation. Please fix the following issues:\n\n");
    for issue in issues {
        let _ = writeln!(out, "- {issue}");
    }
    let _ = write!(out, "\nExpected output: {expected_output}");
    out
}

/// Reply asking the assistant to proceed on reasonable assumptions.
pub fn clarification_reply(expected_output: Option<&str>) -> String {
    let mut out =
        String::from("Please proceed with the task based on the available information.\n\n");
    if let Some(expected) = expected_output {
        let _ = write!(out, "**Expected Output**: {expected}\n\n");
    }
    out.push_str(
        "If you need to make assumptions, please state them clearly and proceed with the most reasonable interpretation.",
    );
    out
}

/// Reply asking for refinement when the score is below the threshold.
pub fn refinement_reply(score: f64, expected_output: &str) -> String {
    format!(
        "The result is partially correct (score: {score:.2}), but needs improvement. Please refine your response to better match the expected output: {expected_output}"
    )
}

/// Next input used when the validator requested a reply but left it blank.
///
/// The validator fills `reply_content` whenever it sets `need_reply`, so the
/// task runner only reaches this as a fallback.
pub fn default_next_input(result: &ValidationResult, expected_output: Option<&str>) -> String {
    let mut out = String::from(
        "Your previous response did not pass validation. Please address the following issues:\n\n",
    );
    if result.issues.is_empty() {
        out.push_str("- The response was incomplete.\n");
    } else {
        for issue in &result.issues {
            let _ = writeln!(out, "- {issue}");
        }
    }
    if let Some(expected) = expected_output {
        let _ = write!(out, "\nExpected output: {expected}");
    }
    out
}

fn push_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(heading);
    out.push('\n');
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
    out.push('\n');
}
