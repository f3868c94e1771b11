//! Structured assertions evaluated against task output.
//!
//! Assertions are deterministic: the same assertion and output always produce
//! the same outcome. The `agent` type is never evaluated here; it marks a rule
//! that must be judged by the semantic validation layer.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::json::{extract_json, lookup_path, to_text, truncate_chars, type_name, values_equal};

/// Assertion type name reserved for semantic (assistant-judged) rules.
pub const AGENT_ASSERTION: &str = "agent";

/// A single structured check.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Assertion {
    /// `equals` (or empty), `contains`, `not_contains`, `json_path`, `regex`,
    /// `type` or `agent`.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Overrides the failure message when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub negate: bool,
}

impl Assertion {
    pub fn new(kind: &str, value: Value) -> Self {
        Self {
            kind: kind.to_string(),
            value,
            ..Self::default()
        }
    }

    pub fn is_agent(&self) -> bool {
        self.kind == AGENT_ASSERTION
    }

    /// Build an assertion from a JSON object, ignoring fields of the wrong type.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            kind: map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            value: map.get("value").cloned().unwrap_or(Value::Null),
            path: map.get("path").and_then(Value::as_str).map(str::to_string),
            message: map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            negate: map.get("negate").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

/// Parse one assertion or a list of assertions from a JSON value.
pub fn parse_assertions(value: &Value) -> Vec<Assertion> {
    match value {
        Value::Object(map) => vec![Assertion::from_map(map)],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .map(Assertion::from_map)
            .collect(),
        Value::String(kind) => vec![Assertion::new(kind, Value::Null)],
        _ => Vec::new(),
    }
}

/// Outcome of evaluating a single assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub message: String,
}

impl AssertionOutcome {
    fn pass(message: String) -> Self {
        Self {
            passed: true,
            message,
        }
    }

    fn fail(message: String) -> Self {
        Self {
            passed: false,
            message,
        }
    }
}

/// Evaluate one assertion against `output`.
pub fn evaluate(assertion: &Assertion, output: &Value) -> AssertionOutcome {
    let outcome = match assertion.kind.as_str() {
        "equals" | "" => assert_equals(assertion, output),
        "contains" => assert_contains(assertion, output),
        "not_contains" => {
            let inner = assert_contains(assertion, output);
            let expected = to_text(&assertion.value);
            if inner.passed {
                AssertionOutcome::fail(format!("output should not contain '{expected}'"))
            } else {
                AssertionOutcome::pass(format!("output does not contain '{expected}'"))
            }
        }
        "json_path" => assert_json_path(assertion, output),
        "regex" => assert_regex(assertion, output),
        "type" => assert_type(assertion, output),
        AGENT_ASSERTION => {
            AssertionOutcome::fail("agent assertions are judged by the validation agent".to_string())
        }
        other => AssertionOutcome::fail(format!("unknown assertion type: {other}")),
    };

    if !assertion.negate {
        return outcome;
    }
    if outcome.passed {
        AssertionOutcome::fail(format!("negated: {}", outcome.message))
    } else {
        AssertionOutcome::pass("negated assertion passed".to_string())
    }
}

/// Evaluate every assertion and collect failure messages.
///
/// Returns `Ok(())` when all pass, otherwise the failure messages (custom
/// `message` fields take precedence) in assertion order.
pub fn evaluate_all(assertions: &[Assertion], output: &Value) -> Result<(), Vec<String>> {
    let failures: Vec<String> = assertions
        .iter()
        .filter_map(|assertion| {
            let outcome = evaluate(assertion, output);
            (!outcome.passed).then(|| assertion.message.clone().unwrap_or(outcome.message))
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

fn assert_equals(assertion: &Assertion, output: &Value) -> AssertionOutcome {
    if values_equal(output, &assertion.value) {
        AssertionOutcome::pass("values are equal".to_string())
    } else {
        AssertionOutcome::fail(format!(
            "expected {}, got {}",
            to_text(&assertion.value),
            truncate_chars(&to_text(output), 100)
        ))
    }
}

fn assert_contains(assertion: &Assertion, output: &Value) -> AssertionOutcome {
    let expected = to_text(&assertion.value);
    if to_text(output).contains(&expected) {
        AssertionOutcome::pass(format!("output contains '{expected}'"))
    } else {
        AssertionOutcome::fail(format!("output does not contain '{expected}'"))
    }
}

/// Resolve output into structured JSON for path-based checks.
fn structured_output(output: &Value) -> Result<Value, AssertionOutcome> {
    match output {
        Value::String(text) => extract_json(text).ok_or_else(|| {
            AssertionOutcome::fail(format!(
                "output is not valid JSON: {}",
                truncate_chars(text, 100)
            ))
        }),
        Value::Object(_) | Value::Array(_) => Ok(output.clone()),
        other => Err(AssertionOutcome::fail(format!(
            "output is not a JSON object or array, got: {}",
            type_name(other)
        ))),
    }
}

fn assert_json_path(assertion: &Assertion, output: &Value) -> AssertionOutcome {
    let data = match structured_output(output) {
        Ok(data) => data,
        Err(outcome) => return outcome,
    };
    let path = assertion.path.as_deref().unwrap_or_default();
    let actual = lookup_path(&data, path).cloned().unwrap_or(Value::Null);

    if values_equal(&actual, &assertion.value) {
        return AssertionOutcome::pass(format!("path '{path}' equals expected value"));
    }
    // An array expectation against a scalar means "any of".
    if let Value::Array(candidates) = &assertion.value
        && !actual.is_array()
        && candidates.iter().any(|item| values_equal(&actual, item))
    {
        return AssertionOutcome::pass(format!("path '{path}' equals one of expected values"));
    }
    AssertionOutcome::fail(format!(
        "path '{path}': expected {}, got {}",
        to_text(&assertion.value),
        to_text(&actual)
    ))
}

fn assert_regex(assertion: &Assertion, output: &Value) -> AssertionOutcome {
    let Some(pattern) = assertion.value.as_str() else {
        return AssertionOutcome::fail("regex pattern must be a string".to_string());
    };
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => return AssertionOutcome::fail(format!("invalid regex pattern: {err}")),
    };
    if re.is_match(&to_text(output)) {
        AssertionOutcome::pass(format!("output matches pattern '{pattern}'"))
    } else {
        AssertionOutcome::fail(format!("output does not match pattern '{pattern}'"))
    }
}

fn assert_type(assertion: &Assertion, output: &Value) -> AssertionOutcome {
    let Some(expected) = assertion.value.as_str() else {
        return AssertionOutcome::fail("type assertion value must be a string".to_string());
    };

    let path = assertion.path.as_deref().filter(|p| !p.is_empty());
    let Some(path) = path else {
        let actual = type_name(output);
        return if actual == expected {
            AssertionOutcome::pass(format!("output is of type '{expected}'"))
        } else {
            AssertionOutcome::fail(format!("expected type '{expected}', got '{actual}'"))
        };
    };

    let data = match structured_output(output) {
        Ok(data) => data,
        Err(outcome) => return outcome,
    };
    let Some(value) = lookup_path(&data, path).filter(|v| !v.is_null()) else {
        return AssertionOutcome::fail(format!("path '{path}' not found in output"));
    };
    let actual = type_name(value);
    if actual == expected {
        AssertionOutcome::pass(format!("path '{path}' is of type '{expected}'"))
    } else {
        AssertionOutcome::fail(format!(
            "path '{path}': expected type '{expected}', got '{actual}'"
        ))
    }
}
