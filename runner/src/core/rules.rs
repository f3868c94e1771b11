//! Validation rule parsing.
//!
//! A rule is either a structured assertion encoded as JSON or a short natural
//! language phrase. Phrases are matched against a fixed table; anything the
//! table does not recognize is left for the semantic layer.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::core::assertion::{Assertion, parse_assertions};

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'([^']+)'|"([^"]+)""#).expect("quoted value regex is valid"));

/// Rules split by the layer that evaluates them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedRules {
    /// Deterministic checks run by the rule layer.
    pub assertions: Vec<Assertion>,
    /// Phrases with no deterministic translation.
    pub semantic: Vec<String>,
    /// At least one structured rule asked for an agent judgment.
    pub has_agent_rules: bool,
}

type RuleBuilder = fn(&str) -> Option<Assertion>;

/// Phrase table, tried in order.
///
/// Phrases are matched case-insensitively as substrings of the rule. A row
/// whose builder yields nothing (a contain phrase with no quoted value) falls
/// through to the later rows. Beyond the base phrases, the table also maps
/// `not contain` to a `not_contains` check and accepts the `not be empty`
/// and `non empty` spellings.
const PHRASE_TABLE: &[(&[&str], RuleBuilder)] = &[
    (&["valid json", "json object"], object_type),
    (&["json array", "must be array"], array_type),
    (&["not contain"], not_contains_quoted),
    (&["contain"], contains_quoted),
    (&["not empty", "not be empty", "non-empty", "non empty"], non_blank),
];

fn object_type(_: &str) -> Option<Assertion> {
    Some(Assertion::new("type", json!("object")))
}

fn array_type(_: &str) -> Option<Assertion> {
    Some(Assertion::new("type", json!("array")))
}

fn not_contains_quoted(rule: &str) -> Option<Assertion> {
    quoted_value(rule).map(|value| Assertion::new("not_contains", json!(value)))
}

fn contains_quoted(rule: &str) -> Option<Assertion> {
    quoted_value(rule).map(|value| Assertion::new("contains", json!(value)))
}

fn non_blank(_: &str) -> Option<Assertion> {
    Some(Assertion::new("regex", json!(r"\S")))
}

/// Parse every rule string of a task.
pub fn parse_rules(rules: &[String]) -> ParsedRules {
    let mut parsed = ParsedRules::default();
    for rule in rules {
        let trimmed = rule.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(structured) = parse_structured_rule(trimmed) {
            for assertion in structured {
                if assertion.is_agent() {
                    parsed.has_agent_rules = true;
                } else {
                    parsed.assertions.push(assertion);
                }
            }
            continue;
        }
        match convert_phrase(trimmed) {
            Some(assertion) => parsed.assertions.push(assertion),
            None => parsed.semantic.push(trimmed.to_string()),
        }
    }
    parsed
}

/// Parse a JSON-encoded rule. Returns `None` when the text is not JSON.
fn parse_structured_rule(rule: &str) -> Option<Vec<Assertion>> {
    if !(rule.starts_with('{') || rule.starts_with('[')) {
        return None;
    }
    let value: Value = serde_json::from_str(rule).ok()?;
    Some(parse_assertions(&value))
}

/// Translate a natural-language rule into an assertion using the phrase table.
pub fn convert_phrase(rule: &str) -> Option<Assertion> {
    let lower = rule.to_lowercase();
    PHRASE_TABLE
        .iter()
        .filter(|(phrases, _)| phrases.iter().any(|phrase| lower.contains(phrase)))
        .find_map(|(_, build)| build(rule))
}

fn quoted_value(rule: &str) -> Option<String> {
    let caps = QUOTED_RE.captures(rule)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}
