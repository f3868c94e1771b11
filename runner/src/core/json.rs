//! JSON helpers used by assertions and result extraction.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[a-zA-Z0-9_-]*\s*\n?(.*?)```").expect("fenced block regex is valid")
});

/// Extract a JSON object or array from free-form assistant text.
///
/// Tries, in order: the whole trimmed text, each fenced code block, and the
/// widest `{...}` / `[...]` span. Scalars are not considered JSON output.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(value) = parse_structured(trimmed) {
        return Some(value);
    }
    for caps in FENCED_BLOCK_RE.captures_iter(trimmed) {
        if let Some(value) = caps.get(1).and_then(|m| parse_structured(m.as_str().trim())) {
            return Some(value);
        }
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
            && start < end
            && let Some(value) = parse_structured(&trimmed[start..=end])
        {
            return Some(value);
        }
    }
    None
}

fn parse_structured(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

/// Look up a dotted path such as `$.items.0.name` or `items[0].name`.
///
/// An empty path (or `$`) returns the value itself.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let path = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (key, indices) = split_indices(segment);
        if !key.is_empty() {
            current = match current {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        for index in indices {
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

/// Split `name[1][2]` into `("name", [1, 2])`.
fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let Some(bracket) = segment.find('[') else {
        return (segment, Vec::new());
    };
    let indices = segment[bracket..]
        .split(['[', ']'])
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<usize>().ok())
        .collect();
    (&segment[..bracket], indices)
}

/// Name of the JSON type of a value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a value as text: strings verbatim, everything else as compact JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Structural equality that treats numerically equal numbers as equal and
/// compares a string expectation against the text form of the actual value.
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        (actual, Value::String(expected)) if !actual.is_string() => {
            to_text(actual) == *expected
        }
        _ => actual == expected,
    }
}

/// Truncate text to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}
