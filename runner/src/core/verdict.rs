//! Semantic verdict parsing and layer merging.

use serde_json::Value;

use crate::core::types::ValidationResult;

/// Keywords that count as a positive verdict in an unstructured reply.
const POSITIVE_KEYWORDS: &[&str] = &["passed", "valid", "correct", "success"];

/// Score assigned to an unstructured reply that reads as positive.
pub const FALLBACK_POSITIVE_SCORE: f64 = 0.8;

/// Parse the validation agent's reply.
///
/// A structured reply is read field by field, ignoring fields of the wrong
/// type. Otherwise the text becomes `details` and a keyword match yields a
/// lenient pass.
pub fn parse_verdict(structured: Option<&Value>, text: &str) -> ValidationResult {
    let mut verdict = ValidationResult::default();

    let Some(Value::Object(data)) = structured else {
        if !text.is_empty() {
            verdict.details = Some(text.to_string());
            let lower = text.to_lowercase();
            if POSITIVE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                verdict.passed = true;
                verdict.score = FALLBACK_POSITIVE_SCORE;
            }
        }
        return verdict;
    };

    if let Some(passed) = data.get("passed").and_then(Value::as_bool) {
        verdict.passed = passed;
    }
    if let Some(score) = data.get("score").and_then(Value::as_f64) {
        verdict.score = score.clamp(0.0, 1.0);
    }
    verdict.issues = string_list(data.get("issues"));
    verdict.suggestions = string_list(data.get("suggestions"));
    verdict.details = data
        .get("details")
        .and_then(Value::as_str)
        .map(str::to_string);
    verdict
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Merge rule-layer and semantic-layer results.
///
/// Either failure fails the merge with the lower score; two passes average.
pub fn merge_verdicts(rule: &ValidationResult, semantic: &ValidationResult) -> ValidationResult {
    let passed = rule.passed && semantic.passed;
    let score = if passed {
        (rule.score + semantic.score) / 2.0
    } else {
        rule.score.min(semantic.score)
    };
    ValidationResult {
        passed,
        score,
        issues: [rule.issues.as_slice(), semantic.issues.as_slice()].concat(),
        suggestions: [rule.suggestions.as_slice(), semantic.suggestions.as_slice()].concat(),
        details: semantic.details.clone(),
        ..ValidationResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(passed: bool, score: f64, issue: &str) -> ValidationResult {
        ValidationResult {
            passed,
            score,
            issues: vec![issue.to_string()],
            ..ValidationResult::default()
        }
    }

    #[test]
    fn structured_verdict_is_read_field_by_field() {
        let data = json!({
            "passed": false,
            "score": 0.4,
            "issues": ["missing total", 3],
            "suggestions": ["add a total"],
            "details": "partial"
        });
        let verdict = parse_verdict(Some(&data), "");
        assert!(!verdict.passed);
        assert_eq!(verdict.score, 0.4);
        assert_eq!(verdict.issues, vec!["missing total".to_string()]);
        assert_eq!(verdict.suggestions, vec!["add a total".to_string()]);
        assert_eq!(verdict.details.as_deref(), Some("partial"));
    }

    #[test]
    fn unstructured_positive_reply_gets_fallback_score() {
        let verdict = parse_verdict(None, "The output is Correct.");
        assert!(verdict.passed);
        assert_eq!(verdict.score, FALLBACK_POSITIVE_SCORE);
        assert_eq!(verdict.details.as_deref(), Some("The output is Correct."));
    }

    #[test]
    fn unstructured_negative_reply_fails() {
        let verdict = parse_verdict(None, "Nope, wrong numbers.");
        assert!(!verdict.passed);
        assert_eq!(verdict.score, 0.0);
    }

    #[test]
    fn merge_takes_min_on_failure_and_mean_on_success() {
        let failed = merge_verdicts(&result(true, 1.0, "a"), &result(false, 0.3, "b"));
        assert!(!failed.passed);
        assert_eq!(failed.score, 0.3);
        assert_eq!(failed.issues, vec!["a".to_string(), "b".to_string()]);

        let passed = merge_verdicts(&result(true, 1.0, "a"), &result(true, 0.6, "b"));
        assert!(passed.passed);
        assert!((passed.score - 0.8).abs() < 1e-9);
    }
}
