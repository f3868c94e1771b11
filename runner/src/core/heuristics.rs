//! Output heuristics shared by the validator and the task runner.

use serde_json::Value;

/// Phrases that suggest the assistant is asking for more input instead of
/// answering. Matched case-insensitively.
const NEED_MORE_INFO_PHRASES: &[&str] = &[
    "need more information",
    "please clarify",
    "could you provide",
    "can you specify",
    "what is the",
    "which one",
    "please provide",
    "i need to know",
    "could you tell me",
    "what do you mean",
];

/// Whether an output value counts as a real result.
///
/// Null and blank strings are empty, arrays and objects must have entries,
/// and any other scalar counts as present.
pub fn has_valid_output(output: Option<&Value>) -> bool {
    match output {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

/// Whether the assistant's reply looks like a request for clarification.
///
/// Approximate by nature: any phrase from the list matches, as does text that
/// ends with a question mark and contains at least two of them. A single
/// trailing question is treated as conversational.
pub fn detect_need_more_info(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    if NEED_MORE_INFO_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
    {
        return true;
    }
    text.trim_end().ends_with('?') && text.matches('?').count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_output_rejects_blank_and_empty_containers() {
        assert!(!has_valid_output(None));
        assert!(!has_valid_output(Some(&Value::Null)));
        assert!(!has_valid_output(Some(&json!("   \n"))));
        assert!(!has_valid_output(Some(&json!([]))));
        assert!(!has_valid_output(Some(&json!({}))));
        assert!(has_valid_output(Some(&json!("done"))));
        assert!(has_valid_output(Some(&json!(0))));
        assert!(has_valid_output(Some(&json!(false))));
    }

    #[test]
    fn keyword_requests_are_detected() {
        assert!(detect_need_more_info(
            "I need more information about the quarter."
        ));
        assert!(detect_need_more_info("Please Clarify the scope"));
    }

    #[test]
    fn multiple_trailing_questions_are_detected() {
        assert!(detect_need_more_info("Is it Q3? Or Q4?"));
    }

    /// Known approximation: a single conversational question is not treated
    /// as a request, and questions that do not end the text are ignored.
    #[test]
    fn single_question_and_embedded_questions_are_not_detected() {
        assert!(!detect_need_more_info("Here is the report. Anything else?"));
        assert!(!detect_need_more_info("Why? Because? Sales grew 10%."));
        assert!(!detect_need_more_info(""));
    }

    /// Known approximation: an answer that happens to contain a listed phrase
    /// is a false positive.
    #[test]
    fn answers_containing_phrases_are_false_positives() {
        assert!(detect_need_more_info(
            "Revenue summary: what is the trend? Up 5%."
        ));
    }
}
