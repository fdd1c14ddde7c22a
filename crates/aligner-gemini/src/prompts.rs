//! Prompt construction and response parsing.

use std::sync::OnceLock;

use aligner_core::{FeedbackRequest, Inspection};
use regex::Regex;

/// Build the inspection prompt. `description` is the user's optional prose.
pub fn inspection_prompt(code: &str, description: &str) -> String {
    let description = description.trim();
    let context = if description.is_empty() {
        String::new()
    } else {
        format!("\nPROBLEM DESCRIPTION (from the user):\n{description}\n")
    };
    format!(
        r#"Analyze this code snippet deeply.
1. Identify the programming language.
2. Identify the entry function name used by the user.
3. Generate a valid test case input (tuple format).
4. PREDICTION: Based on the logic, what is the MOST LIKELY standard LeetCode problem name?
   (e.g. "Two Sum", "Binary Search", "Merge Sort").
{context}
CODE:
{code}

Return ONLY raw JSON. Format:
{{
    "language": "python",
    "user_function": "my_algo_name",
    "predicted_problem": "Name of LeetCode Problem",
    "test_input": "([1,2,3], 5)"
}}
"#
    )
}

/// Build the mentor prompt for a classified review.
pub fn feedback_prompt(request: &FeedbackRequest) -> String {
    let mut details = request.verdict.context.clone();
    if let Some(reference) = &request.reference_code {
        details.push_str("\nCompare logic with this optimal reference solution:\n");
        details.push_str(reference);
    }
    format!(
        r#"You are a Senior Software Engineer acting as a Mentor.

USER CODE ({language}):
{code}

CONTEXT / DIAGNOSIS:
Issue Type: {issue}
Details: {details}

TASK:
1. EXPLAIN: Briefly explain the issue (or why the code is good) in plain English.
2. FIX/OPTIMIZE: If the code needs changes, provide the corrected code block.
   - If it's already perfect, just say so and don't reprint code.
3. ANALYSIS: Mention the Time Complexity (Big O) if relevant.

FORMAT:
Use Markdown. Use bolding for key concepts. Keep it concise.
"#,
        language = request.language,
        code = request.code,
        issue = request.issue(),
    )
}

fn strip_fences(text: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    match FENCE.get_or_init(|| Regex::new(r"```(?:json|JSON)?").ok()) {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Parse the model's answer into an [`Inspection`].
///
/// Markdown code fences are stripped first. `None` when the text is not the
/// expected JSON object.
pub fn parse_inspection(text: &str) -> Option<Inspection> {
    let cleaned = strip_fences(text);
    serde_json::from_str(cleaned.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aligner_core::{Verdict, VerdictKind};

    #[test]
    fn test_parse_fenced_inspection() {
        let text = "```json\n{\"language\": \"python\", \"user_function\": \"solve\", \"predicted_problem\": \"Two Sum\", \"test_input\": \"([2, 7], 9)\"}\n```";
        let inspection = parse_inspection(text).unwrap();
        assert_eq!(inspection.language, "python");
        assert_eq!(inspection.entry_point.as_deref(), Some("solve"));
        assert_eq!(inspection.test_input.as_deref(), Some("([2, 7], 9)"));
    }

    #[test]
    fn test_parse_bare_inspection() {
        let inspection = parse_inspection(r#"{"language": "java"}"#).unwrap();
        assert_eq!(inspection.language, "java");
        assert!(inspection.entry_point.is_none());
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_inspection("I think this is Two Sum.").is_none());
        assert!(parse_inspection("").is_none());
    }

    #[test]
    fn test_inspection_prompt_includes_description() {
        let prompt = inspection_prompt("def f(): pass", "find the pair");
        assert!(prompt.contains("def f(): pass"));
        assert!(prompt.contains("find the pair"));
        assert!(!inspection_prompt("x", "  ").contains("PROBLEM DESCRIPTION"));
    }

    #[test]
    fn test_feedback_prompt_labels_issue() {
        let request = FeedbackRequest {
            code: "def f(a): return min(a)".into(),
            language: "python".into(),
            verdict: Verdict::new(VerdictKind::LogicError, "results differ"),
            reference_code: None,
        };
        let prompt = feedback_prompt(&request);
        assert!(prompt.contains("Issue Type: LOGIC BUG"));
        assert!(prompt.contains("Details: results differ"));
        assert!(prompt.contains("USER CODE (python)"));

        let with_reference = FeedbackRequest {
            verdict: Verdict::new(VerdictKind::IndependentReview, "static"),
            reference_code: Some("class Solution: pass".into()),
            ..request
        };
        let prompt = feedback_prompt(&with_reference);
        assert!(prompt.contains("Issue Type: STATIC ANALYSIS"));
        assert!(prompt.contains("class Solution: pass"));
    }
}
