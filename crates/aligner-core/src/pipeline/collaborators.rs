//! Service seams for the external collaborators a review consumes.
//!
//! - `Inspector`: structural metadata about the submitted code
//! - `FeedbackGenerator`: prose explanation of a verdict
//!
//! Both are black boxes reached over the network in production; fakes live
//! in `pipeline::fakes`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::CollaboratorError;
use crate::domain::{Verdict, VerdictKind};

fn unknown_language() -> String {
    "unknown".to_string()
}

/// What the inspector learned about a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inspection {
    /// Detected language, e.g. "python".
    #[serde(default = "unknown_language")]
    pub language: String,

    /// Name of the function the user wrote.
    #[serde(default, alias = "user_function")]
    pub entry_point: Option<String>,

    /// Most likely canonical problem name, e.g. "Two Sum".
    #[serde(default)]
    pub predicted_problem: Option<String>,

    /// Serialized Python literal for the argument tuple, e.g. "([1,2,3], 5)".
    #[serde(default)]
    pub test_input: Option<String>,
}

impl Default for Inspection {
    fn default() -> Self {
        Self {
            language: unknown_language(),
            entry_point: None,
            predicted_problem: None,
            test_input: None,
        }
    }
}

impl Inspection {
    pub fn python(entry_point: impl Into<String>) -> Self {
        Self {
            language: "python".to_string(),
            entry_point: Some(entry_point.into()),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_predicted_problem(mut self, problem: impl Into<String>) -> Self {
        self.predicted_problem = Some(problem.into());
        self
    }

    pub fn with_test_input(mut self, input: impl Into<String>) -> Self {
        self.test_input = Some(input.into());
        self
    }
}

/// Code inspection service.
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Analyze `code`; `None` when the code's structure could not be determined.
    async fn inspect(
        &self,
        code: &str,
        description: &str,
    ) -> Result<Option<Inspection>, CollaboratorError>;
}

/// Inspector that always answers with caller-supplied metadata.
#[derive(Debug, Clone)]
pub struct StaticInspector {
    inspection: Inspection,
}

impl StaticInspector {
    pub fn new(inspection: Inspection) -> Self {
        Self { inspection }
    }
}

#[async_trait]
impl Inspector for StaticInspector {
    async fn inspect(
        &self,
        _code: &str,
        _description: &str,
    ) -> Result<Option<Inspection>, CollaboratorError> {
        Ok(Some(self.inspection.clone()))
    }
}

/// Everything the feedback generator sees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackRequest {
    pub code: String,
    pub language: String,
    pub verdict: Verdict,
    /// Reference code, attached only for static comparison of non-executable submissions.
    pub reference_code: Option<String>,
}

impl FeedbackRequest {
    /// Short diagnosis label used when prompting for feedback.
    pub fn issue(&self) -> &'static str {
        match self.verdict.kind {
            VerdictKind::Halted => "RUNTIME ERROR",
            VerdictKind::LogicError => "LOGIC BUG",
            VerdictKind::CorrectInefficient => "INEFFICIENT CODE",
            VerdictKind::CorrectOptimal => "GOOD CODE",
            VerdictKind::IndependentReview if self.reference_code.is_some() => "STATIC ANALYSIS",
            VerdictKind::IndependentReview => "INDEPENDENT REVIEW",
        }
    }
}

/// Turns a verdict into prose. Purely presentational.
#[async_trait]
pub trait FeedbackGenerator: Send + Sync {
    async fn explain(&self, request: &FeedbackRequest) -> Result<String, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspection_accepts_inspector_field_names() {
        let json = r#"{
            "language": "python",
            "user_function": "magic_pair_finder",
            "predicted_problem": "Two Sum",
            "test_input": "([2, 7, 11, 15], 9)"
        }"#;
        let inspection: Inspection = serde_json::from_str(json).unwrap();
        assert_eq!(inspection.entry_point.as_deref(), Some("magic_pair_finder"));
        assert_eq!(inspection.predicted_problem.as_deref(), Some("Two Sum"));
    }

    #[test]
    fn test_inspection_defaults_missing_fields() {
        let inspection: Inspection = serde_json::from_str("{}").unwrap();
        assert_eq!(inspection, Inspection::default());
        assert_eq!(inspection.language, "unknown");
    }

    #[test]
    fn test_issue_labels() {
        let request = |kind, reference: Option<&str>| FeedbackRequest {
            code: String::new(),
            language: "python".into(),
            verdict: Verdict::new(kind, ""),
            reference_code: reference.map(String::from),
        };
        assert_eq!(request(VerdictKind::Halted, None).issue(), "RUNTIME ERROR");
        assert_eq!(request(VerdictKind::LogicError, None).issue(), "LOGIC BUG");
        assert_eq!(
            request(VerdictKind::IndependentReview, Some("class Solution: pass")).issue(),
            "STATIC ANALYSIS"
        );
        assert_eq!(
            request(VerdictKind::IndependentReview, None).issue(),
            "INDEPENDENT REVIEW"
        );
    }

    #[tokio::test]
    async fn test_static_inspector_returns_supplied_metadata() {
        let inspector = StaticInspector::new(Inspection::python("f").with_test_input("(1,)"));
        let inspection = inspector.inspect("def f(x): pass", "").await.unwrap().unwrap();
        assert_eq!(inspection.entry_point.as_deref(), Some("f"));
        assert_eq!(inspection.test_input.as_deref(), Some("(1,)"));
    }
}
