//! The submission under review.

use serde::{Deserialize, Serialize};

use crate::tracer::Literal;

/// How the tracer reaches the entry point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStyle {
    /// A module-level callable.
    Function,
    /// A method on a fresh instance of the conventional container type.
    Method,
}

/// Code plus everything needed to execute it once.
///
/// Immutable once constructed for a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeSubmission {
    /// Raw source text.
    pub code: String,

    /// Declared or detected language, lowercase (e.g. "python").
    pub language: String,

    /// Name of the function or method to invoke.
    pub entry_point: String,

    /// Positional arguments used for execution.
    pub arguments: Vec<Literal>,
}

impl CodeSubmission {
    pub fn new(
        code: impl Into<String>,
        language: impl Into<String>,
        entry_point: impl Into<String>,
        arguments: Vec<Literal>,
    ) -> Self {
        Self {
            code: code.into(),
            language: language.into().to_lowercase(),
            entry_point: entry_point.into(),
            arguments,
        }
    }

    /// Only Python submissions can be executed; everything else is compared statically.
    pub fn is_interpretable(&self) -> bool {
        matches!(self.language.as_str(), "python" | "python3" | "py")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_is_normalized() {
        let sub = CodeSubmission::new("def f(): pass", "Python", "f", Vec::new());
        assert_eq!(sub.language, "python");
        assert!(sub.is_interpretable());
    }

    #[test]
    fn test_compiled_languages_are_not_interpretable() {
        for lang in ["cpp", "java", "rust", "go"] {
            let sub = CodeSubmission::new("int main() {}", lang, "main", Vec::new());
            assert!(!sub.is_interpretable(), "{lang} should not be interpretable");
        }
    }
}
