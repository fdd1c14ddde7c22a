//! Terminal judgment of a review.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    CorrectOptimal,
    CorrectInefficient,
    LogicError,
    IndependentReview,
    Halted,
}

impl VerdictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictKind::CorrectOptimal => "CORRECT_OPTIMAL",
            VerdictKind::CorrectInefficient => "CORRECT_INEFFICIENT",
            VerdictKind::LogicError => "LOGIC_ERROR",
            VerdictKind::IndependentReview => "INDEPENDENT_REVIEW",
            VerdictKind::Halted => "HALTED",
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict plus a human-readable context string. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    pub kind: VerdictKind,
    pub context: String,
}

impl Verdict {
    pub fn new(kind: VerdictKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.context)
    }
}
