//! Outcome and trace of a single traced execution.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One recorded execution point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSnapshot {
    /// 1-based source line of the statement about to execute.
    pub line: u32,

    /// Visible local bindings rendered as `repr` text.
    pub variables: BTreeMap<String, String>,
}

/// Ordered, append-only step log of one run.
///
/// Its length is the step count used as a cost proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ExecutionTrace {
    steps: Vec<StepSnapshot>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: StepSnapshot) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepSnapshot] {
        &self.steps
    }

    pub fn last(&self) -> Option<&StepSnapshot> {
        self.steps.last()
    }

    /// Line numbers in execution order.
    pub fn lines(&self) -> Vec<u32> {
        self.steps.iter().map(|s| s.line).collect()
    }
}

impl From<Vec<StepSnapshot>> for ExecutionTrace {
    fn from(steps: Vec<StepSnapshot>) -> Self {
        Self { steps }
    }
}

/// A successful return value, kept as text because comparison is textual.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReturnValue {
    /// `str(value)`
    pub text: String,
    /// `repr(value)`
    pub repr: String,
}

/// Which stage of a run failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The code did not parse, its module body raised, or the entry point is missing.
    Definition,
    /// Argument count did not match the entry point's signature.
    Arity,
    /// The entry point raised.
    Runtime,
    /// The run exceeded its deadline or step budget.
    Timeout,
}

/// Structured description of a failed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    /// Exception type name, e.g. "ZeroDivisionError".
    pub exception: String,
    pub message: String,
    /// Line where the exception was raised, when known.
    pub line: Option<u32>,
}

impl ExecutionFailure {
    pub fn new(
        kind: FailureKind,
        exception: impl Into<String>,
        message: impl Into<String>,
        line: Option<u32>,
    ) -> Self {
        Self {
            kind,
            exception: exception.into(),
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.exception)
        } else {
            write!(f, "{}: {}", self.exception, self.message)
        }
    }
}

/// Exactly one of success or failure per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success(ReturnValue),
    Failure(ExecutionFailure),
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failure(_))
    }

    pub fn value(&self) -> Option<&ReturnValue> {
        match self {
            ExecutionOutcome::Success(value) => Some(value),
            ExecutionOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match self {
            ExecutionOutcome::Success(_) => None,
            ExecutionOutcome::Failure(failure) => Some(failure),
        }
    }
}

/// Everything one `Tracer::run` call returns.
///
/// A failed run still carries the partial trace up to the failing step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceRun {
    pub outcome: ExecutionOutcome,
    pub trace: ExecutionTrace,
}

impl TraceRun {
    pub fn failed(failure: ExecutionFailure, trace: ExecutionTrace) -> Self {
        Self {
            outcome: ExecutionOutcome::Failure(failure),
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let failure = ExecutionFailure::new(
            FailureKind::Runtime,
            "ZeroDivisionError",
            "division by zero",
            Some(3),
        );
        assert_eq!(failure.to_string(), "ZeroDivisionError: division by zero");

        let bare = ExecutionFailure::new(FailureKind::Runtime, "StopIteration", "", None);
        assert_eq!(bare.to_string(), "StopIteration");
    }

    #[test]
    fn test_outcome_serde_tagging() {
        let outcome = ExecutionOutcome::Success(ReturnValue {
            text: "3".into(),
            repr: "3".into(),
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["text"], "3");
        let back: ExecutionOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_trace_serializes_as_array() {
        let trace = ExecutionTrace::from(vec![StepSnapshot {
            line: 2,
            variables: BTreeMap::from([("a".to_string(), "[3, 1, 2]".to_string())]),
        }]);
        let json = serde_json::to_value(&trace).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["line"], 2);
        assert_eq!(trace.lines(), vec![2]);
    }
}
