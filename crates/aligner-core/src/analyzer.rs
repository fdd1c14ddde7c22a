//! Comparative verdict engine.
//!
//! Classifies a submission from the user's traced run, the reference's traced
//! run and the retrieval confidence. Rules are evaluated in a fixed order:
//! user failure, missing or untrusted reference, reference failure, result
//! mismatch, step-count ratio.

use serde::{Deserialize, Serialize};

use crate::domain::{TraceRun, Verdict, VerdictKind};

/// Default minimum retrieval confidence for a reference to be used.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.9;

/// A user run is inefficient when it takes more than this many times the reference's steps.
pub const INEFFICIENCY_FACTOR: usize = 2;

/// Context attached when no usable reference exists.
pub const NO_REFERENCE_CONTEXT: &str = "no reference available.";

/// Verdict rules, parameterized only by the acceptance threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ComparativeAnalyzer {
    /// Candidates with `confidence < threshold` are rejected.
    pub threshold: f64,
}

impl Default for ComparativeAnalyzer {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
        }
    }
}

impl ComparativeAnalyzer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Whether a candidate with this confidence may serve as the reference.
    pub fn accepts(&self, confidence: Option<f64>) -> bool {
        confidence.is_some_and(|c| c >= self.threshold)
    }

    /// Classify a submission.
    ///
    /// `reference` is `None` when no reference was executed. `confidence` is
    /// `None` when retrieval found no candidate.
    pub fn classify(
        &self,
        user: &TraceRun,
        reference: Option<&TraceRun>,
        confidence: Option<f64>,
    ) -> Verdict {
        if let Some(failure) = user.outcome.failure() {
            return Verdict::new(VerdictKind::Halted, failure.to_string());
        }
        if !self.accepts(confidence) {
            return Verdict::new(VerdictKind::IndependentReview, NO_REFERENCE_CONTEXT);
        }
        let Some(reference) = reference else {
            return Verdict::new(VerdictKind::IndependentReview, NO_REFERENCE_CONTEXT);
        };
        let (Some(user_value), Some(reference_value)) =
            (user.outcome.value(), reference.outcome.value())
        else {
            let reason = reference
                .outcome
                .failure()
                .map(|f| f.to_string())
                .unwrap_or_default();
            return Verdict::new(
                VerdictKind::IndependentReview,
                format!("reference solution could not be traced: {reason}"),
            );
        };

        if user_value.text != reference_value.text {
            return Verdict::new(
                VerdictKind::LogicError,
                format!(
                    "results differ: \"{}\" != \"{}\" (user vs reference)",
                    user_value.text, reference_value.text
                ),
            );
        }

        let user_steps = user.trace.len();
        let reference_steps = reference.trace.len();
        if user_steps > INEFFICIENCY_FACTOR * reference_steps {
            Verdict::new(
                VerdictKind::CorrectInefficient,
                format!(
                    "user took {user_steps} steps, reference took {reference_steps} steps"
                ),
            )
        } else {
            Verdict::new(
                VerdictKind::CorrectOptimal,
                format!(
                    "result matches reference in {user_steps} steps (reference {reference_steps})"
                ),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ExecutionFailure, ExecutionOutcome, ExecutionTrace, FailureKind, ReturnValue,
        StepSnapshot,
    };

    fn trace(steps: usize) -> ExecutionTrace {
        (0..steps)
            .map(|i| StepSnapshot {
                line: i as u32 + 1,
                variables: Default::default(),
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn success(text: &str, steps: usize) -> TraceRun {
        TraceRun {
            outcome: ExecutionOutcome::Success(ReturnValue {
                text: text.into(),
                repr: text.into(),
            }),
            trace: trace(steps),
        }
    }

    fn failed(message: &str, steps: usize) -> TraceRun {
        TraceRun::failed(
            ExecutionFailure::new(FailureKind::Runtime, "ValueError", message, Some(3)),
            trace(steps),
        )
    }

    #[test]
    fn test_user_failure_halts() {
        let analyzer = ComparativeAnalyzer::default();
        let verdict = analyzer.classify(&failed("bad input", 2), Some(&success("1", 1)), Some(1.0));
        assert_eq!(verdict.kind, VerdictKind::Halted);
        assert_eq!(verdict.context, "ValueError: bad input");
    }

    #[test]
    fn test_low_confidence_or_missing_candidate_is_independent_review() {
        let analyzer = ComparativeAnalyzer::default();
        let user = success("3", 4);
        let reference = success("3", 4);
        for confidence in [None, Some(0.0), Some(0.8999)] {
            let verdict = analyzer.classify(&user, Some(&reference), confidence);
            assert_eq!(verdict.kind, VerdictKind::IndependentReview);
            assert_eq!(verdict.context, NO_REFERENCE_CONTEXT);
        }
        assert_eq!(
            analyzer.classify(&user, Some(&reference), Some(0.9)).kind,
            VerdictKind::CorrectOptimal
        );
    }

    #[test]
    fn test_reference_failure_degrades() {
        let analyzer = ComparativeAnalyzer::default();
        let verdict = analyzer.classify(&success("3", 4), Some(&failed("boom", 1)), Some(1.0));
        assert_eq!(verdict.kind, VerdictKind::IndependentReview);
        assert!(verdict.context.contains("ValueError: boom"));

        let verdict = analyzer.classify(&success("3", 4), None, Some(1.0));
        assert_eq!(verdict.kind, VerdictKind::IndependentReview);
    }

    #[test]
    fn test_result_mismatch_is_logic_error() {
        let verdict = ComparativeAnalyzer::default().classify(
            &success("1", 3),
            Some(&success("3", 3)),
            Some(1.0),
        );
        assert_eq!(verdict.kind, VerdictKind::LogicError);
        assert!(verdict.context.contains("\"1\" != \"3\""));
    }

    #[test]
    fn test_comparison_is_textual() {
        let verdict = ComparativeAnalyzer::default().classify(
            &success("3", 1),
            Some(&success("3.0", 1)),
            Some(1.0),
        );
        assert_eq!(verdict.kind, VerdictKind::LogicError);
    }

    #[test]
    fn test_inefficiency_boundary() {
        let analyzer = ComparativeAnalyzer::default();
        let reference = success("ok", 5);
        for user_steps in 0..=10 {
            let verdict = analyzer.classify(&success("ok", user_steps), Some(&reference), Some(1.0));
            assert_eq!(verdict.kind, VerdictKind::CorrectOptimal, "{user_steps} steps");
        }
        for user_steps in 11..=20 {
            let verdict = analyzer.classify(&success("ok", user_steps), Some(&reference), Some(1.0));
            assert_eq!(verdict.kind, VerdictKind::CorrectInefficient, "{user_steps} steps");
        }
    }

    #[test]
    fn test_custom_threshold() {
        let analyzer = ComparativeAnalyzer::new(0.5);
        assert!(analyzer.accepts(Some(0.5)));
        assert!(!analyzer.accepts(Some(0.49)));
        assert!(!analyzer.accepts(None));
    }
}
