//! Domain models for CodeAligner.
//!
//! Canonical definitions for the entities that flow through a review:
//! - `CodeSubmission`: the code under review and how to invoke it
//! - `ExecutionTrace` / `ExecutionOutcome`: what one traced run produced
//! - `CandidateSolution`: a reference retrieved from the corpus
//! - `Verdict`: the classifier's terminal judgment

pub mod candidate;
pub mod execution;
pub mod submission;
pub mod verdict;

pub use candidate::{CandidateSolution, Provenance};
pub use execution::{
    ExecutionFailure, ExecutionOutcome, ExecutionTrace, FailureKind, ReturnValue, StepSnapshot,
    TraceRun,
};
pub use submission::{CodeSubmission, InvocationStyle};
pub use verdict::{Verdict, VerdictKind};
