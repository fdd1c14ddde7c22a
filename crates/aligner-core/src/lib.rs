//! CodeAligner Core Library
//!
//! Trace-based code review: runs a submission under an instrumented
//! interpreter, retrieves a reference solution, and classifies the submission
//! by comparing the two executions.

pub mod analyzer;
pub mod domain;
pub mod execution;
pub mod obs;
pub mod pipeline;
pub mod retrieval;
pub mod telemetry;
pub mod tracer;

pub use analyzer::{ComparativeAnalyzer, DEFAULT_ACCEPTANCE_THRESHOLD, INEFFICIENCY_FACTOR};

pub use domain::{
    CandidateSolution, CodeSubmission, ExecutionFailure, ExecutionOutcome, ExecutionTrace,
    FailureKind, InvocationStyle, Provenance, ReturnValue, StepSnapshot, TraceRun, Verdict,
    VerdictKind,
};

pub use execution::{trace_with_deadline, with_deadline, DeadlineExceeded};

pub use pipeline::{
    CollaboratorError, FeedbackGenerator, FeedbackRequest, Inspection, Inspector, PipelineConfig,
    PipelineError, PipelineResult, ReviewPipeline, ReviewReport, Stage, StageLog,
    StaticInspector,
};

pub use retrieval::{canonical_slug, semantic_query, RetrievalError, SolutionRetriever};

pub use telemetry::init_tracing;

pub use tracer::{
    default_arguments, discover_entry, discover_method, format_arguments,
    parse_argument_literal, Literal, Tracer, TracerConfig, TracerError, DEFAULT_CONTAINER,
};

pub use aligner_store::{Corpus, Embedder, StoredSolution};
