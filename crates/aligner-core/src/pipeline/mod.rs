//! Review orchestration.
//!
//! Sequences inspector → user trace → retrieval → reference trace →
//! classification → feedback hand-off. Only inspection failures abort a
//! review; every later problem degrades into a verdict. Each external call and
//! each traced run carries a deadline and is attempted exactly once.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod fakes;
pub mod stage;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::analyzer::{ComparativeAnalyzer, NO_REFERENCE_CONTEXT};
use crate::domain::{
    CandidateSolution, CodeSubmission, ExecutionFailure, ExecutionTrace, FailureKind,
    InvocationStyle, TraceRun, Verdict, VerdictKind,
};
use crate::execution::{trace_with_deadline, with_deadline};
use crate::obs;
use crate::retrieval::SolutionRetriever;
use crate::tracer::{discover_entry, discover_method, parse_argument_literal, Literal, Tracer};

pub use collaborators::{
    FeedbackGenerator, FeedbackRequest, Inspection, Inspector, StaticInspector,
};
pub use config::PipelineConfig;
pub use error::{CollaboratorError, PipelineError, PipelineResult};
pub use stage::{Stage, StageLog};

/// Everything a review produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewReport {
    pub review_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,

    /// Inspector output as received.
    pub inspection: Inspection,

    /// The submission as executed, with resolved entry point and arguments.
    pub submission: CodeSubmission,

    /// True when the inspector's test input was missing or unparseable.
    pub arguments_defaulted: bool,

    /// Absent for non-interpretable languages.
    pub user_run: Option<TraceRun>,

    pub candidate: Option<CandidateSolution>,
    pub reference_entry_point: Option<String>,

    /// Present only when an accepted candidate was executed.
    pub reference_run: Option<TraceRun>,

    pub verdict: Verdict,
    pub stages: StageLog,
    pub feedback: Option<String>,
}

/// The review orchestrator. Holds no state across reviews.
pub struct ReviewPipeline {
    inspector: Arc<dyn Inspector>,
    retriever: SolutionRetriever,
    feedback: Option<Arc<dyn FeedbackGenerator>>,
    tracer: Tracer,
    analyzer: ComparativeAnalyzer,
    config: PipelineConfig,
}

fn definition_failure(exception: &str, message: String) -> TraceRun {
    TraceRun::failed(
        ExecutionFailure::new(FailureKind::Definition, exception, message, None),
        ExecutionTrace::new(),
    )
}

impl ReviewPipeline {
    pub fn new(
        inspector: Arc<dyn Inspector>,
        retriever: SolutionRetriever,
        config: PipelineConfig,
    ) -> Self {
        Self {
            inspector,
            retriever,
            feedback: None,
            tracer: Tracer::new(config.tracer.clone()),
            analyzer: ComparativeAnalyzer::new(config.acceptance_threshold),
            config,
        }
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackGenerator>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Review `code`, optionally described in prose by the user.
    pub async fn review(&self, code: &str, description: &str) -> PipelineResult<ReviewReport> {
        let review_id = Uuid::new_v4().to_string();
        let span = obs::review_span(&review_id);
        self.run_review(review_id, code, description)
            .instrument(span)
            .await
    }

    async fn run_review(
        &self,
        review_id: String,
        code: &str,
        description: &str,
    ) -> PipelineResult<ReviewReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut stages = StageLog::new();

        stages.advance(Stage::Inspecting)?;
        let inspection = with_deadline(
            "inspector",
            self.config.inspector_timeout(),
            self.inspector.inspect(code, description),
        )
        .await??
        .ok_or(PipelineError::InspectionMissing)?;

        let (arguments, arguments_defaulted) =
            self.resolve_arguments(inspection.test_input.as_deref());
        let entry_point = inspection
            .entry_point
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| discover_entry(code).ok().flatten());
        let submission = CodeSubmission::new(
            code,
            inspection.language.clone(),
            entry_point.clone().unwrap_or_default(),
            arguments,
        );

        let mut report = ReviewReport {
            review_id,
            started_at,
            duration_ms: 0,
            inspection,
            submission,
            arguments_defaulted,
            user_run: None,
            candidate: None,
            reference_entry_point: None,
            reference_run: None,
            verdict: Verdict::new(VerdictKind::IndependentReview, NO_REFERENCE_CONTEXT),
            stages: StageLog::new(),
            feedback: None,
        };

        if report.submission.is_interpretable() {
            stages.advance(Stage::ExecutingUser)?;
            let run = match &entry_point {
                Some(entry) => {
                    self.trace(code, entry, &report.submission.arguments, InvocationStyle::Function)
                        .await
                }
                None => definition_failure(
                    "NameError",
                    "no entry point could be determined".to_string(),
                ),
            };
            if run.outcome.is_failure() {
                stages.advance(Stage::Halted)?;
                report.verdict = self.analyzer.classify(&run, None, None);
                obs::emit_verdict_classified(report.verdict.kind.as_str(), run.trace.len(), None);
                report.user_run = Some(run);
                return Ok(self.finish(report, stages, clock).await);
            }
            report.user_run = Some(run);
        } else {
            warn!(
                language = %report.submission.language,
                "language is not executable; comparing statically"
            );
        }

        stages.advance(Stage::Retrieving)?;
        report.candidate = self
            .retrieve(code, report.inspection.predicted_problem.as_deref())
            .await;
        let confidence = report.candidate.as_ref().map(|c| c.confidence);

        if let (Some(_), Some(candidate)) = (&report.user_run, &report.candidate) {
            if self.analyzer.accepts(confidence) {
                stages.advance(Stage::ExecutingReference)?;
                let entry = self.reference_entry(candidate);
                let run = match &entry {
                    Some(entry) => {
                        self.trace(
                            &candidate.code,
                            entry,
                            &report.submission.arguments,
                            InvocationStyle::Method,
                        )
                        .await
                    }
                    None => definition_failure(
                        "AttributeError",
                        format!(
                            "reference defines no public method on '{}'",
                            self.config.tracer.container
                        ),
                    ),
                };
                report.reference_entry_point = entry;
                report.reference_run = Some(run);
            }
        }

        stages.advance(Stage::Classifying)?;
        report.verdict = match &report.user_run {
            Some(user) => self
                .analyzer
                .classify(user, report.reference_run.as_ref(), confidence),
            None => match &report.candidate {
                Some(candidate) if self.analyzer.accepts(confidence) => Verdict::new(
                    VerdictKind::IndependentReview,
                    format!(
                        "static comparison against reference '{}' ({} is not executable)",
                        candidate.slug, report.submission.language
                    ),
                ),
                _ => Verdict::new(VerdictKind::IndependentReview, NO_REFERENCE_CONTEXT),
            },
        };
        obs::emit_verdict_classified(
            report.verdict.kind.as_str(),
            report.user_run.as_ref().map_or(0, |r| r.trace.len()),
            report.reference_run.as_ref().map(|r| r.trace.len()),
        );
        stages.advance(Stage::Done)?;

        Ok(self.finish(report, stages, clock).await)
    }

    fn resolve_arguments(&self, test_input: Option<&str>) -> (Vec<Literal>, bool) {
        match test_input.map(parse_argument_literal) {
            Some(Ok(arguments)) => (arguments, false),
            Some(Err(err)) => {
                warn!(error = %err, "test input did not parse; using default arguments");
                (self.config.default_arguments.clone(), true)
            }
            None => (self.config.default_arguments.clone(), true),
        }
    }

    fn reference_entry(&self, candidate: &CandidateSolution) -> Option<String> {
        candidate
            .entry_point
            .clone()
            .or_else(|| discover_method(&candidate.code, &self.config.tracer.container).ok().flatten())
    }

    async fn trace(
        &self,
        code: &str,
        entry_point: &str,
        arguments: &[Literal],
        style: InvocationStyle,
    ) -> TraceRun {
        trace_with_deadline(
            &self.tracer,
            code,
            entry_point,
            arguments,
            style,
            self.config.trace_timeout(),
        )
        .await
    }

    async fn retrieve(&self, code: &str, predicted: Option<&str>) -> Option<CandidateSolution> {
        match with_deadline(
            "retrieval",
            self.config.retrieval_timeout(),
            self.retriever.find(code, predicted),
        )
        .await
        {
            Ok(Ok(candidate)) => candidate,
            Ok(Err(err)) => {
                obs::emit_collaborator_error("retrieval", &err);
                None
            }
            Err(exceeded) => {
                obs::emit_collaborator_error("retrieval", &exceeded);
                None
            }
        }
    }

    async fn finish(&self, mut report: ReviewReport, stages: StageLog, clock: Instant) -> ReviewReport {
        report.stages = stages;
        if let Some(feedback) = &self.feedback {
            let static_reference = match (&report.user_run, &report.candidate) {
                (None, Some(candidate)) if self.analyzer.accepts(Some(candidate.confidence)) => {
                    Some(candidate.code.clone())
                }
                _ => None,
            };
            let request = FeedbackRequest {
                code: report.submission.code.clone(),
                language: report.submission.language.clone(),
                verdict: report.verdict.clone(),
                reference_code: static_reference,
            };
            report.feedback = match with_deadline(
                "feedback",
                self.config.feedback_timeout(),
                feedback.explain(&request),
            )
            .await
            {
                Ok(Ok(text)) => Some(text),
                Ok(Err(err)) => {
                    obs::emit_collaborator_error("feedback", &err);
                    None
                }
                Err(exceeded) => {
                    obs::emit_collaborator_error("feedback", &exceeded);
                    None
                }
            };
        }
        report.duration_ms = clock.elapsed().as_millis() as u64;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aligner_store::fakes::{FixedEmbedder, MemoryCorpus};
    use aligner_store::{Corpus, StoredSolution};
    use super::fakes::ScriptedInspector;
    use tracing_test::traced_test;

    async fn pipeline_with_reference() -> ReviewPipeline {
        let corpus = Arc::new(MemoryCorpus::new());
        corpus
            .insert(
                StoredSolution::new(
                    "find-max",
                    "class Solution:\n    def findMax(self, arr):\n        return max(arr)\n",
                ),
                vec![1.0, 0.0],
            )
            .await
            .unwrap();
        ReviewPipeline::new(
            Arc::new(ScriptedInspector::returning(
                Inspection::python("f")
                    .with_predicted_problem("Find Max")
                    .with_test_input("([3, 1, 2],)"),
            )),
            SolutionRetriever::new(corpus, Arc::new(FixedEmbedder::new(vec![1.0, 0.0]))),
            PipelineConfig::default(),
        )
    }

    #[test]
    fn test_resolve_arguments() {
        let pipeline = ReviewPipeline::new(
            Arc::new(ScriptedInspector::empty()),
            SolutionRetriever::new(
                Arc::new(MemoryCorpus::new()),
                Arc::new(FixedEmbedder::new(vec![1.0])),
            ),
            PipelineConfig::default(),
        );
        let (args, defaulted) = pipeline.resolve_arguments(Some("([2, 7], 9)"));
        assert_eq!(args, vec![Literal::List(vec![Literal::Int(2), Literal::Int(7)]), Literal::Int(9)]);
        assert!(!defaulted);

        let (args, defaulted) = pipeline.resolve_arguments(Some("[2, 7"));
        assert_eq!(args, crate::tracer::default_arguments());
        assert!(defaulted);

        let (_, defaulted) = pipeline.resolve_arguments(None);
        assert!(defaulted);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_review_emits_lifecycle_events() {
        let pipeline = pipeline_with_reference().await;
        let report = pipeline.review("def f(a): return max(a)\n", "").await.unwrap();
        assert_eq!(report.verdict.kind, VerdictKind::CorrectOptimal);

        assert!(logs_contain("review.stage"));
        assert!(logs_contain("retrieval.hit"));
        assert!(logs_contain("verdict.classified"));
        assert!(logs_contain("CORRECT_OPTIMAL"));
        assert!(logs_contain(&report.review_id));
    }
}
