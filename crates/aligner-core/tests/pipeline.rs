//! End-to-end review scenarios against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use aligner_core::pipeline::fakes::{RecordingFeedback, ScriptedInspector};
use aligner_core::{
    CollaboratorError, Corpus, Inspection, PipelineConfig, PipelineError, Provenance,
    ReviewPipeline, SolutionRetriever, Stage, StoredSolution, VerdictKind,
};
use aligner_store::fakes::{CountingEmbedder, FailingEmbedder, FixedEmbedder, MemoryCorpus};
use aligner_store::HashingEmbedder;

const FIND_MAX_REFERENCE: &str = "class Solution:\n    def findMax(self, arr):\n        return max(arr)\n";

fn find_max_reference() -> StoredSolution {
    StoredSolution::new("find-max", FIND_MAX_REFERENCE)
        .with_title("Find Max")
        .with_entry_point("findMax")
}

async fn seeded_corpus(solution: StoredSolution, vector: Vec<f32>) -> Arc<MemoryCorpus> {
    let corpus = Arc::new(MemoryCorpus::new());
    corpus.insert(solution, vector).await.unwrap();
    corpus
}

fn pipeline(
    inspection: Inspection,
    corpus: Arc<MemoryCorpus>,
    embedder: Arc<CountingEmbedder<FixedEmbedder>>,
) -> ReviewPipeline {
    ReviewPipeline::new(
        Arc::new(ScriptedInspector::returning(inspection)),
        SolutionRetriever::new(corpus, embedder),
        PipelineConfig::default(),
    )
}

fn counting(vector: Vec<f32>) -> Arc<CountingEmbedder<FixedEmbedder>> {
    Arc::new(CountingEmbedder::new(FixedEmbedder::new(vector)))
}

fn find_max_inspection() -> Inspection {
    Inspection::python("f")
        .with_predicted_problem("Find Max")
        .with_test_input("([3,1,2],)")
}

/// Test: matching result in comparable steps is optimal
#[tokio::test]
async fn test_matching_solution_is_correct_optimal() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let embedder = counting(vec![1.0, 0.0]);
    let pipeline = pipeline(find_max_inspection(), corpus, embedder);

    let report = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .expect("review failed");

    assert_eq!(report.verdict.kind, VerdictKind::CorrectOptimal);
    let user = report.user_run.as_ref().unwrap();
    assert_eq!(user.outcome.value().unwrap().text, "3");
    let reference = report.reference_run.as_ref().unwrap();
    assert_eq!(reference.outcome.value().unwrap().text, "3");
    assert_eq!(report.reference_entry_point.as_deref(), Some("findMax"));
    assert!(!report.arguments_defaulted);
    assert_eq!(
        report.stages.visited(),
        &[
            Stage::Inspecting,
            Stage::ExecutingUser,
            Stage::Retrieving,
            Stage::ExecutingReference,
            Stage::Classifying,
            Stage::Done,
        ]
    );
}

/// Test: differing results are a logic error quoting both texts
#[tokio::test]
async fn test_different_result_is_logic_error() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let pipeline = pipeline(find_max_inspection(), corpus, counting(vec![1.0, 0.0]));

    let report = pipeline
        .review("def f(a): return min(a)\n", "")
        .await
        .unwrap();

    assert_eq!(report.verdict.kind, VerdictKind::LogicError);
    assert!(
        report.verdict.context.contains("\"1\" != \"3\""),
        "context = {}",
        report.verdict.context
    );
}

/// Test: an exact slug hit never consults the embedder
#[tokio::test]
async fn test_exact_hit_skips_embedding() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let embedder = counting(vec![1.0, 0.0]);
    let pipeline = pipeline(find_max_inspection(), corpus.clone(), embedder.clone());

    let report = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .unwrap();

    let candidate = report.candidate.unwrap();
    assert_eq!(candidate.provenance, Provenance::Exact);
    assert_eq!(candidate.confidence, 1.0);
    assert_eq!(embedder.calls(), 0);
    assert_eq!(corpus.nearest_queries(), 0);
}

/// Test: a weak semantic match is reported but never executed
#[tokio::test]
async fn test_low_confidence_match_is_independent_review() {
    let corpus = seeded_corpus(find_max_reference(), vec![0.8, 0.6]).await;
    let embedder = counting(vec![1.0, 0.0]);
    let inspection = Inspection::python("f")
        .with_predicted_problem("Largest Element")
        .with_test_input("([3,1,2],)");
    let pipeline = pipeline(inspection, corpus, embedder.clone());

    let report = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .unwrap();

    let candidate = report.candidate.as_ref().unwrap();
    assert_eq!(candidate.provenance, Provenance::Semantic);
    assert!((candidate.confidence - 0.8).abs() < 1e-3, "confidence = {}", candidate.confidence);
    assert_eq!(embedder.calls(), 1);
    assert_eq!(report.verdict.kind, VerdictKind::IndependentReview);
    assert_eq!(report.verdict.context, "no reference available.");
    assert!(report.reference_run.is_none());
    assert!(!report.stages.contains(Stage::ExecutingReference));
}

/// Test: a crashing submission halts before retrieval
#[tokio::test]
async fn test_runtime_error_halts_without_retrieval() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let embedder = counting(vec![1.0, 0.0]);
    let pipeline = pipeline(find_max_inspection(), corpus.clone(), embedder.clone());

    let code = "def f(a):\n    x = len(a)\n    raise ValueError('bad input')\n";
    let report = pipeline.review(code, "").await.unwrap();

    assert_eq!(report.verdict.kind, VerdictKind::Halted);
    assert!(report.verdict.context.contains("ValueError"));
    let user = report.user_run.as_ref().unwrap();
    assert_eq!(user.outcome.failure().unwrap().line, Some(3));
    assert_eq!(user.trace.lines(), vec![2, 3]);
    assert_eq!(
        report.stages.visited(),
        &[Stage::Inspecting, Stage::ExecutingUser, Stage::Halted]
    );
    assert!(report.candidate.is_none());
    assert_eq!(corpus.exact_queries(), 0);
    assert_eq!(corpus.nearest_queries(), 0);
    assert_eq!(embedder.calls(), 0);
}

/// Test: many more steps than the reference is inefficient
#[tokio::test]
async fn test_slow_solution_is_correct_inefficient() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let pipeline = pipeline(find_max_inspection(), corpus, counting(vec![1.0, 0.0]));

    let code = "\
def f(a):
    best = a[0]
    for x in a:
        for y in a:
            if x >= y and x > best:
                best = x
    return best
";
    let report = pipeline.review(code, "").await.unwrap();

    assert_eq!(report.verdict.kind, VerdictKind::CorrectInefficient);
    let user_steps = report.user_run.as_ref().unwrap().trace.len();
    let reference_steps = report.reference_run.as_ref().unwrap().trace.len();
    assert!(user_steps > 2 * reference_steps);
    assert_eq!(
        report.verdict.context,
        format!("user took {user_steps} steps, reference took {reference_steps} steps")
    );
}

/// Test: a reference that fails to run degrades to independent review
#[tokio::test]
async fn test_broken_reference_is_independent_review() {
    let broken = StoredSolution::new(
        "find-max",
        "class Solution:\n    def findMax(self, arr):\n        return arr[10]\n",
    )
    .with_entry_point("findMax");
    let corpus = seeded_corpus(broken, vec![1.0, 0.0]).await;
    let pipeline = pipeline(find_max_inspection(), corpus, counting(vec![1.0, 0.0]));

    let report = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .unwrap();

    assert_eq!(report.verdict.kind, VerdictKind::IndependentReview);
    assert!(report.verdict.context.contains("IndexError"));
    assert!(report.stages.contains(Stage::ExecutingReference));
}

/// Test: the reference entry point is discovered when the corpus lacks one
#[tokio::test]
async fn test_reference_method_discovered() {
    let solution = StoredSolution::new("find-max", FIND_MAX_REFERENCE);
    let corpus = seeded_corpus(solution, vec![1.0, 0.0]).await;
    let pipeline = pipeline(find_max_inspection(), corpus, counting(vec![1.0, 0.0]));

    let report = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .unwrap();

    assert_eq!(report.reference_entry_point.as_deref(), Some("findMax"));
    assert_eq!(report.verdict.kind, VerdictKind::CorrectOptimal);
}

/// Test: unparseable test input falls back to the default arguments
#[tokio::test]
async fn test_bad_test_input_uses_default_arguments() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let inspection = Inspection::python("f")
        .with_predicted_problem("find-max")
        .with_test_input("nums = [3, 1, 2]");
    let pipeline = pipeline(inspection, corpus, counting(vec![1.0, 0.0]));

    let report = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .unwrap();

    assert!(report.arguments_defaulted);
    assert_eq!(report.submission.arguments, aligner_core::default_arguments());
    assert_eq!(
        report.user_run.as_ref().unwrap().outcome.value().unwrap().text,
        "5"
    );
    assert_eq!(report.verdict.kind, VerdictKind::CorrectOptimal);
}

/// Test: the entry point is discovered when the inspector omits it
#[tokio::test]
async fn test_missing_entry_point_is_discovered() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let inspection = Inspection {
        language: "python".into(),
        entry_point: None,
        predicted_problem: Some("Find Max".into()),
        test_input: Some("([3, 1, 2],)".into()),
    };
    let pipeline = pipeline(inspection, corpus, counting(vec![1.0, 0.0]));

    let report = pipeline
        .review("def largest(a):\n    return max(a)\n", "")
        .await
        .unwrap();

    assert_eq!(report.submission.entry_point, "largest");
    assert_eq!(report.verdict.kind, VerdictKind::CorrectOptimal);
}

/// Test: non-executable languages are compared statically
#[tokio::test]
async fn test_non_python_submission_skips_execution() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let inspection = Inspection::default()
        .with_language("java")
        .with_predicted_problem("Find Max");
    let feedback = Arc::new(RecordingFeedback::new());
    let pipeline = pipeline(inspection, corpus, counting(vec![1.0, 0.0]))
        .with_feedback(feedback.clone());

    let code = "class Solution { int findMax(int[] a) { return 0; } }";
    let report = pipeline.review(code, "").await.unwrap();

    assert!(report.user_run.is_none());
    assert!(report.reference_run.is_none());
    assert!(!report.stages.contains(Stage::ExecutingUser));
    assert_eq!(report.verdict.kind, VerdictKind::IndependentReview);
    assert!(report.verdict.context.contains("find-max"));

    let requests = feedback.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].reference_code.as_deref(), Some(FIND_MAX_REFERENCE));
    assert_eq!(requests[0].issue(), "STATIC ANALYSIS");
    assert!(report.feedback.unwrap().starts_with("STATIC ANALYSIS"));
}

/// Test: feedback receives the verdict for executed submissions
#[tokio::test]
async fn test_feedback_receives_verdict() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let feedback = Arc::new(RecordingFeedback::new());
    let pipeline = pipeline(find_max_inspection(), corpus, counting(vec![1.0, 0.0]))
        .with_feedback(feedback.clone());

    let report = pipeline
        .review("def f(a): return min(a)\n", "")
        .await
        .unwrap();

    let requests = feedback.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].verdict, report.verdict);
    assert!(requests[0].reference_code.is_none());
    assert!(report.feedback.unwrap().starts_with("LOGIC BUG"));
}

/// Test: a failing feedback service leaves the verdict intact
#[tokio::test]
async fn test_feedback_failure_is_not_fatal() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let feedback = Arc::new(RecordingFeedback::failing());
    let pipeline = pipeline(find_max_inspection(), corpus, counting(vec![1.0, 0.0]))
        .with_feedback(feedback.clone());

    let report = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .unwrap();

    assert_eq!(report.verdict.kind, VerdictKind::CorrectOptimal);
    assert!(report.feedback.is_none());
    assert_eq!(feedback.requests().len(), 1);
}

/// Test: a failing embedder degrades to independent review
#[tokio::test]
async fn test_retrieval_failure_degrades() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let pipeline = ReviewPipeline::new(
        Arc::new(ScriptedInspector::returning(
            Inspection::python("f").with_test_input("([3,1,2],)"),
        )),
        SolutionRetriever::new(corpus, Arc::new(FailingEmbedder)),
        PipelineConfig::default(),
    );

    let report = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .unwrap();

    assert!(report.candidate.is_none());
    assert_eq!(report.verdict.kind, VerdictKind::IndependentReview);
    assert!(report.stages.contains(Stage::Done));
}

/// Test: an empty corpus yields no candidate
#[tokio::test]
async fn test_empty_corpus_is_independent_review() {
    let pipeline = ReviewPipeline::new(
        Arc::new(ScriptedInspector::returning(find_max_inspection())),
        SolutionRetriever::new(
            Arc::new(MemoryCorpus::new()),
            Arc::new(HashingEmbedder::default()),
        ),
        PipelineConfig::default(),
    );

    let report = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .unwrap();

    assert!(report.candidate.is_none());
    assert_eq!(report.verdict.kind, VerdictKind::IndependentReview);
}

/// Test: a slow inspector aborts the review with a deadline error
#[tokio::test(start_paused = true)]
async fn test_inspector_deadline_aborts_review() {
    let inspector = Arc::new(
        ScriptedInspector::returning(find_max_inspection()).with_delay(Duration::from_secs(5)),
    );
    let pipeline = ReviewPipeline::new(
        inspector.clone(),
        SolutionRetriever::new(
            Arc::new(MemoryCorpus::new()),
            Arc::new(HashingEmbedder::default()),
        ),
        PipelineConfig::default().with_inspector_timeout(Duration::from_millis(100)),
    );

    let err = pipeline
        .review("def f(a): return max(a)\n", "")
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Deadline(_)), "got {err:?}");
    assert_eq!(inspector.calls(), 1);
}

/// Test: inspector failures and empty answers abort the review
#[tokio::test]
async fn test_inspector_failures_abort_review() {
    let retriever = SolutionRetriever::new(
        Arc::new(MemoryCorpus::new()),
        Arc::new(HashingEmbedder::default()),
    );

    let failing = ReviewPipeline::new(
        Arc::new(ScriptedInspector::failing(CollaboratorError::Transport(
            "connection refused".into(),
        ))),
        retriever.clone(),
        PipelineConfig::default(),
    );
    let err = failing.review("def f(): pass\n", "").await.unwrap_err();
    assert!(matches!(err, PipelineError::Inspection(_)));

    let empty = ReviewPipeline::new(
        Arc::new(ScriptedInspector::empty()),
        retriever,
        PipelineConfig::default(),
    );
    let err = empty.review("def f(): pass\n", "").await.unwrap_err();
    assert!(matches!(err, PipelineError::InspectionMissing));
}

/// Test: every review gets a fresh id and serializes cleanly
#[tokio::test]
async fn test_report_serializes() {
    let corpus = seeded_corpus(find_max_reference(), vec![1.0, 0.0]).await;
    let pipeline = pipeline(find_max_inspection(), corpus, counting(vec![1.0, 0.0]));

    let first = pipeline.review("def f(a): return max(a)\n", "").await.unwrap();
    let second = pipeline.review("def f(a): return max(a)\n", "").await.unwrap();
    assert_ne!(first.review_id, second.review_id);
    assert_eq!(first.verdict, second.verdict);

    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(json["verdict"]["kind"], "CORRECT_OPTIMAL");
    assert_eq!(json["stages"][0], "INSPECTING");
    assert_eq!(json["submission"]["arguments"][0], "[3, 1, 2]");
}
