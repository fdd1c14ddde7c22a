//! Ingestion of JSON Lines datasets into a corpus.

use std::io::Write;

use aligner_store::fakes::MemoryCorpus;
use aligner_store::{
    ingest_jsonl, Corpus, HashingEmbedder, StoreError, StoredSolution, SurrealCorpus,
};

#[tokio::test]
async fn ingests_records_and_skips_codeless_rows() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{"task_id": "two-sum", "completion": "class Solution:\n    def twoSum(self, nums, target): pass"}}"#
    )
    .unwrap();
    writeln!(file).unwrap();
    writeln!(file, r#"{{"task_id": "empty", "completion": ""}}"#).unwrap();
    writeln!(
        file,
        r#"{{"response": "def f(a):\n    return a", "entry_point": "f"}}"#
    )
    .unwrap();

    let corpus = MemoryCorpus::new();
    let embedder = HashingEmbedder::default();
    let summary = ingest_jsonl(file.path(), &corpus, &embedder).await.unwrap();

    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(corpus.count().await.unwrap(), 2);
    assert!(corpus.lookup_exact("two-sum").await.unwrap().is_some());

    let untitled = corpus.lookup_exact("problem-3").await.unwrap().unwrap();
    assert_eq!(untitled.entry_point.as_deref(), Some("f"));
}

#[tokio::test]
async fn malformed_line_reports_line_number() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"task_id": "ok", "completion": "x = 1"}}"#).unwrap();
    writeln!(file, "not json").unwrap();

    let corpus = MemoryCorpus::new();
    let err = ingest_jsonl(file.path(), &corpus, &HashingEmbedder::default())
        .await
        .unwrap_err();

    match err {
        StoreError::InvalidRecord { line, .. } => assert_eq!(line, 2),
        other => panic!("expected InvalidRecord, got {other:?}"),
    }
    assert_eq!(corpus.count().await.unwrap(), 1);
}

#[tokio::test]
async fn titled_task_ids_are_found_by_canonical_slug() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{"task_id": "1. Two Sum", "completion": "def twoSum(nums, target): pass"}}"#
    )
    .unwrap();
    writeln!(
        file,
        r#"{{"task_id": "Valid Parentheses", "completion": "def isValid(s): pass"}}"#
    )
    .unwrap();

    let corpus = MemoryCorpus::new();
    ingest_jsonl(file.path(), &corpus, &HashingEmbedder::default())
        .await
        .unwrap();

    let two_sum = corpus.lookup_exact("two-sum").await.unwrap().unwrap();
    assert_eq!(two_sum.title, "1. Two Sum");
    assert!(corpus
        .lookup_exact("valid-parentheses")
        .await
        .unwrap()
        .is_some());
    assert!(corpus.lookup_exact("Two Sum").await.unwrap().is_none());
}

#[tokio::test]
async fn surreal_corpus_files_inserts_under_canonical_slug() {
    let corpus = SurrealCorpus::in_memory().await.unwrap();
    corpus
        .insert(StoredSolution::new("Merge Two Lists", "def f(): pass"), vec![1.0, 0.0])
        .await
        .unwrap();

    let stored = corpus.lookup_exact("merge-two-lists").await.unwrap().unwrap();
    assert_eq!(stored.title, "Merge Two Lists");
}
