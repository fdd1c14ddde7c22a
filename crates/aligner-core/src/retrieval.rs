//! Two-tier reference lookup: exact slug first, nearest neighbour second.

use std::sync::Arc;

use thiserror::Error;

pub use aligner_store::canonical_slug;
use aligner_store::{Corpus, Embedder, StoreError};

use crate::domain::CandidateSolution;
use crate::obs;

/// Characters of submitted code folded into a prediction-boosted query.
pub const QUERY_CODE_PREFIX: usize = 200;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("corpus lookup failed: {0}")]
    Store(#[from] StoreError),
}

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

/// Text embedded for the semantic fallback.
pub fn semantic_query(code: &str, predicted_id: Option<&str>) -> String {
    match predicted_id {
        Some(id) => {
            let prefix: String = code.chars().take(QUERY_CODE_PREFIX).collect();
            format!("{id} {id} {prefix}")
        }
        None => code.to_string(),
    }
}

/// Finds the reference solution for a submission.
#[derive(Clone)]
pub struct SolutionRetriever {
    corpus: Arc<dyn Corpus>,
    embedder: Arc<dyn Embedder>,
}

impl SolutionRetriever {
    pub fn new(corpus: Arc<dyn Corpus>, embedder: Arc<dyn Embedder>) -> Self {
        Self { corpus, embedder }
    }

    /// Exact hits return immediately without touching the embedder.
    pub async fn find(
        &self,
        code: &str,
        predicted_id: Option<&str>,
    ) -> RetrievalResult<Option<CandidateSolution>> {
        let predicted_id = predicted_id.map(str::trim).filter(|id| !id.is_empty());

        if let Some(id) = predicted_id {
            let slug = canonical_slug(id);
            if !slug.is_empty() {
                if let Some(solution) = self.corpus.lookup_exact(&slug).await? {
                    let candidate = CandidateSolution::exact(solution);
                    obs::emit_retrieval_hit(&candidate.slug, "exact", candidate.confidence);
                    return Ok(Some(candidate));
                }
            }
        }

        let vector = self
            .embedder
            .embed(&semantic_query(code, predicted_id))
            .await?;
        match self.corpus.query_nearest(&vector).await? {
            Some(nearest) => {
                let candidate = CandidateSolution::semantic(nearest.solution, nearest.distance);
                obs::emit_retrieval_hit(&candidate.slug, "semantic", candidate.confidence);
                Ok(Some(candidate))
            }
            None => {
                obs::emit_retrieval_miss(predicted_id);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use aligner_store::fakes::{CountingEmbedder, FailingEmbedder, FixedEmbedder, MemoryCorpus};
    use aligner_store::{HashingEmbedder, StoreResult, StoredSolution};
    use async_trait::async_trait;

    use crate::domain::Provenance;

    struct RecordingEmbedder {
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Embedder for RecordingEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(vec![1.0, 0.0])
        }
    }

    #[test]
    fn test_semantic_query_boosts_prediction() {
        let code = "x".repeat(500);
        let query = semantic_query(&code, Some("Two Sum"));
        assert_eq!(query.len(), "Two Sum Two Sum ".len() + QUERY_CODE_PREFIX);
        assert!(query.starts_with("Two Sum Two Sum x"));
        assert_eq!(semantic_query("def f(): pass", None), "def f(): pass");
    }

    #[tokio::test]
    async fn test_exact_hit_short_circuits_embedding() {
        let corpus = Arc::new(MemoryCorpus::new());
        corpus
            .insert(StoredSolution::new("two-sum", "class Solution: pass"), vec![1.0, 0.0])
            .await
            .unwrap();
        let embedder = Arc::new(CountingEmbedder::new(HashingEmbedder::new(2)));
        let retriever = SolutionRetriever::new(corpus.clone(), embedder.clone());

        let candidate = retriever
            .find("def f(): pass", Some("Two Sum"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.provenance, Provenance::Exact);
        assert_eq!(candidate.confidence, 1.0);
        assert_eq!(embedder.calls(), 0);
        assert_eq!(corpus.nearest_queries(), 0);
    }

    #[tokio::test]
    async fn test_semantic_fallback_converts_distance() {
        let corpus = Arc::new(MemoryCorpus::new());
        corpus
            .insert(StoredSolution::new("three-sum", "class Solution: pass"), vec![0.8, 0.6])
            .await
            .unwrap();
        let retriever =
            SolutionRetriever::new(corpus.clone(), Arc::new(FixedEmbedder::new(vec![1.0, 0.0])));

        let candidate = retriever
            .find("def f(): pass", Some("two-sum"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.provenance, Provenance::Semantic);
        assert_eq!(candidate.slug, "three-sum");
        assert!((candidate.confidence - 0.8).abs() < 1e-6);
        assert_eq!(corpus.exact_queries(), 1);
    }

    #[tokio::test]
    async fn test_prediction_is_folded_into_query_text() {
        let embedder = Arc::new(RecordingEmbedder {
            texts: Mutex::new(Vec::new()),
        });
        let retriever = SolutionRetriever::new(Arc::new(MemoryCorpus::new()), embedder.clone());
        retriever.find("def f(): pass", Some("Two Sum")).await.unwrap();
        retriever.find("def g(): pass", None).await.unwrap();
        assert_eq!(
            *embedder.texts.lock().unwrap(),
            vec![
                "Two Sum Two Sum def f(): pass".to_string(),
                "def g(): pass".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_none() {
        let retriever = SolutionRetriever::new(
            Arc::new(MemoryCorpus::new()),
            Arc::new(HashingEmbedder::new(8)),
        );
        assert!(retriever.find("def f(): pass", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_embedder_failure_is_an_error() {
        let retriever =
            SolutionRetriever::new(Arc::new(MemoryCorpus::new()), Arc::new(FailingEmbedder));
        let err = retriever.find("def f(): pass", None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Store(StoreError::Embedding(_))));
    }
}
