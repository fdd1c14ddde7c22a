//! In-memory fakes for the corpus and embedder traits (testing only)
//!
//! Provides `MemoryCorpus`, `CountingEmbedder`, and `FixedEmbedder` that
//! satisfy the trait contracts without any external dependencies. Call
//! counters make short-circuit behaviour observable from tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::error::StoreError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryCorpus
// ---------------------------------------------------------------------------

/// In-memory corpus with brute-force cosine nearest-neighbour search.
#[derive(Debug, Default)]
pub struct MemoryCorpus {
    entries: Mutex<Vec<(StoredSolution, Vec<f32>)>>,
    exact_queries: AtomicUsize,
    nearest_queries: AtomicUsize,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `lookup_exact` calls served so far.
    pub fn exact_queries(&self) -> usize {
        self.exact_queries.load(Ordering::Relaxed)
    }

    /// Number of `query_nearest` calls served so far.
    pub fn nearest_queries(&self) -> usize {
        self.nearest_queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Corpus for MemoryCorpus {
    async fn lookup_exact(&self, slug: &str) -> StoreResult<Option<StoredSolution>> {
        self.exact_queries.fetch_add(1, Ordering::Relaxed);
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .find(|(solution, _)| solution.slug == slug)
            .map(|(solution, _)| solution.clone()))
    }

    async fn query_nearest(&self, vector: &[f32]) -> StoreResult<Option<NearestMatch>> {
        self.nearest_queries.fetch_add(1, Ordering::Relaxed);
        let entries = self.entries.lock().unwrap();
        let mut best: Option<NearestMatch> = None;
        for (solution, embedding) in entries.iter() {
            if embedding.len() != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: embedding.len(),
                    actual: vector.len(),
                });
            }
            let distance = cosine_distance(vector, embedding);
            if best.as_ref().map_or(true, |b| distance < b.distance) {
                best = Some(NearestMatch {
                    solution: solution.clone(),
                    distance,
                });
            }
        }
        Ok(best)
    }

    async fn insert(&self, solution: StoredSolution, embedding: Vec<f32>) -> StoreResult<()> {
        let solution = solution.canonicalized();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|(existing, _)| existing.slug != solution.slug);
        entries.push((solution, embedding));
        Ok(())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.entries.lock().unwrap().len())
    }

    async fn list(&self, limit: usize) -> StoreResult<Vec<CorpusEntry>> {
        let entries = self.entries.lock().unwrap();
        let mut rows: Vec<CorpusEntry> = entries
            .iter()
            .map(|(s, _)| CorpusEntry {
                slug: s.slug.clone(),
                title: s.title.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.slug.cmp(&b.slug));
        rows.truncate(limit);
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Embedders
// ---------------------------------------------------------------------------

/// Wraps another embedder and counts calls.
pub struct CountingEmbedder<E> {
    inner: E,
    calls: AtomicUsize,
}

impl<E: Embedder> CountingEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CountingEmbedder<E> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.inner.embed(text).await
    }
}

/// Returns the same vector for every input; lets tests pin exact distances.
#[derive(Debug, Clone)]
pub struct FixedEmbedder {
    vector: Vec<f32>,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn dimensions(&self) -> usize {
        self.vector.len()
    }

    async fn embed(&self, _text: &str) -> StoreResult<Vec<f32>> {
        Ok(self.vector.clone())
    }
}

/// Always fails; exercises degraded retrieval paths.
#[derive(Debug, Clone, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> StoreResult<Vec<f32>> {
        Err(StoreError::Embedding("embedding service unavailable".into()))
    }
}
