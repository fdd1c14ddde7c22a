//! Service trait definitions for the reference corpus
//!
//! These traits define the two black-box collaborators the retriever talks to:
//! - `Corpus`: keyed and nearest-neighbour lookup of reference solutions
//! - `Embedder`: deterministic text embedding
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::slug::canonical_slug;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A presumed-correct reference implementation stored in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSolution {
    /// Canonical problem identifier (e.g. "two-sum")
    pub slug: String,
    /// Human-readable problem title
    pub title: String,
    /// Reference source code
    pub code: String,
    /// Method on the container type to invoke, when known at ingestion time
    pub entry_point: Option<String>,
}

impl StoredSolution {
    /// Create a solution whose title is derived from the slug
    pub fn new(slug: impl Into<String>, code: impl Into<String>) -> Self {
        let slug = slug.into();
        StoredSolution {
            title: slug.clone(),
            slug,
            code: code.into(),
            entry_point: None,
        }
    }

    /// File the solution under the canonical form of its slug. A slug with
    /// no alphanumeric content is kept as given.
    pub fn canonicalized(mut self) -> Self {
        let slug = canonical_slug(&self.slug);
        if !slug.is_empty() {
            self.slug = slug;
        }
        self
    }

    /// Set a human-readable title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the entry-point method name
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }
}

/// Nearest neighbour returned by a vector query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestMatch {
    pub solution: StoredSolution,
    /// Distance under the corpus metric, clamped to `[0, 1]`
    pub distance: f64,
}

/// Summary row used when listing corpus contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub slug: String,
    pub title: String,
}

/// Reference-solution corpus.
///
/// Guarantees:
/// - `lookup_exact(slug)` matches only on key equality of the canonical slug.
/// - `query_nearest(v)` returns the single closest solution, or `None` when
///   the corpus is empty.
/// - The query path is read-only; writes happen only through `insert`.
#[async_trait]
pub trait Corpus: Send + Sync {
    /// Fetch the solution stored under `slug`, if any.
    async fn lookup_exact(&self, slug: &str) -> StoreResult<Option<StoredSolution>>;

    /// Find the solution whose embedding is closest to `vector`.
    async fn query_nearest(&self, vector: &[f32]) -> StoreResult<Option<NearestMatch>>;

    /// Store a solution with its embedding, replacing any solution with the same slug.
    async fn insert(&self, solution: StoredSolution, embedding: Vec<f32>) -> StoreResult<()>;

    /// Number of stored solutions.
    async fn count(&self) -> StoreResult<usize>;

    /// First `limit` entries ordered by slug.
    async fn list(&self, limit: usize) -> StoreResult<Vec<CorpusEntry>>;
}

/// Deterministic text embedder.
///
/// Identical input text must always produce an identical vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder produces.
    fn dimensions(&self) -> usize;

    /// Embed `text` into a fixed-length vector.
    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>>;
}
