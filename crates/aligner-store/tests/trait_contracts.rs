//! Trait contract tests for Corpus and Embedder.
//!
//! Every conforming corpus must pass the shared checks below; they run
//! against the in-memory fake and the SurrealDB backend on `mem://`.

use aligner_store::fakes::{CountingEmbedder, MemoryCorpus};
use aligner_store::{
    Corpus, Embedder, HashingEmbedder, StoredSolution, SurrealCorpus, DEFAULT_DIMENSIONS,
};

fn two_sum() -> StoredSolution {
    StoredSolution::new(
        "two-sum",
        "class Solution:\n    def twoSum(self, nums, target):\n        seen = {}\n        for i, n in enumerate(nums):\n            if target - n in seen:\n                return [seen[target - n], i]\n            seen[n] = i\n",
    )
    .with_title("Two Sum")
    .with_entry_point("twoSum")
}

fn find_max() -> StoredSolution {
    StoredSolution::new(
        "find-max",
        "class Solution:\n    def findMax(self, arr):\n        return max(arr)\n",
    )
}

async fn seed(corpus: &dyn Corpus, embedder: &HashingEmbedder) {
    for solution in [two_sum(), find_max()] {
        let vector = embedder.embed_text(&solution.code);
        corpus.insert(solution, vector).await.unwrap();
    }
}

async fn check_exact_lookup(corpus: &dyn Corpus) {
    let embedder = HashingEmbedder::default();
    seed(corpus, &embedder).await;

    let hit = corpus.lookup_exact("two-sum").await.unwrap().unwrap();
    assert_eq!(hit, two_sum());
    assert!(corpus.lookup_exact("Two Sum").await.unwrap().is_none());
    assert!(corpus.lookup_exact("missing").await.unwrap().is_none());
}

async fn check_nearest(corpus: &dyn Corpus) {
    let embedder = HashingEmbedder::default();
    seed(corpus, &embedder).await;

    let query = embedder.embed_text(&find_max().code);
    let nearest = corpus.query_nearest(&query).await.unwrap().unwrap();
    assert_eq!(nearest.solution.slug, "find-max");
    assert!(nearest.distance < 1e-4, "distance = {}", nearest.distance);
    assert!((0.0..=1.0).contains(&nearest.distance));
}

async fn check_empty(corpus: &dyn Corpus) {
    let query = HashingEmbedder::default().embed_text("def f(): pass");
    assert!(corpus.query_nearest(&query).await.unwrap().is_none());
    assert_eq!(corpus.count().await.unwrap(), 0);
    assert!(corpus.list(10).await.unwrap().is_empty());
}

async fn check_insert_replaces_slug(corpus: &dyn Corpus) {
    let embedder = HashingEmbedder::default();
    seed(corpus, &embedder).await;

    let replacement = StoredSolution::new("two-sum", "class Solution: pass");
    let vector = embedder.embed_text(&replacement.code);
    corpus.insert(replacement.clone(), vector).await.unwrap();

    assert_eq!(corpus.count().await.unwrap(), 2);
    assert_eq!(
        corpus.lookup_exact("two-sum").await.unwrap().unwrap().code,
        "class Solution: pass"
    );
}

async fn check_list_is_ordered_and_limited(corpus: &dyn Corpus) {
    let embedder = HashingEmbedder::default();
    seed(corpus, &embedder).await;

    let rows = corpus.list(1).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].slug, "find-max");

    let rows = corpus.list(10).await.unwrap();
    let slugs: Vec<_> = rows.iter().map(|r| r.slug.as_str()).collect();
    assert_eq!(slugs, vec!["find-max", "two-sum"]);
    assert_eq!(rows[1].title, "Two Sum");
}

// ===========================================================================
// MemoryCorpus
// ===========================================================================

#[tokio::test]
async fn memory_exact_lookup() {
    check_exact_lookup(&MemoryCorpus::new()).await;
}

#[tokio::test]
async fn memory_nearest() {
    check_nearest(&MemoryCorpus::new()).await;
}

#[tokio::test]
async fn memory_empty() {
    check_empty(&MemoryCorpus::new()).await;
}

#[tokio::test]
async fn memory_insert_replaces_slug() {
    check_insert_replaces_slug(&MemoryCorpus::new()).await;
}

#[tokio::test]
async fn memory_list() {
    check_list_is_ordered_and_limited(&MemoryCorpus::new()).await;
}

#[tokio::test]
async fn memory_counts_queries() {
    let corpus = MemoryCorpus::new();
    corpus.lookup_exact("x").await.unwrap();
    corpus.query_nearest(&[1.0]).await.unwrap();
    corpus.query_nearest(&[1.0]).await.unwrap();
    assert_eq!(corpus.exact_queries(), 1);
    assert_eq!(corpus.nearest_queries(), 2);
}

// ===========================================================================
// SurrealCorpus (in-memory engine)
// ===========================================================================

#[tokio::test]
async fn surreal_exact_lookup() {
    check_exact_lookup(&SurrealCorpus::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn surreal_nearest() {
    check_nearest(&SurrealCorpus::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn surreal_empty() {
    check_empty(&SurrealCorpus::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn surreal_insert_replaces_slug() {
    check_insert_replaces_slug(&SurrealCorpus::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn surreal_list() {
    check_list_is_ordered_and_limited(&SurrealCorpus::in_memory().await.unwrap()).await;
}

// ===========================================================================
// Embedder
// ===========================================================================

#[tokio::test]
async fn embedder_is_deterministic_through_trait() {
    let embedder = CountingEmbedder::new(HashingEmbedder::default());
    let a = embedder.embed("return max(a)").await.unwrap();
    let b = embedder.embed("return max(a)").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), DEFAULT_DIMENSIONS);
    assert_eq!(embedder.dimensions(), DEFAULT_DIMENSIONS);
    assert_eq!(embedder.calls(), 2);
}
