//! Aligner-Store: reference-solution corpus for CodeAligner
//!
//! This crate owns everything the review pipeline knows about persisted
//! reference solutions and the vectors used to find them.
//!
//! ## Key Components
//!
//! - `Corpus`: exact-key and nearest-neighbour lookup over stored solutions
//! - `Embedder`: deterministic text → vector encoder
//! - `SurrealCorpus`: SurrealDB-backed corpus (in-memory or on-disk)
//! - `HashingEmbedder`: local feature-hashing embedder, no model download
//! - `ingest`: JSON Lines ingestion of solution datasets
//! - `canonical_slug`: the key every stored solution is filed under
//!
//! In-memory fakes live in the `fakes` module for contract tests.

pub mod embedding;
mod error;
pub mod fakes;
pub mod ingest;
mod slug;
pub mod storage_traits;
mod surreal_corpus;

pub use embedding::{cosine_distance, HashingEmbedder, DEFAULT_DIMENSIONS};
pub use error::StoreError;
pub use ingest::{ingest_jsonl, IngestRecord, IngestSummary};
pub use slug::canonical_slug;
pub use storage_traits::{
    Corpus, CorpusEntry, Embedder, NearestMatch, StoreResult, StoredSolution,
};
pub use surreal_corpus::{CorpusConfig, SurrealCorpus};
