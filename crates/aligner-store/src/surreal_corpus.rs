//! SurrealDB-backed reference corpus
//!
//! Supports the in-memory engine (`mem://`, used by tests), an on-disk
//! SurrealKV store, and remote WebSocket endpoints, all through the `any`
//! engine. Nearest-neighbour search ranks rows by cosine similarity computed
//! inside the database.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::storage_traits::{
    Corpus, CorpusEntry, NearestMatch, StoreResult, StoredSolution,
};

/// Connection settings for the corpus database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Engine URL, e.g. `mem://`, `surrealkv://aligner_db`, `ws://host:8000`
    pub url: String,
    /// Namespace (default: "aligner")
    pub namespace: String,
    /// Database name (default: "corpus")
    pub database: String,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            url: "surrealkv://aligner_db".to_string(),
            namespace: "aligner".to_string(),
            database: "corpus".to_string(),
        }
    }
}

impl CorpusConfig {
    /// In-memory database, discarded on drop
    pub fn in_memory() -> Self {
        Self {
            url: "mem://".to_string(),
            ..Self::default()
        }
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - ALIGNER_DB_URL (optional, default: "surrealkv://aligner_db")
    /// - ALIGNER_DB_NAMESPACE (optional, default: "aligner")
    /// - ALIGNER_DB_DATABASE (optional, default: "corpus")
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("ALIGNER_DB_URL").unwrap_or(defaults.url),
            namespace: std::env::var("ALIGNER_DB_NAMESPACE").unwrap_or(defaults.namespace),
            database: std::env::var("ALIGNER_DB_DATABASE").unwrap_or(defaults.database),
        }
    }

    /// Override the engine URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Row layout of the `solutions` table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbSolution {
    slug: String,
    title: String,
    code: String,
    entry_point: Option<String>,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct DbSolutionRow {
    slug: String,
    title: String,
    code: String,
    entry_point: Option<String>,
}

impl DbSolutionRow {
    fn into_solution(self) -> StoredSolution {
        StoredSolution {
            slug: self.slug,
            title: self.title,
            code: self.code,
            entry_point: self.entry_point,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DbScoredRow {
    slug: String,
    title: String,
    code: String,
    entry_point: Option<String>,
    similarity: f64,
}

#[derive(Debug, Deserialize)]
struct DbCountRow {
    total: usize,
}

/// SurrealDB corpus handle
#[derive(Clone)]
pub struct SurrealCorpus {
    db: Surreal<Any>,
}

impl SurrealCorpus {
    /// Connect and set up the schema
    #[instrument(skip(config), fields(url = %config.url, namespace = %config.namespace))]
    pub async fn connect(config: &CorpusConfig) -> StoreResult<Self> {
        info!("Connecting to corpus database");

        let db = surrealdb::engine::any::connect(config.url.as_str())
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to connect to {}: {}", config.url, e))
            })?;

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        let corpus = SurrealCorpus { db };
        corpus.init_schema().await?;

        info!("Corpus database connected and schema initialized");
        Ok(corpus)
    }

    /// Connect to a fresh in-memory database
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect(&CorpusConfig::in_memory()).await
    }

    async fn init_schema(&self) -> StoreResult<()> {
        debug!("Initializing corpus schema");

        let schema = r#"
            DEFINE TABLE IF NOT EXISTS solutions SCHEMAFULL;
            DEFINE FIELD IF NOT EXISTS slug ON solutions TYPE string;
            DEFINE FIELD IF NOT EXISTS title ON solutions TYPE string;
            DEFINE FIELD IF NOT EXISTS code ON solutions TYPE string;
            DEFINE FIELD IF NOT EXISTS entry_point ON solutions TYPE option<string>;
            DEFINE FIELD IF NOT EXISTS embedding ON solutions TYPE array<float>;
            DEFINE INDEX IF NOT EXISTS idx_solution_slug ON solutions FIELDS slug UNIQUE;
        "#;

        self.db
            .query(schema)
            .await
            .and_then(|response| response.check())
            .map_err(|e| StoreError::SchemaSetup(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl Corpus for SurrealCorpus {
    #[instrument(skip(self))]
    async fn lookup_exact(&self, slug: &str) -> StoreResult<Option<StoredSolution>> {
        let slug_owned = slug.to_string();

        let mut result = self
            .db
            .query("SELECT slug, title, code, entry_point FROM solutions WHERE slug = $slug LIMIT 1")
            .bind(("slug", slug_owned))
            .await?;

        let rows: Vec<DbSolutionRow> = result.take(0)?;
        Ok(rows.into_iter().next().map(DbSolutionRow::into_solution))
    }

    #[instrument(skip(self, vector), fields(dimensions = vector.len()))]
    async fn query_nearest(&self, vector: &[f32]) -> StoreResult<Option<NearestMatch>> {
        let vector_owned = vector.to_vec();

        let mut result = self
            .db
            .query(
                "SELECT slug, title, code, entry_point, \
                 vector::similarity::cosine(embedding, $vector) AS similarity \
                 FROM solutions ORDER BY similarity DESC LIMIT 1",
            )
            .bind(("vector", vector_owned))
            .await?;

        let rows: Vec<DbScoredRow> = result.take(0)?;
        Ok(rows.into_iter().next().map(|row| NearestMatch {
            distance: (1.0 - row.similarity).clamp(0.0, 1.0),
            solution: StoredSolution {
                slug: row.slug,
                title: row.title,
                code: row.code,
                entry_point: row.entry_point,
            },
        }))
    }

    #[instrument(skip(self, solution, embedding), fields(slug = %solution.slug))]
    async fn insert(&self, solution: StoredSolution, embedding: Vec<f32>) -> StoreResult<()> {
        debug!("Saving solution");
        let solution = solution.canonicalized();

        let slug = solution.slug.clone();
        let record = DbSolution {
            slug: solution.slug,
            title: solution.title,
            code: solution.code,
            entry_point: solution.entry_point,
            embedding,
        };

        self.db
            .query("DELETE solutions WHERE slug = $slug; CREATE solutions CONTENT $record;")
            .bind(("slug", slug))
            .bind(("record", record))
            .await?
            .check()?;

        Ok(())
    }

    async fn count(&self) -> StoreResult<usize> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM solutions GROUP ALL")
            .await?;

        let rows: Vec<DbCountRow> = result.take(0)?;
        Ok(rows.first().map_or(0, |row| row.total))
    }

    async fn list(&self, limit: usize) -> StoreResult<Vec<CorpusEntry>> {
        let mut result = self
            .db
            .query("SELECT slug, title FROM solutions ORDER BY slug ASC LIMIT $limit")
            .bind(("limit", limit))
            .await?;

        let rows: Vec<CorpusEntry> = result.take(0)?;
        Ok(rows)
    }
}
