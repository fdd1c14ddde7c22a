//! JSON Lines ingestion of reference-solution datasets.
//!
//! Each non-blank line is one object. The solution code is taken from
//! `completion`, falling back to `response`; records with neither are skipped.
//! `task_id` is canonicalized into the corpus slug (`problem-<n>` when absent).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::slug::canonical_slug;
use crate::storage_traits::{Corpus, Embedder, StoreResult, StoredSolution};

/// One dataset row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRecord {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub completion: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
}

impl IngestRecord {
    /// Reference code carried by the record, if any
    pub fn code(&self) -> Option<&str> {
        [self.completion.as_deref(), self.response.as_deref()]
            .into_iter()
            .flatten()
            .find(|code| !code.trim().is_empty())
    }

    /// Convert into a stored solution filed under the canonical slug of its
    /// `task_id`; `index` names records without a usable one.
    pub fn into_solution(self, index: usize) -> Option<StoredSolution> {
        let code = self.code()?.to_string();
        let task_id = self.task_id.filter(|id| !id.trim().is_empty());
        let slug = task_id
            .as_deref()
            .map(canonical_slug)
            .filter(|slug| !slug.is_empty())
            .unwrap_or_else(|| format!("problem-{index}"));
        let title = self
            .title
            .or_else(|| task_id.map(|id| id.trim().to_string()))
            .unwrap_or_else(|| slug.clone());
        Some(StoredSolution {
            slug,
            title,
            code,
            entry_point: self.entry_point,
        })
    }
}

/// Outcome of an ingestion pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub ingested: usize,
    pub skipped: usize,
}

/// Ingest every record in a JSON Lines file into `corpus`.
///
/// A malformed line aborts ingestion with `StoreError::InvalidRecord`
/// carrying its 1-based line number; rows already written stay written.
pub async fn ingest_jsonl(
    path: &Path,
    corpus: &dyn Corpus,
    embedder: &dyn Embedder,
) -> StoreResult<IngestSummary> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut summary = IngestSummary::default();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: IngestRecord =
            serde_json::from_str(line).map_err(|e| StoreError::InvalidRecord {
                line: index + 1,
                reason: e.to_string(),
            })?;

        let Some(solution) = record.into_solution(index) else {
            debug!(line = index + 1, "skipping record without code");
            summary.skipped += 1;
            continue;
        };

        let embedding = embedder.embed(&solution.code).await?;
        corpus.insert(solution, embedding).await?;
        summary.ingested += 1;
    }

    info!(
        ingested = summary.ingested,
        skipped = summary.skipped,
        "corpus ingestion finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_prefers_completion_over_response() {
        let record = IngestRecord {
            completion: Some("class Solution: pass".into()),
            response: Some("other".into()),
            ..Default::default()
        };
        assert_eq!(record.code(), Some("class Solution: pass"));
    }

    #[test]
    fn test_code_falls_back_to_response() {
        let record = IngestRecord {
            completion: Some("  ".into()),
            response: Some("def f(): pass".into()),
            ..Default::default()
        };
        assert_eq!(record.code(), Some("def f(): pass"));
    }

    #[test]
    fn test_untitled_record_gets_indexed_slug() {
        let record = IngestRecord {
            completion: Some("x".into()),
            ..Default::default()
        };
        let solution = record.into_solution(7).unwrap();
        assert_eq!(solution.slug, "problem-7");
        assert_eq!(solution.title, "problem-7");
    }

    #[test]
    fn test_task_id_is_canonicalized() {
        let record = IngestRecord {
            task_id: Some("1. Two Sum".into()),
            completion: Some("x".into()),
            ..Default::default()
        };
        let solution = record.into_solution(0).unwrap();
        assert_eq!(solution.slug, "two-sum");
        assert_eq!(solution.title, "1. Two Sum");

        let symbols = IngestRecord {
            task_id: Some("???".into()),
            completion: Some("x".into()),
            ..Default::default()
        };
        assert_eq!(symbols.into_solution(4).unwrap().slug, "problem-4");
    }

    #[test]
    fn test_record_without_code_is_dropped() {
        assert!(IngestRecord::default().into_solution(0).is_none());
    }
}
