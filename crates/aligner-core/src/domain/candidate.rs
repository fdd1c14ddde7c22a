//! Reference solutions returned by retrieval.

use serde::{Deserialize, Serialize};

use aligner_store::StoredSolution;

/// How a candidate was found.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Key-equality hit on the canonical problem identifier.
    Exact,
    /// Nearest neighbour by embedding distance.
    Semantic,
}

/// A presumed-correct reference and how much we trust the match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateSolution {
    pub slug: String,
    pub title: String,
    pub code: String,
    pub entry_point: Option<String>,
    /// In `[0, 1]`; exactly 1.0 for exact hits.
    pub confidence: f64,
    pub provenance: Provenance,
}

impl CandidateSolution {
    pub fn exact(solution: StoredSolution) -> Self {
        Self::from_solution(solution, 1.0, Provenance::Exact)
    }

    /// Confidence is `1 - distance` with the distance clamped into `[0, 1]`.
    pub fn semantic(solution: StoredSolution, distance: f64) -> Self {
        let distance = if distance.is_nan() {
            1.0
        } else {
            distance.clamp(0.0, 1.0)
        };
        Self::from_solution(solution, 1.0 - distance, Provenance::Semantic)
    }

    fn from_solution(solution: StoredSolution, confidence: f64, provenance: Provenance) -> Self {
        Self {
            slug: solution.slug,
            title: solution.title,
            code: solution.code,
            entry_point: solution.entry_point,
            confidence,
            provenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_has_full_confidence() {
        let c = CandidateSolution::exact(StoredSolution::new("two-sum", "class Solution: pass"));
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.provenance, Provenance::Exact);
    }

    #[test]
    fn test_semantic_confidence_clamped() {
        let s = StoredSolution::new("x", "");
        assert!((CandidateSolution::semantic(s.clone(), 0.2).confidence - 0.8).abs() < 1e-12);
        assert_eq!(CandidateSolution::semantic(s.clone(), -0.5).confidence, 1.0);
        assert_eq!(CandidateSolution::semantic(s.clone(), 1.7).confidence, 0.0);
        assert_eq!(CandidateSolution::semantic(s, f64::NAN).confidence, 0.0);
    }
}
