//! Structured observability hooks for review lifecycle events.
//!
//! This module provides:
//! - Review-scoped tracing spans via `ReviewSpan` RAII guard
//! - Emission functions for stage transitions, traced runs, retrieval and verdicts
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use tracing::{info, warn};

/// RAII guard that enters a review-scoped tracing span for the duration of a review.
///
/// # Example
///
/// ```ignore
/// let _span = ReviewSpan::enter("review-12345");
/// // all tracing calls are now associated with review_id = "review-12345"
/// ```
pub struct ReviewSpan {
    _span: tracing::span::EnteredSpan,
}

impl ReviewSpan {
    /// Create and enter a span tagged with the review_id.
    pub fn enter(review_id: &str) -> Self {
        Self {
            _span: review_span(review_id).entered(),
        }
    }
}

/// Span for one review; attach to async work with `Instrument`.
pub fn review_span(review_id: &str) -> tracing::Span {
    tracing::info_span!("aligner.review", review_id = %review_id)
}

/// Emit event: the pipeline entered a stage.
pub fn emit_stage_entered(stage: &str) {
    info!(event = "review.stage", stage = %stage);
}

/// Emit event: one traced run finished.
pub fn emit_trace_finished(entry_point: &str, steps: usize, success: bool, duration_ms: u64) {
    info!(
        event = "trace.finished",
        entry_point = %entry_point,
        steps = steps,
        success = success,
        duration_ms = duration_ms,
    );
}

/// Emit event: retrieval produced a candidate.
pub fn emit_retrieval_hit(slug: &str, provenance: &str, confidence: f64) {
    info!(
        event = "retrieval.hit",
        slug = %slug,
        provenance = %provenance,
        confidence = confidence,
    );
}

/// Emit event: retrieval found nothing.
pub fn emit_retrieval_miss(predicted_id: Option<&str>) {
    info!(event = "retrieval.miss", predicted_id = ?predicted_id);
}

/// Emit event: the classifier reached a verdict.
pub fn emit_verdict_classified(verdict: &str, user_steps: usize, reference_steps: Option<usize>) {
    info!(
        event = "verdict.classified",
        verdict = %verdict,
        user_steps = user_steps,
        reference_steps = ?reference_steps,
    );
}

/// Emit event: an external collaborator failed or timed out (warning level).
pub fn emit_collaborator_error(stage: &str, error: &dyn std::fmt::Display) {
    warn!(event = "review.collaborator_error", stage = %stage, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_span_create() {
        let _span = ReviewSpan::enter("test-review-id");
    }
}
