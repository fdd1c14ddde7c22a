//! Review pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analyzer::DEFAULT_ACCEPTANCE_THRESHOLD;
use crate::tracer::{default_arguments, Literal, TracerConfig};

/// Deadlines, thresholds and fallbacks for one review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Deadline for the inspector call (milliseconds).
    pub inspector_timeout_ms: u64,
    /// Deadline for retrieval, embedding plus corpus queries (milliseconds).
    pub retrieval_timeout_ms: u64,
    /// Deadline for the feedback call (milliseconds).
    pub feedback_timeout_ms: u64,
    /// Outer deadline for each traced run, including queueing for the run lock (milliseconds).
    pub trace_timeout_ms: u64,
    /// Minimum retrieval confidence for a reference to be executed.
    pub acceptance_threshold: f64,
    /// Arguments used when the inspector's test input does not parse.
    pub default_arguments: Vec<Literal>,
    /// Interpreter limits.
    pub tracer: TracerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inspector_timeout_ms: 30_000,
            retrieval_timeout_ms: 10_000,
            feedback_timeout_ms: 60_000,
            trace_timeout_ms: 15_000,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            default_arguments: default_arguments(),
            tracer: TracerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create from environment variables
    ///
    /// Reads (all optional):
    /// - ALIGNER_ACCEPTANCE_THRESHOLD
    /// - ALIGNER_TRACE_DEADLINE_MS (interpreter wall-clock budget)
    /// - ALIGNER_MAX_STEPS
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(threshold) = env_parse::<f64>("ALIGNER_ACCEPTANCE_THRESHOLD") {
            config.acceptance_threshold = threshold;
        }
        if let Some(ms) = env_parse::<u64>("ALIGNER_TRACE_DEADLINE_MS") {
            config.tracer.deadline = Duration::from_millis(ms);
        }
        if let Some(steps) = env_parse::<usize>("ALIGNER_MAX_STEPS") {
            config.tracer.max_steps = steps;
        }
        config
    }

    pub fn with_acceptance_threshold(mut self, threshold: f64) -> Self {
        self.acceptance_threshold = threshold;
        self
    }

    pub fn with_tracer(mut self, tracer: TracerConfig) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_inspector_timeout(mut self, timeout: Duration) -> Self {
        self.inspector_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_feedback_timeout(mut self, timeout: Duration) -> Self {
        self.feedback_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn inspector_timeout(&self) -> Duration {
        Duration::from_millis(self.inspector_timeout_ms)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_millis(self.feedback_timeout_ms)
    }

    pub fn trace_timeout(&self) -> Duration {
        Duration::from_millis(self.trace_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key = %key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.acceptance_threshold, 0.9);
        assert_eq!(config.default_arguments, default_arguments());
        assert!(config.trace_timeout() > config.tracer.deadline);
    }

    #[test]
    fn test_builder_overrides() {
        let config = PipelineConfig::default()
            .with_acceptance_threshold(0.4)
            .with_inspector_timeout(Duration::from_millis(250));
        assert_eq!(config.acceptance_threshold, 0.4);
        assert_eq!(config.inspector_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_serde_roundtrip_keeps_literal_text() {
        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert_eq!(json["default_arguments"][0], "[1, 5, 2]");
        let back: PipelineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, PipelineConfig::default());
    }
}
