//! Gemini client configuration

use std::time::Duration;

/// Default text model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default embedding model
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-004";

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Vector length of `text-embedding-004`
pub const DEFAULT_EMBED_DIMENSIONS: usize = 768;

/// Configuration for the Gemini REST API
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key (required for every call)
    pub api_key: Option<String>,
    /// Model used for inspection and feedback
    pub model: String,
    /// Model used for embeddings
    pub embed_model: String,
    /// Length of vectors returned by `embed_model`
    pub embed_dimensions: usize,
    /// API root, without the version path
    pub base_url: String,
    /// Per-request HTTP timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            embed_dimensions: DEFAULT_EMBED_DIMENSIONS,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: 60_000,
        }
    }
}

impl GeminiConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - GEMINI_API_KEY
    /// - GEMINI_MODEL (default: gemini-2.0-flash)
    /// - GEMINI_EMBED_MODEL (default: text-embedding-004)
    /// - GEMINI_BASE_URL (default: the public endpoint)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        GeminiConfig {
            api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            embed_model: std::env::var("GEMINI_EMBED_MODEL").unwrap_or(defaults.embed_model),
            base_url: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url),
            ..defaults
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_embed_model(mut self, model: &str, dimensions: usize) -> Self {
        self.embed_model = model.to_string();
        self.embed_dimensions = dimensions;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeminiConfig::default();
        assert!(config.api_key.is_none());
        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.embed_dimensions, 768);
    }

    #[test]
    fn test_builder_strips_trailing_slash() {
        let config = GeminiConfig::default()
            .with_api_key("k")
            .with_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }
}
