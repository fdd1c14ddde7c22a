//! HTTP client for the Gemini `generateContent` and `embedContent` endpoints.

use aligner_core::{CollaboratorError, FeedbackGenerator, FeedbackRequest, Inspection, Inspector};
use aligner_store::{Embedder, StoreError, StoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GeminiConfig;
use crate::error::{GeminiError, GeminiResult};
use crate::prompts::{feedback_prompt, inspection_prompt, parse_inspection};

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Embedding,
}

#[derive(Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

/// Gemini REST client
///
/// One client serves as inspector, feedback generator and embedder.
pub struct GeminiClient {
    config: GeminiConfig,
    api_key: String,
    http_client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new client; fails when no API key is configured
    pub fn new(config: GeminiConfig) -> GeminiResult<Self> {
        let api_key = config.api_key.clone().ok_or(GeminiError::MissingApiKey)?;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("aligner-gemini/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()?;

        Ok(GeminiClient {
            config,
            api_key,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> GeminiResult<Self> {
        Self::new(GeminiConfig::from_env())
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> GeminiResult<R> {
        let response = self
            .http_client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeminiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Send one prompt and return the concatenated text of the first candidate
    pub async fn generate(&self, prompt: &str) -> GeminiResult<String> {
        let url = self.endpoint(&self.config.model, "generateContent");
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };
        debug!(model = %self.config.model, prompt_len = prompt.len(), "gemini generateContent");

        let response: GenerateResponse = self.post(&url, &request).await?;
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(GeminiError::InvalidResponse(
                "response has no candidate text".to_string(),
            ));
        }
        Ok(text)
    }

    /// Embed `text` with the configured embedding model
    pub async fn embed_text(&self, text: &str) -> GeminiResult<Vec<f32>> {
        let url = self.endpoint(&self.config.embed_model, "embedContent");
        let request = EmbedRequest {
            model: format!("models/{}", self.config.embed_model),
            content: Content {
                parts: vec![Part { text }],
            },
        };
        let response: EmbedResponse = self.post(&url, &request).await?;
        Ok(response.embedding.values)
    }
}

#[async_trait]
impl Inspector for GeminiClient {
    async fn inspect(
        &self,
        code: &str,
        description: &str,
    ) -> Result<Option<Inspection>, CollaboratorError> {
        let text = self.generate(&inspection_prompt(code, description)).await?;
        let inspection = parse_inspection(&text);
        if inspection.is_none() {
            warn!(response_len = text.len(), "inspector answer was not the expected JSON");
        }
        Ok(inspection)
    }
}

#[async_trait]
impl FeedbackGenerator for GeminiClient {
    async fn explain(&self, request: &FeedbackRequest) -> Result<String, CollaboratorError> {
        Ok(self.generate(&feedback_prompt(request)).await?)
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    fn dimensions(&self) -> usize {
        self.config.embed_dimensions
    }

    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        let vector = self.embed_text(text).await?;
        if vector.len() != self.config.embed_dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.embed_dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_api_key() {
        let result = GeminiClient::new(GeminiConfig::default());
        assert!(matches!(result, Err(GeminiError::MissingApiKey)));
    }

    #[test]
    fn test_endpoint_format() {
        let client = GeminiClient::new(
            GeminiConfig::default()
                .with_api_key("k")
                .with_base_url("http://localhost:1234/"),
        )
        .unwrap();
        assert_eq!(
            client.endpoint("gemini-2.0-flash", "generateContent"),
            "http://localhost:1234/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_generate_request_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: "hi" }],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }
}
