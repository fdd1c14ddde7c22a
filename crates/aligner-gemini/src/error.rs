//! Error types for the Gemini collaborators

use aligner_core::CollaboratorError;
use aligner_store::StoreError;
use thiserror::Error;

/// Errors talking to the Gemini API
#[derive(Error, Debug)]
pub enum GeminiError {
    /// No API key configured
    #[error("Gemini API key is not configured (set GEMINI_API_KEY)")]
    MissingApiKey,

    /// HTTP transport failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success status from the API
    #[error("Gemini API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response did not have the expected shape
    #[error("Unexpected Gemini response: {0}")]
    InvalidResponse(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for Gemini operations
pub type GeminiResult<T> = std::result::Result<T, GeminiError>;

impl From<reqwest::Error> for GeminiError {
    fn from(err: reqwest::Error) -> Self {
        GeminiError::Http(err.to_string())
    }
}

impl From<GeminiError> for CollaboratorError {
    fn from(err: GeminiError) -> Self {
        match err {
            GeminiError::MissingApiKey => CollaboratorError::NotConfigured(err.to_string()),
            GeminiError::Http(_) | GeminiError::Status { .. } => {
                CollaboratorError::Transport(err.to_string())
            }
            GeminiError::InvalidResponse(_) | GeminiError::Json(_) => {
                CollaboratorError::InvalidResponse(err.to_string())
            }
        }
    }
}

impl From<GeminiError> for StoreError {
    fn from(err: GeminiError) -> Self {
        StoreError::Embedding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_mapping() {
        assert!(matches!(
            CollaboratorError::from(GeminiError::MissingApiKey),
            CollaboratorError::NotConfigured(_)
        ));
        assert!(matches!(
            CollaboratorError::from(GeminiError::Status {
                status: 503,
                body: "overloaded".into()
            }),
            CollaboratorError::Transport(_)
        ));
        assert!(matches!(
            CollaboratorError::from(GeminiError::InvalidResponse("no candidates".into())),
            CollaboratorError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_store_error_mapping() {
        let err = StoreError::from(GeminiError::Http("connection refused".into()));
        assert!(err.to_string().contains("connection refused"));
    }
}
