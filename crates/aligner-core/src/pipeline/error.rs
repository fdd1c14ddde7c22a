//! Error types for the review pipeline.

use thiserror::Error;

use super::stage::Stage;
use crate::execution::DeadlineExceeded;

/// An external collaborator (inspector, feedback generator) failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The request could not be sent or the service answered with an error status.
    #[error("request failed: {0}")]
    Transport(String),

    /// The service answered but the payload was unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Required configuration (e.g. an API key) is missing.
    #[error("not configured: {0}")]
    NotConfigured(String),
}

/// Errors that abort a review before a verdict exists.
///
/// Everything after inspection degrades into a verdict instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("inspection failed: {0}")]
    Inspection(#[from] CollaboratorError),

    #[error("inspector could not analyze the code structure")]
    InspectionMissing,

    #[error(transparent)]
    Deadline(#[from] DeadlineExceeded),

    #[error("invalid stage transition {from:?} -> {to}")]
    InvalidTransition { from: Option<Stage>, to: Stage },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
