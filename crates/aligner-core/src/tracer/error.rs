//! Error types for the tracer module.

/// Source text could not be tokenized or parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (line {line})")]
pub struct SyntaxError {
    pub message: String,
    pub line: u32,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// Errors produced outside a traced run (argument literals, static discovery).
#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("malformed literal: {0}")]
    MalformedLiteral(String),
}

/// Result type for tracer helpers.
pub type TracerResult<T> = std::result::Result<T, TracerError>;
