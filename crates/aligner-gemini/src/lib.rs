//! Gemini collaborators for CodeAligner
//!
//! This crate provides:
//! - Code inspection (language, entry point, test input, predicted problem)
//! - Mentor-style feedback on a review verdict
//! - Remote text embeddings for the reference corpus
//!
//! All three are served by [`GeminiClient`] over the Gemini REST API.

pub mod client;
pub mod config;
pub mod error;
pub mod prompts;

pub use client::GeminiClient;
pub use config::GeminiConfig;
pub use error::{GeminiError, GeminiResult};
