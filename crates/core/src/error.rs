//! Error types shared across the drug search crates

use thiserror::Error;

/// Core error type
///
/// Collaborator and store failures are carried as strings so that backends
/// can convert their own error enums without leaking client types upward.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Language model error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Candidate store error: {0}")]
    Store(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for failures of an external collaborator (LLM or embedder)
    pub fn is_collaborator(&self) -> bool {
        matches!(self, Error::Llm(_) | Error::Embedding(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
