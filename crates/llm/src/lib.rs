//! Language model integration for query interpretation
//!
//! Features:
//! - Claude Messages API backend implementing `LanguageModel`
//! - Medical search instruction set and request builder
//! - Per-model pricing for cost estimates

pub mod claude;
pub mod factory;
pub mod pricing;
pub mod prompt;

pub use claude::{ClaudeBackend, ClaudeConfig, ClaudeModel};
pub use factory::create_language_model;
pub use pricing::{estimate_cost, CostEstimate, ModelPricing};
pub use prompt::{build_search_request, MEDICAL_SEARCH_SYSTEM_PROMPT};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for drug_search_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Configuration(msg) => drug_search_core::Error::Config(msg),
            other => drug_search_core::Error::Llm(other.to_string()),
        }
    }
}
