//! Language-understanding collaborator

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Single-turn completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Raw completion plus usage accounting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub latency_ms: f64,
}

/// Text-in, text-out model
///
/// Implementations:
/// - `ClaudeBackend` - Anthropic Messages API
///
/// The pipeline parses `Completion::text` itself; backends must not try to
/// interpret it.
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    /// Model identifier for logging and cost accounting
    fn model_name(&self) -> &str;
}
