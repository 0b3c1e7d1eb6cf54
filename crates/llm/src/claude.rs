//! Claude backend
//!
//! Implements the Anthropic Messages API for single-turn, non-streaming
//! completions. The search pipeline only needs one JSON object back per
//! query, so there is no tool use and no SSE handling here.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use drug_search_core::{Completion, CompletionRequest, LanguageModel};

use crate::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude model variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaudeModel {
    /// Claude Sonnet 4 - default for query interpretation
    #[default]
    Sonnet4,
    /// Claude Haiku 3.5 - cheaper, weaker at condition → drug mapping
    Haiku3_5,
}

impl ClaudeModel {
    pub fn model_id(&self) -> &'static str {
        match self {
            ClaudeModel::Sonnet4 => "claude-sonnet-4-20250514",
            ClaudeModel::Haiku3_5 => "claude-3-5-haiku-20241022",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sonnet" | "sonnet-4" | "claude-sonnet-4-20250514" => Some(ClaudeModel::Sonnet4),
            "haiku" | "haiku-3.5" | "claude-3-5-haiku-20241022" => Some(ClaudeModel::Haiku3_5),
            _ => None,
        }
    }
}

/// Configuration for Claude backend
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    /// API key (from ANTHROPIC_API_KEY or direct)
    pub api_key: String,
    pub model: ClaudeModel,
    /// Request timeout
    pub timeout: Duration,
    /// API endpoint (for testing or proxy)
    pub endpoint: String,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: ClaudeModel::default(),
            timeout: Duration::from_secs(30),
            endpoint: "https://api.anthropic.com".to_string(),
        }
    }
}

impl ClaudeConfig {
    /// Create config with API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: ClaudeModel) -> Self {
        self.model = model;
        self
    }

    /// Set model from string; unknown names keep the current model and log a warning
    pub fn with_model_str(mut self, model: &str) -> Self {
        match ClaudeModel::parse(model) {
            Some(m) => self.model = m,
            None => tracing::warn!(
                requested = %model,
                using = self.model.model_id(),
                "Unrecognized model name, falling back"
            ),
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }
}

/// Claude Messages API client
pub struct ClaudeBackend {
    config: ClaudeConfig,
    client: Client,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration(
                "ANTHROPIC_API_KEY not set. Set it via environment or config.".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    async fn send(&self, request: &CompletionRequest) -> Result<ClaudeResponse, LlmError> {
        let body = ClaudeRequest {
            model: self.config.model.model_id().to_string(),
            max_tokens: request.max_tokens,
            messages: vec![ClaudeMessage {
                role: "user".to_string(),
                content: request.user.clone(),
            }],
            system: if request.system.is_empty() {
                None
            } else {
                Some(request.system.clone())
            },
            temperature: Some(request.temperature),
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let response: ClaudeApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(ClaudeResponse::from(response))
    }
}

#[async_trait]
impl LanguageModel for ClaudeBackend {
    async fn complete(&self, request: CompletionRequest) -> drug_search_core::Result<Completion> {
        let start = Instant::now();
        let response = self.send(&request).await?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            model = self.config.model.model_id(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            stop_reason = ?response.stop_reason,
            latency_ms,
            "Claude completion finished"
        );

        Ok(Completion {
            text: response.text,
            model: self.config.model.model_id().to_string(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            latency_ms,
        })
    }

    fn model_name(&self) -> &str {
        self.config.model.model_id()
    }
}

/// Parsed response from Claude
#[derive(Debug, Clone)]
pub struct ClaudeResponse {
    /// Concatenated text blocks
    pub text: String,
    pub stop_reason: ClaudeStopReason,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl From<ClaudeApiResponse> for ClaudeResponse {
    fn from(response: ClaudeApiResponse) -> Self {
        let text = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ClaudeContentBlock::Text { text } => Some(text),
                ClaudeContentBlock::Other => None,
            })
            .collect::<String>();

        Self {
            text,
            stop_reason: response.stop_reason,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        }
    }
}

// =============================================================================
// Claude API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ClaudeApiResponse {
    content: Vec<ClaudeContentBlock>,
    #[serde(default)]
    stop_reason: ClaudeStopReason,
    usage: ClaudeUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaudeStopReason {
    #[default]
    EndTurn,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: usize,
    output_tokens: usize,
}
