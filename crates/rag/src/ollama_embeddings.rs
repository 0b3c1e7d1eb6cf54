//! Ollama Embeddings
//!
//! Uses Ollama's `/api/embed` endpoint. Queries are embedded as plain text,
//! matching how drug records were indexed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use drug_search_config::constants::{embedding, endpoints, timeouts};
use drug_search_core::{Embedder, Embedding};

use crate::{l2_normalize, RagError};

/// Ollama embedding configuration
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingConfig {
    /// Ollama API endpoint
    pub endpoint: String,
    pub model: String,
    /// Expected embedding dimension
    pub embedding_dim: usize,
    pub timeout: Duration,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::OLLAMA_DEFAULT.to_string(),
            model: embedding::DEFAULT_MODEL.to_string(),
            embedding_dim: embedding::DIMENSION,
            timeout: Duration::from_millis(timeouts::EMBEDDING_REQUEST_MS),
        }
    }
}

impl From<&drug_search_config::EmbeddingConfig> for OllamaEmbeddingConfig {
    fn from(config: &drug_search_config::EmbeddingConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_dim: config.dimension,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

/// Request to Ollama embedding API
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Response from Ollama embedding API
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama embedder
pub struct OllamaEmbedder {
    client: Client,
    config: OllamaEmbeddingConfig,
}

impl OllamaEmbedder {
    pub fn new(config: OllamaEmbeddingConfig) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Raw embedding, normalized and dimension-checked
    async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: text,
        };

        let url = format!("{}/api/embed", self.config.endpoint);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "Ollama embedding failed: {} - {}",
                status, text
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("Failed to parse Ollama response: {}", e)))?;

        let mut vector = first_embedding(embed_response, self.config.embedding_dim)?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

fn first_embedding(response: EmbedResponse, expected_dim: usize) -> Result<Vec<f32>, RagError> {
    let vector = response
        .embeddings
        .into_iter()
        .next()
        .ok_or_else(|| RagError::Embedding("No embedding returned".to_string()))?;

    if vector.len() != expected_dim {
        return Err(RagError::Embedding(format!(
            "Expected {} dimensions, got {}",
            expected_dim,
            vector.len()
        )));
    }

    Ok(vector)
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> drug_search_core::Result<Embedding> {
        let vector = self.embed_raw(text).await?;
        Ok(Embedding {
            vector,
            model: self.config.model.clone(),
        })
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dim
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
