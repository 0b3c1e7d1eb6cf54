//! Deterministic embeddings
//!
//! `HashEmbedder` needs no model: it hashes words and character trigrams into
//! a fixed number of buckets. Texts that share names land close together,
//! which is enough for local runs and tests.

use async_trait::async_trait;

use drug_search_core::{Embedder, Embedding};

use crate::l2_normalize;

/// Embedding configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Embedding dimension
    pub embedding_dim: usize,
    /// Normalize embeddings
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 384,
            normalize: true,
        }
    }
}

/// Hash-based embedder for development and tests
pub struct HashEmbedder {
    config: EmbeddingConfig,
}

impl HashEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    pub fn with_dim(embedding_dim: usize) -> Self {
        Self::new(EmbeddingConfig {
            embedding_dim,
            ..Default::default()
        })
    }

    /// Generate the embedding synchronously
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dim = self.config.embedding_dim.max(1);
        let mut embedding = vec![0.0f32; dim];
        let lowered = text.to_lowercase();

        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            embedding[bucket(word.as_bytes(), dim)] += 1.0;

            let chars: Vec<char> = word.chars().collect();
            for gram in chars.windows(3) {
                let gram: String = gram.iter().collect();
                embedding[bucket(gram.as_bytes(), dim)] += 0.5;
            }
        }

        if self.config.normalize {
            l2_normalize(&mut embedding);
        }

        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EmbeddingConfig::default())
    }
}

/// FNV-1a, stable across runs and platforms
fn bucket(bytes: &[u8], dim: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % dim as u64) as usize
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> drug_search_core::Result<Embedding> {
        Ok(Embedding {
            vector: self.embed_text(text),
            model: self.model_name().to_string(),
        })
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dim
    }

    fn model_name(&self) -> &str {
        "hash"
    }
}
