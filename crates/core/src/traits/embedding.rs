//! Embedding collaborator

use crate::Result;
use async_trait::async_trait;

/// Embedding vector with the model that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
}

impl Embedding {
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// Text embedder
///
/// Vectors must be L2-normalized and match the dimension of the candidate
/// store's vector field.
#[async_trait]
pub trait Embedder: Send + Sync + 'static {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}
