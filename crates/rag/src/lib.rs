//! Retrieval layer for drug search
//!
//! Features:
//! - Dense embeddings via Ollama, plus a deterministic hash embedder
//! - Candidate stores: Qdrant collection and in-memory fixture
//! - Hybrid retrieval (filtered KNN with a name-prefix gate)
//! - Multi-concept retrieval with concurrent per-term searches
//! - Two-phase pharmacologic/therapeutic class expansion

pub mod embeddings;
pub mod expander;
pub mod memory_store;
pub mod ollama_embeddings;
pub mod retriever;
pub mod vector_store;

pub use embeddings::{EmbeddingConfig, HashEmbedder};
pub use expander::{ClassExpander, ExpanderConfig, Expansion, ExpansionDebug};
pub use memory_store::InMemoryCandidateStore;
pub use ollama_embeddings::{OllamaEmbedder, OllamaEmbeddingConfig};
pub use retriever::{
    CandidateRetriever, EmbeddingStats, Retrieval, RetrievalRequest, RetrievalStrategy,
    RetrieverConfig,
};
pub use vector_store::{QdrantCandidateStore, VectorDistance, VectorStoreConfig};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Fixture error: {0}")]
    Fixture(String),
}

impl From<RagError> for drug_search_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Embedding(msg) => drug_search_core::Error::Embedding(msg),
            RagError::Fixture(msg) => drug_search_core::Error::Config(msg),
            other => drug_search_core::Error::Store(other.to_string()),
        }
    }
}

/// Scale a vector to unit length in place; zero vectors stay zero
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// `1 - cos(a, b)`; mismatched or zero vectors are maximally distant
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}
