//! Collaborator traits for the search pipeline
//!
//! The pipeline talks to three external services only through these traits,
//! so backends can be swapped (or replaced with fixtures in tests) without
//! touching the pipeline itself.
//!
//! ```text
//! LanguageModel:  query text → structured JSON interpretation
//! Embedder:       text → fixed-dimension, L2-normalized vector
//! CandidateStore: filtered KNN, predicate selection, NDC lookup
//! ```

mod embedding;
mod llm;
mod store;

pub use embedding::{Embedder, Embedding};
pub use llm::{Completion, CompletionRequest, LanguageModel};
pub use store::{CandidateStore, KnnQuery, StoreHit};
