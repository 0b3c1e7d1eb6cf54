//! Core traits and types for the drug search pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Collaborator traits (language model, embedder, candidate store)
//! - Candidate records and provenance
//! - Typed store filters
//! - Drug family groups
//! - Query term vocabulary
//! - Error types

pub mod candidate;
pub mod error;
pub mod filter;
pub mod group;
pub mod query;
pub mod terms;
pub mod traits;

pub use candidate::{Candidate, Provenance, Similarity};
pub use error::{Error, Result};
pub use filter::{
    Filter, FilterSet, NumericField, NumericRangeFilter, TagField, TagFilter, TextField,
    TextFilter,
};
pub use group::{DrugGroup, ManufacturerGroup, MatchType, Variant};
pub use query::{SearchQuery, StructuredQuery, TermSource};

pub use traits::{
    CandidateStore, Completion, CompletionRequest, Embedder, Embedding, KnnQuery, LanguageModel,
    StoreHit,
};
