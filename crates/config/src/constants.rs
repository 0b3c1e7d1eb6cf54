//! Centralized constants for the drug search service
//!
//! Single source of truth for default values used across crates. Settings
//! defaults, backend configs and tests all read from here.

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Ollama embedding endpoint
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";

    /// Qdrant vector store endpoint (REST API port)
    pub const QDRANT_DEFAULT: &str = "http://127.0.0.1:6333";

    /// Anthropic API endpoint
    pub const ANTHROPIC_DEFAULT: &str = "https://api.anthropic.com";
}

/// Timeouts (in milliseconds)
pub mod timeouts {
    /// Language model request timeout
    pub const LLM_REQUEST_MS: u64 = 30_000;

    /// Embedding request timeout
    pub const EMBEDDING_REQUEST_MS: u64 = 10_000;

    /// End-to-end deadline for one search request
    pub const SEARCH_REQUEST_MS: u64 = 30_000;

    /// Readiness probe against the candidate store
    pub const READINESS_PROBE_MS: u64 = 2_000;
}

/// Search pipeline defaults
pub mod search {
    /// Groups returned when the request does not say
    pub const DEFAULT_MAX_RESULTS: usize = 20;

    /// Hard cap on `max_results`; larger values are rejected
    pub const MAX_RESULTS_CAP: usize = 100;

    /// Raw KNN candidates requested per result slot (single-concept)
    pub const CANDIDATE_MULTIPLIER: usize = 3;

    /// Raw KNN hits per term (multi-concept)
    pub const PER_TERM_LIMIT: usize = 20;

    /// Drug-like terms needed to switch to the multi-concept strategy
    pub const MULTI_CONCEPT_MIN_TERMS: usize = 3;

    /// Terms must be longer than this to count as drug-like
    pub const DRUG_TERM_MIN_EXCLUSIVE: usize = 3;

    /// Expansion limit as a multiple of the KNN limit (single-concept)
    pub const EXPANSION_FACTOR: usize = 2;

    /// Fixed expansion ceiling (multi-concept)
    pub const MULTI_CONCEPT_EXPANSION_LIMIT: usize = 100;

    /// Terms kept by the naive tokenizer
    pub const MAX_QUERY_TERMS: usize = 8;

    /// Records scanned for same-GCN alternatives
    pub const ALTERNATIVES_LIMIT: usize = 100;

    /// Therapeutic classes too broad to expand on
    pub const THERAPEUTIC_DENYLIST: &[&str] = &[
        "Bulk Chemicals",
        "Miscellaneous",
        "Uncategorized",
        "Not Specified",
    ];
}

/// Language model defaults
pub mod llm {
    pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

    /// The interpretation is a short JSON object
    pub const MAX_TOKENS: usize = 400;

    pub const TEMPERATURE: f32 = 0.0;
}

/// Embedding defaults
pub mod embedding {
    pub const DEFAULT_MODEL: &str = "mxbai-embed-large";

    pub const DIMENSION: usize = 1024;
}

/// Candidate store defaults
pub mod store {
    pub const DEFAULT_COLLECTION: &str = "drugs";
    /// Shortest prefix the name full-text index keeps
    pub const TEXT_INDEX_MIN_TOKEN_LEN: u64 = 2;
}
