//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{embedding, endpoints, llm, search, store, timeouts};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation
    #[default]
    Development,
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Retrieval pipeline tuning
    #[serde(default)]
    pub search: SearchConfig,

    /// Query interpretation model
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Candidate store backend
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_search()?;
        self.validate_server()?;
        self.validate_backends()?;
        Ok(())
    }

    fn validate_search(&self) -> Result<(), ConfigError> {
        let s = &self.search;

        if s.max_results_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "search.max_results_cap".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if s.default_max_results == 0 || s.default_max_results > s.max_results_cap {
            return Err(ConfigError::InvalidValue {
                field: "search.default_max_results".to_string(),
                message: format!(
                    "Must be between 1 and max_results_cap ({}), got {}",
                    s.max_results_cap, s.default_max_results
                ),
            });
        }

        if s.candidate_multiplier == 0 || s.per_term_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "search.candidate_multiplier".to_string(),
                message: "Candidate limits must be positive".to_string(),
            });
        }

        if s.multi_concept_min_terms < 2 {
            return Err(ConfigError::InvalidValue {
                field: "search.multi_concept_min_terms".to_string(),
                message: format!("Must be at least 2, got {}", s.multi_concept_min_terms),
            });
        }

        if s.max_query_terms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "search.max_query_terms".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if s.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "search.request_timeout_ms".to_string(),
                message: "Timeout cannot be 0".to_string(),
            });
        }

        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if self.server.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.timeout_seconds".to_string(),
                message: "Timeout cannot be 0".to_string(),
            });
        }

        if self.environment.is_production() && !self.server.cors_enabled {
            return Err(ConfigError::InvalidValue {
                field: "server.cors_enabled".to_string(),
                message: "CORS must be enforced in production".to_string(),
            });
        }

        Ok(())
    }

    fn validate_backends(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimension".to_string(),
                message: "Dimension cannot be 0".to_string(),
            });
        }

        if self.store.backend == StoreBackend::Qdrant
            && self.store.vector_dim != self.embedding.dimension
        {
            return Err(ConfigError::InvalidValue {
                field: "store.vector_dim".to_string(),
                message: format!(
                    "Store vector_dim ({}) must match embedding.dimension ({})",
                    self.store.vector_dim, self.embedding.dimension
                ),
            });
        }

        if self.store.backend == StoreBackend::Memory && self.store.fixture_path.is_none() {
            return Err(ConfigError::MissingField("store.fixture_path".to_string()));
        }

        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", self.llm.temperature),
            });
        }

        if self.environment.is_strict() && self.embedding.backend == EmbeddingBackend::Hash {
            return Err(ConfigError::InvalidValue {
                field: "embedding.backend".to_string(),
                message: "Hash embeddings are for development only".to_string(),
            });
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_seconds: default_timeout(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Retrieval pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,

    #[serde(default = "default_max_results_cap")]
    pub max_results_cap: usize,

    /// KNN k = multiplier × max_results (single-concept)
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// KNN k per term (multi-concept)
    #[serde(default = "default_per_term_limit")]
    pub per_term_limit: usize,

    #[serde(default = "default_multi_concept_min_terms")]
    pub multi_concept_min_terms: usize,

    /// Expansion limit = factor × KNN k (single-concept)
    #[serde(default = "default_expansion_factor")]
    pub expansion_factor: usize,

    /// Expansion limit (multi-concept)
    #[serde(default = "default_multi_concept_expansion_limit")]
    pub multi_concept_expansion_limit: usize,

    #[serde(default = "default_max_query_terms")]
    pub max_query_terms: usize,

    #[serde(default = "default_alternatives_limit")]
    pub alternatives_limit: usize,

    #[serde(default = "default_therapeutic_denylist")]
    pub therapeutic_denylist: Vec<String>,

    /// End-to-end deadline per request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_results() -> usize {
    search::DEFAULT_MAX_RESULTS
}
fn default_max_results_cap() -> usize {
    search::MAX_RESULTS_CAP
}
fn default_candidate_multiplier() -> usize {
    search::CANDIDATE_MULTIPLIER
}
fn default_per_term_limit() -> usize {
    search::PER_TERM_LIMIT
}
fn default_multi_concept_min_terms() -> usize {
    search::MULTI_CONCEPT_MIN_TERMS
}
fn default_expansion_factor() -> usize {
    search::EXPANSION_FACTOR
}
fn default_multi_concept_expansion_limit() -> usize {
    search::MULTI_CONCEPT_EXPANSION_LIMIT
}
fn default_max_query_terms() -> usize {
    search::MAX_QUERY_TERMS
}
fn default_alternatives_limit() -> usize {
    search::ALTERNATIVES_LIMIT
}
fn default_therapeutic_denylist() -> Vec<String> {
    search::THERAPEUTIC_DENYLIST
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_request_timeout_ms() -> u64 {
    timeouts::SEARCH_REQUEST_MS
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_results: default_max_results(),
            max_results_cap: default_max_results_cap(),
            candidate_multiplier: default_candidate_multiplier(),
            per_term_limit: default_per_term_limit(),
            multi_concept_min_terms: default_multi_concept_min_terms(),
            expansion_factor: default_expansion_factor(),
            multi_concept_expansion_limit: default_multi_concept_expansion_limit(),
            max_query_terms: default_max_query_terms(),
            alternatives_limit: default_alternatives_limit(),
            therapeutic_denylist: default_therapeutic_denylist(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Query interpretation model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Falls back to `ANTHROPIC_API_KEY` when unset
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_llm_endpoint() -> String {
    endpoints::ANTHROPIC_DEFAULT.to_string()
}
fn default_llm_model() -> String {
    llm::DEFAULT_MODEL.to_string()
}
fn default_llm_max_tokens() -> usize {
    llm::MAX_TOKENS
}
fn default_llm_temperature() -> f32 {
    llm::TEMPERATURE
}
fn default_llm_timeout_ms() -> u64 {
    timeouts::LLM_REQUEST_MS
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            timeout_ms: default_llm_timeout_ms(),
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Ollama,
    /// Deterministic hash embeddings (development and tests)
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_embedding_endpoint() -> String {
    endpoints::OLLAMA_DEFAULT.to_string()
}
fn default_embedding_model() -> String {
    embedding::DEFAULT_MODEL.to_string()
}
fn default_embedding_dimension() -> usize {
    embedding::DIMENSION
}
fn default_embedding_timeout_ms() -> u64 {
    timeouts::EMBEDDING_REQUEST_MS
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

/// Candidate store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Qdrant,
    /// Fixture file loaded into memory
    Memory,
}

/// Distance metric of the vector field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclid,
    Dot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_dimension")]
    pub vector_dim: usize,

    #[serde(default)]
    pub distance: DistanceMetric,

    /// JSON or YAML list of drug records (memory backend)
    #[serde(default)]
    pub fixture_path: Option<String>,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}
fn default_collection() -> String {
    store::DEFAULT_COLLECTION.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            endpoint: default_qdrant_endpoint(),
            collection: default_collection(),
            api_key: None,
            vector_dim: default_embedding_dimension(),
            distance: DistanceMetric::default(),
            fixture_path: None,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from `config/` and the environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (DRUG_SEARCH_ prefix, `__` separator)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Same as [`load_settings`] with an explicit config directory
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::from(dir.join("default")).required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("DRUG_SEARCH")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
