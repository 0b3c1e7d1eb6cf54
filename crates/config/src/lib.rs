//! Configuration management for the drug search service
//!
//! Supports loading configuration from:
//! - YAML files under `config/` (`default.yaml`, then `{env}.yaml`)
//! - Environment variables (DRUG_SEARCH_ prefix, `__` nesting separator)

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, load_settings_from, DistanceMetric, EmbeddingBackend, EmbeddingConfig,
    LlmConfig, ObservabilityConfig, RuntimeEnvironment, SearchConfig, ServerConfig, Settings,
    StoreBackend, StoreConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
