//! Language model construction from settings

use std::sync::Arc;
use std::time::Duration;

use drug_search_config::LlmConfig;
use drug_search_core::LanguageModel;

use crate::claude::{ClaudeBackend, ClaudeConfig};
use crate::LlmError;

/// Build the configured language model
///
/// The API key comes from the config, falling back to `ANTHROPIC_API_KEY`.
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
        .unwrap_or_default();

    let claude_config = ClaudeConfig::new(api_key)
        .with_model_str(&config.model)
        .with_endpoint(config.endpoint.clone())
        .with_timeout(Duration::from_millis(config.timeout_ms));

    tracing::info!(
        model = claude_config.model.model_id(),
        endpoint = %claude_config.endpoint,
        "Creating Claude backend"
    );

    Ok(Arc::new(ClaudeBackend::new(claude_config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_key_builds_backend() {
        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            model: "haiku".to_string(),
            ..LlmConfig::default()
        };
        let llm = create_language_model(&config).unwrap();
        assert_eq!(llm.model_name(), "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_unknown_model_falls_back_to_default() {
        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            model: "gpt-4o".to_string(),
            ..LlmConfig::default()
        };
        let llm = create_language_model(&config).unwrap();
        assert_eq!(llm.model_name(), "claude-sonnet-4-20250514");
    }
}
