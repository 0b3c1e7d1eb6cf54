//! Application State
//!
//! Shared state across all handlers.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use drug_search_config::{load_settings_from, ConfigError, Settings};
use drug_search_core::{CandidateStore, Embedder, LanguageModel};
use drug_search_pipeline::{DrugLookup, PipelineConfig, SearchPipeline};

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration wrapped in RwLock for hot-reload support
    pub config: Arc<RwLock<Settings>>,
    pipeline: Arc<RwLock<Arc<SearchPipeline>>>,
    lookup: Arc<RwLock<Arc<DrugLookup>>>,
    pub store: Arc<dyn CandidateStore>,
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    config_dir: PathBuf,
    /// Environment name for config reload
    env: Option<String>,
}

impl AppState {
    pub fn new(
        config: Settings,
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn CandidateStore>,
    ) -> Self {
        let pipeline = build_pipeline(&config, &llm, &embedder, &store);
        let lookup = build_lookup(&config, &store);
        Self {
            config: Arc::new(RwLock::new(config)),
            pipeline: Arc::new(RwLock::new(pipeline)),
            lookup: Arc::new(RwLock::new(lookup)),
            store,
            llm,
            embedder,
            config_dir: PathBuf::from("config"),
            env: None,
        }
    }

    /// Remember where settings came from so they can be reloaded
    pub fn with_env(mut self, config_dir: impl Into<PathBuf>, env: Option<String>) -> Self {
        self.config_dir = config_dir.into();
        self.env = env;
        self
    }

    /// Current pipeline; a reload swaps it for the next request
    pub fn pipeline(&self) -> Arc<SearchPipeline> {
        self.pipeline.read().clone()
    }

    pub fn lookup(&self) -> Arc<DrugLookup> {
        self.lookup.read().clone()
    }

    /// Get a read guard to the current configuration
    pub fn get_config(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.config.read()
    }

    /// Reload configuration from files.
    ///
    /// Search tuning and timeouts take effect on the next request. Backend
    /// selection, CORS and the listen address are only read at startup.
    pub fn reload_config(&self) -> Result<(), ConfigError> {
        let new_config = load_settings_from(&self.config_dir, self.env.as_deref())?;

        let pipeline = build_pipeline(&new_config, &self.llm, &self.embedder, &self.store);
        let lookup = build_lookup(&new_config, &self.store);
        *self.pipeline.write() = pipeline;
        *self.lookup.write() = lookup;
        *self.config.write() = new_config;

        tracing::info!(
            dir = %self.config_dir.display(),
            env = self.env.as_deref().unwrap_or("default"),
            "Configuration reloaded"
        );
        Ok(())
    }
}

fn build_pipeline(
    config: &Settings,
    llm: &Arc<dyn LanguageModel>,
    embedder: &Arc<dyn Embedder>,
    store: &Arc<dyn CandidateStore>,
) -> Arc<SearchPipeline> {
    Arc::new(SearchPipeline::new(
        PipelineConfig::from(config),
        llm.clone(),
        embedder.clone(),
        store.clone(),
    ))
}

fn build_lookup(config: &Settings, store: &Arc<dyn CandidateStore>) -> Arc<DrugLookup> {
    Arc::new(
        DrugLookup::new(store.clone()).with_alternatives_limit(config.search.alternatives_limit),
    )
}
