//! Drug Search Server Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use drug_search_config::{load_settings, EmbeddingBackend, Settings, StoreBackend};
use drug_search_core::{CandidateStore, Embedder, LanguageModel};
use drug_search_llm::create_language_model;
use drug_search_rag::{
    HashEmbedder, InMemoryCandidateStore, OllamaEmbedder, OllamaEmbeddingConfig,
    QdrantCandidateStore, VectorStoreConfig,
};
use drug_search_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("DRUG_SEARCH_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        },
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };

    init_tracing(&config);

    tracing::info!("Starting Drug Search Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        config_path = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled && init_metrics().is_some() {
        tracing::info!("Initialized Prometheus metrics at /metrics");
    }

    let embedder = init_embedder(&config)?;
    let store = init_store(&config, embedder.as_ref()).await?;
    let llm = create_language_model(&config.llm)?;

    tracing::info!(
        llm = llm.model_name(),
        embedder = embedder.model_name(),
        dimension = embedder.dimension(),
        store = store.name(),
        "Initialized search backends"
    );

    let state = AppState::new(config.clone(), llm, embedder, store).with_env("config", env);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("drug_search={},tower_http=debug", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

fn init_embedder(config: &Settings) -> Result<Arc<dyn Embedder>, Box<dyn std::error::Error>> {
    let embedder: Arc<dyn Embedder> = match config.embedding.backend {
        EmbeddingBackend::Ollama => {
            let ollama = OllamaEmbedder::new(OllamaEmbeddingConfig::from(&config.embedding))?;
            tracing::info!(
                endpoint = %config.embedding.endpoint,
                model = %config.embedding.model,
                "Using Ollama embeddings"
            );
            Arc::new(ollama)
        },
        EmbeddingBackend::Hash => {
            tracing::warn!("Using hash embeddings; similarity is lexical only");
            Arc::new(HashEmbedder::with_dim(config.embedding.dimension))
        },
    };
    Ok(embedder)
}

async fn init_store(
    config: &Settings,
    embedder: &dyn Embedder,
) -> Result<Arc<dyn CandidateStore>, Box<dyn std::error::Error>> {
    let store: Arc<dyn CandidateStore> = match config.store.backend {
        StoreBackend::Qdrant => {
            let qdrant = QdrantCandidateStore::new(VectorStoreConfig::from(&config.store))?;
            qdrant.ensure_collection().await?;
            tracing::info!(
                endpoint = %config.store.endpoint,
                collection = %config.store.collection,
                "Qdrant store initialized"
            );
            Arc::new(qdrant)
        },
        StoreBackend::Memory => {
            let path = config
                .store
                .fixture_path
                .as_deref()
                .ok_or("store.fixture_path is required for the memory backend")?;
            Arc::new(InMemoryCandidateStore::load(path, embedder).await?)
        },
    };
    Ok(store)
}
