//! HTTP Endpoints
//!
//! REST API for drug search.

use std::time::{Duration, Instant};

use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use drug_search_config::constants::timeouts;
use drug_search_core::SearchQuery;
use drug_search_pipeline::SearchResponse;

use crate::metrics::{metrics_handler, record_search_failure, record_search_success};
use crate::state::AppState;
use crate::ServerError;

const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let config = state.get_config();
    let cors_layer = build_cors_layer(&config.server.cors_origins, config.server.cors_enabled);
    drop(config);

    Router::new()
        .route("/api/search", post(search))
        .route("/api/drugs/:ndc", get(drug_detail))
        .route("/api/drugs/:ndc/alternatives", get(drug_alternatives))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/admin/reload-config", post(reload_config))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// - If cors_enabled is false, returns permissive layer (for dev)
/// - If cors_origins is empty, defaults to localhost:3000
/// - Otherwise, uses the configured origins
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        if !origins.is_empty() {
            tracing::error!("All configured CORS origins are invalid, falling back to localhost");
        }
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static(DEFAULT_CORS_ORIGIN))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// POST /api/search
async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchQuery>, JsonRejection>,
) -> Result<Json<SearchResponse>, ServerError> {
    let Json(query) = payload.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let started = Instant::now();

    match state.pipeline().search(query).await {
        Ok(outcome) => {
            record_search_success(outcome.total_latency_ms, &outcome.timings);
            Ok(Json(SearchResponse::from(outcome)))
        },
        Err(err) => {
            record_search_failure(started.elapsed().as_secs_f64() * 1000.0, &err);
            Err(err.into())
        },
    }
}

/// GET /api/drugs/:ndc
async fn drug_detail(
    State(state): State<AppState>,
    Path(ndc): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let started = Instant::now();
    let detail = state.lookup().detail(&ndc).await?;

    Ok(Json(json!({
        "success": true,
        "drug": detail,
        "metrics": { "total_latency_ms": round2(elapsed_ms(started)) },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// GET /api/drugs/:ndc/alternatives
async fn drug_alternatives(
    State(state): State<AppState>,
    Path(ndc): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let started = Instant::now();
    let alternatives = state.lookup().alternatives(&ndc).await?;

    let mut body = serde_json::to_value(&alternatives)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    body["success"] = Value::Bool(true);
    body["metrics"] = json!({ "total_latency_ms": round2(elapsed_ms(started)) });
    body["timestamp"] = Value::from(chrono::Utc::now().to_rfc3339());
    Ok(Json(body))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store.name(),
    }))
}

/// GET /ready
///
/// Ready when the candidate store answers a ping within the probe timeout.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let probe = Duration::from_millis(timeouts::READINESS_PROBE_MS);
    let store_status = match tokio::time::timeout(probe, state.store.ping()).await {
        Ok(Ok(())) => "ok",
        Ok(Err(e)) => {
            tracing::warn!(store = state.store.name(), error = %e, "Store ping failed");
            "unreachable"
        },
        Err(_) => "timeout",
    };

    let ready = store_status == "ok";
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": {
                "store": { "status": store_status, "backend": state.store.name() }
            }
        })),
    )
}

/// POST /admin/reload-config
///
/// Reloads configuration from disk. Backend selection and CORS are only
/// applied at startup.
async fn reload_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload_config() {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "Configuration reloaded successfully"
            })),
        ),
        Err(e) => {
            tracing::error!("Config reload failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "message": e.to_string()
                })),
            )
        },
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
