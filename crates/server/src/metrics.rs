//! Prometheus metrics
//!
//! Search counters and latency histograms, exported at `GET /metrics`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use drug_search_pipeline::{SearchError, StageTimings};

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global recorder. Safe to call more than once; later calls
/// return the first handle.
pub fn init_metrics() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_try_init(|| PrometheusBuilder::new().install_recorder())
        .map_err(|e| tracing::warn!(error = %e, "Failed to install Prometheus recorder"))
        .ok()
        .cloned()
}

pub fn record_search_success(total_ms: f64, stages: &StageTimings) {
    metrics::counter!("search_requests_total", "status" => "ok").increment(1);
    metrics::histogram!("search_latency_ms").record(total_ms);
    for (stage, elapsed_ms) in stages.iter() {
        metrics::histogram!("search_stage_latency_ms", "stage" => stage.as_str()).record(elapsed_ms);
    }
}

pub fn record_search_failure(total_ms: f64, error: &SearchError) {
    let status = if error.is_validation() {
        "invalid"
    } else if error.is_timeout() {
        "timeout"
    } else {
        "error"
    };
    metrics::counter!("search_requests_total", "status" => status).increment(1);
    metrics::histogram!("search_latency_ms").record(total_ms);
    metrics::counter!("search_errors_total", "stage" => error.stage.as_str()).increment(1);
}

/// `GET /metrics`
pub async fn metrics_handler() -> impl IntoResponse {
    match HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drug_search_core::Error;
    use drug_search_pipeline::Stage;

    #[test]
    fn test_recorded_series_render() {
        let handle = init_metrics().expect("recorder installs");
        assert!(init_metrics().is_some());

        let mut stages = StageTimings::default();
        stages.record(Stage::Retrieval, 12.5);
        record_search_success(40.0, &stages);
        record_search_failure(
            5.0,
            &SearchError::new(Stage::Retrieval, Error::Store("down".to_string())),
        );

        let rendered = handle.render();
        assert!(rendered.contains("search_requests_total"));
        assert!(rendered.contains("search_errors_total"));
        assert!(rendered.contains("stage=\"retrieval\""));
    }
}
