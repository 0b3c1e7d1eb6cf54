//! Drug Search Server
//!
//! HTTP endpoints for search, drug detail and alternatives lookups.

pub mod http;
pub mod metrics;
pub mod state;

pub use http::create_router;
pub use metrics::{init_metrics, record_search_failure, record_search_success};
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use drug_search_core::Error;
use drug_search_pipeline::{SearchError, Stage};

/// Server errors
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("Lookup failed: {0}")]
    Lookup(#[from] Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        let kind = match self {
            ServerError::Search(err) => &err.kind,
            ServerError::Lookup(err) => err,
            ServerError::InvalidRequest(_) => return StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => return StatusCode::INTERNAL_SERVER_ERROR,
        };
        match kind {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the caller; collaborator details stay in the logs
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Search(err) => err.public_message(),
            ServerError::Lookup(Error::Validation(msg)) | ServerError::Lookup(Error::NotFound(msg)) => {
                msg.clone()
            },
            ServerError::Lookup(Error::Timeout(_)) => "lookup timed out".to_string(),
            ServerError::Lookup(_) => "lookup failed".to_string(),
            ServerError::InvalidRequest(msg) => msg.clone(),
            ServerError::Internal(_) => "internal error".to_string(),
        }
    }

    fn stage(&self) -> Option<Stage> {
        match self {
            ServerError::Search(err) => Some(err.stage),
            _ => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        }

        let mut body = serde_json::json!({
            "success": false,
            "error": self.public_message(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(stage) = self.stage() {
            body["stage"] = serde_json::Value::from(stage.as_str());
        }

        (status, Json(body)).into_response()
    }
}
